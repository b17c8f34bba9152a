use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded record of the most recent raw objective values, used to print a
/// cheap running estimate of the goal without spending extra games on it.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationHistory {
    values: VecDeque<f64>,
    capacity: usize,
    total: u64,
}

impl Default for EvaluationHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EvaluationHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.total += 1;
    }

    /// Evaluations ever pushed, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Mean of the last `n` values, `n` clamped to `[1, stored]`.
    /// `None` before the first evaluation.
    pub fn average_last(&self, n: usize) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let n = n.clamp(1, self.values.len());
        let sum: f64 = self.values.iter().rev().take(n).sum();
        Some(sum / n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_has_no_average() {
        assert_eq!(EvaluationHistory::default().average_last(30), None);
    }

    #[test]
    fn averages_most_recent_values() {
        let mut h = EvaluationHistory::with_capacity(4);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            h.push(v);
        }
        assert_eq!(h.total(), 6);
        assert_eq!(h.average_last(2), Some(5.5));
        // only 4 retained
        assert_eq!(h.average_last(100), Some(4.5));
        assert_eq!(h.average_last(0), Some(6.0));
    }
}
