use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use spsa_tune::{
    prelude::*,
    tuning::{
        GradientEstimator, PairOutcome, PairSample, PairWeighting, PerturbationGenerator,
        objective::EvaluationResult,
    },
};

const NUM_PARAMS: usize = 64;

fn wide_set() -> ParameterSet {
    let params = (0..NUM_PARAMS)
        .map(|i| Parameter::new(format!("p{i}"), 50.0, 0.0, 100.0, 2.0))
        .collect();
    ParameterSet::new(params).unwrap()
}

fn bench_perturbation(c: &mut Criterion) {
    let mut group = c.benchmark_group("perturbation");
    let set = wide_set();

    group.bench_function("draw_64", |b| {
        let mut generator = PerturbationGenerator::new(Prng::init(7));
        b.iter(|| black_box(generator.next(&set, 1.0)));
    });

    group.bench_function("apply_and_quantize_64", |b| {
        let mut generator = PerturbationGenerator::new(Prng::init(7));
        b.iter_batched(
            || generator.next(&set, 1.0),
            |delta| black_box(set.apply_perturbation(&delta, 1.0).quantized()),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("gradient");
    let set = wide_set();
    let mut generator = PerturbationGenerator::new(Prng::init(11));
    let mut rng = Prng::init(13);
    let samples: Vec<PairSample> = (0..16)
        .map(|_| PairSample {
            perturbation: generator.next(&set, 1.0),
            outcome: PairOutcome {
                plus: EvaluationResult::new(rng.next_f64(), 6).with_variance(0.2),
                minus: EvaluationResult::new(rng.next_f64(), 6).with_variance(0.2),
            },
        })
        .collect();

    for (name, weighting) in [
        ("mean_16_pairs", PairWeighting::Mean),
        ("inverse_variance_16_pairs", PairWeighting::InverseVariance),
    ] {
        group.bench_function(name, |b| {
            let mut estimator = GradientEstimator::new(weighting, ObjectiveDirection::Maximize);
            b.iter(|| black_box(estimator.estimate(NUM_PARAMS, &samples)));
        });
    }

    group.finish();
}

fn bench_tuning_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("tuning_run");
    group.sample_size(20);

    group.bench_function("quadratic_64_params_50_iters", |b| {
        let objective = FnObjective::new(|params: &ParameterSet, seed| {
            let dist: f64 = params.iter().map(|p| (p.value - 70.0).powi(2)).sum();
            -dist + Prng::init(seed ^ dist.to_bits()).symmetric_f64()
        });
        let config = SpsaConfig {
            pairs_per_iteration: 4,
            max_iterations: 50,
            ..Default::default()
        };
        b.iter_batched(
            wide_set,
            |initial| {
                let mut tuner = SpsaTuner::new(initial, &objective, config.clone()).unwrap();
                black_box(tuner.run().unwrap())
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_perturbation, bench_gradient, bench_tuning_run);
criterion_main!(benches);
