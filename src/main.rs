use clap::Parser;
use spsa_tune::prelude::*;
use spsa_tune::tuning::GainSchedule;

#[cfg(feature = "parallel")]
use indicatif::{ProgressBar, ProgressStyle};

fn main() -> miette::Result<()> {
    init();
    let cli = Cli::parse();

    set_log_level(cli.log_level)?;
    if cli.log_file {
        toggle_file_logging(true)?;
        if let Some(path) = log_file() {
            info!("Writing debug log to {}", path.display());
        }
    }

    let span = span!(Level::DEBUG, "main");
    let _guard = span.enter();
    match cli.command {
        Commands::Run {
            command,
            params,
            tuner,
            regularize,
            mix,
        } => {
            trace!("Tuning against `{command}`");
            let initial = params.load()?;
            let config = tuner.load_config()?;
            setup_threads(tuner.threads)?;

            let engine = CommandObjective::new(&command)?;
            match regularize {
                Some(lambda) => {
                    let objective = Regularized::new(engine, &initial).with_strength(lambda, mix)?;
                    tune(initial, objective, config, &tuner)
                }
                None => tune(initial, engine, config, &tuner),
            }
        }
        Commands::Demo {
            target,
            dims,
            noise,
            start,
            tuner,
        } => {
            miette::ensure!(dims > 0, "A demo needs at least one parameter");
            let config = tuner.load_config()?;
            setup_threads(tuner.threads)?;

            let initial = ParameterSet::new(
                (0..dims)
                    .map(|i| {
                        Parameter::new(format!("x{i}"), start, target - 10.0, target + 10.0, 1.0)
                    })
                    .collect(),
            )?;
            info!("Demo: {dims}-d quadratic, optimum at {target}, noise ±{noise}");
            let objective = FnObjective::new(move |params: &ParameterSet, seed| {
                let dist: f64 = params.iter().map(|p| (p.value - target).powi(2)).sum();
                let mut rng = Prng::init(seed ^ dist.to_bits());
                -dist + noise * rng.symmetric_f64()
            });
            tune(initial, objective, config, &tuner)
        }
        Commands::Check {
            params,
            config,
            rows,
        } => {
            let config = match config {
                Some(path) => SpsaConfig::load_from_file(path)?,
                None => SpsaConfig::default(),
            };
            config.validate()?;
            let gains = config.gains()?;
            check(&params, &config, &gains, rows)
        }
    }
}

/// Rayon pool for pair evaluation
fn setup_threads(threads: usize) -> miette::Result<()> {
    #[cfg(feature = "parallel")]
    {
        let num_threads = if threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            threads
        };
        debug!("Evaluating pairs on {num_threads} threads");

        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .into_diagnostic()?;
    }
    #[cfg(not(feature = "parallel"))]
    {
        if threads > 1 {
            warn!("Built without `parallel`, ignoring --threads {threads}");
        }
    }
    Ok(())
}

fn tune<O: NoisyObjective>(
    initial: ParameterSet,
    objective: O,
    config: SpsaConfig,
    args: &TunerArgs,
) -> miette::Result<()> {
    let mut tuner = SpsaTuner::new(initial, objective, config)?;
    println!("Starting from: {}", tuner.initial());

    let outcome = drive(&mut tuner);

    let summary = tuner.summary();
    println!("{summary}");
    if let Some(path) = &args.summary {
        summary.save_to_file(path)?;
        println!("Saved summary to {}", path.display());
    }

    let state = outcome?;
    debug!("Tuner ended in {state:?}");
    Ok(())
}

/// Steps the tuner to completion, with a progress bar when available.
fn drive<O: NoisyObjective>(tuner: &mut SpsaTuner<O>) -> Result<TunerState, TuningError> {
    #[cfg(feature = "parallel")]
    {
        let pb = ProgressBar::new(tuner.config().max_iterations as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let result = loop {
            match tuner.step() {
                Ok(Step::Continue) => pb.inc(1),
                Ok(Step::Finished(state)) => break Ok(state),
                Err(e) => break Err(e),
            }
        };
        pb.finish_and_clear();
        result
    }
    #[cfg(not(feature = "parallel"))]
    {
        tuner.run()
    }
}

fn check(
    params: &ParamArgs,
    config: &SpsaConfig,
    gains: &GainSchedule,
    rows: usize,
) -> miette::Result<()> {
    println!(
        "Config OK: {} iterations, {} pair(s) of {} games, A = {}",
        config.max_iterations,
        config.pairs_per_iteration,
        config.games_per_pair,
        config.stability_offset()
    );

    if params.params.is_some() || params.tokens.is_some() {
        let set = params.load()?;
        println!("{} parameters: {set}", set.len());
        for p in set.iter() {
            let first = gains.c_k(0) * p.step;
            println!(
                "  {:<24} {:>10} in [{}, {}], first perturbation ±{first:.4}",
                p.name, p.value, p.min, p.max
            );
        }
    }

    println!("{:>8} {:>12} {:>12}", "k", "a_k", "c_k");
    let last = config.max_iterations.saturating_sub(1);
    let stride = (last / rows.max(1)).max(1);
    let mut ks: Vec<usize> = (0..=last).step_by(stride).take(rows.max(1)).collect();
    if ks.last() != Some(&last) {
        ks.push(last);
    }
    for k in ks {
        println!("{k:>8} {:>12.6} {:>12.6}", gains.a_k(k), gains.c_k(k));
    }
    Ok(())
}
