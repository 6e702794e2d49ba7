//! seqtrain CLI for inspecting datasets and training the linear baseline.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqtrain::all::*;

#[derive(Parser)]
#[command(name = "seqtrain")]
#[command(author, version)]
#[command(about = "Train sequence predictors on windowed time series")]
#[command(long_about = "seqtrain: windowed time-series training with early stopping.

EXAMPLES:
  # Show window counts and signal shapes for an archive with y/u/d members
  seqtrain inspect --data tank.npz --horizon 16

  # Train the linear baseline and save the best model
  seqtrain train --data tank.npz --horizon 16 --epochs 200 --save-dir ./runs/tank

  # Use raw .npy signals and JSON configs
  seqtrain train --signal Y=y.npy --signal U=u.npy --trainer-config trainer.json")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show signals, bundles and split sizes
    Inspect {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Train the linear baseline, then evaluate it
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// Trainer settings as JSON (missing fields take defaults)
        #[arg(long, value_name = "FILE")]
        trainer_config: Option<PathBuf>,

        /// Override the number of epochs
        #[arg(long, value_name = "N")]
        epochs: Option<usize>,

        /// Override the patience
        #[arg(long, value_name = "N")]
        patience: Option<usize>,

        /// Learning rate for SGD
        #[arg(long, default_value = "0.1", value_name = "LR")]
        lr: f64,

        /// SGD momentum
        #[arg(long, default_value = "0.0", value_name = "BETA")]
        momentum: f64,

        /// Initialization seed
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,

        /// Resume from a saved trainer state
        #[arg(long, value_name = "FILE")]
        resume: Option<PathBuf>,

        /// Also roll the model out on the open-loop bundles
        #[arg(long, default_value = "false")]
        open_loop: bool,

        /// Directory for the best model, normalization stats and plots
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,
    },
}

#[derive(Args)]
struct DataArgs {
    /// `.npz` archive with members y, u and d
    #[arg(long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Raw `.npy` signal as KEY=PATH (repeatable)
    #[arg(long, value_name = "KEY=PATH")]
    signal: Vec<String>,

    /// Dataset settings as JSON (missing fields take defaults)
    #[arg(long, value_name = "FILE")]
    dataset_config: Option<PathBuf>,

    /// Override the window length
    #[arg(long, value_name = "STEPS")]
    horizon: Option<usize>,

    /// Keep only the first N rows of the archive
    #[arg(long, value_name = "N")]
    nsim: Option<usize>,

    /// Windows per batch (default: one batch per split)
    #[arg(long, value_name = "SIZE")]
    batch_size: Option<usize>,
}

impl DataArgs {
    fn config(&self) -> Result<DatasetConfig> {
        let mut config = match &self.dataset_config {
            Some(path) => DatasetConfig::from_json_file(path)
                .with_context(|| format!("Failed to read dataset config {}", path.display()))?,
            None => DatasetConfig::default(),
        };
        if let Some(horizon) = self.horizon {
            config.horizon = horizon;
        }
        if self.nsim.is_some() {
            config.nsim = self.nsim;
        }
        if self.batch_size.is_some() {
            config.batch_size = self.batch_size;
        }
        Ok(config)
    }

    fn load(&self, config: &DatasetConfig) -> Result<SequenceDataset> {
        if self.data.is_none() && self.signal.is_empty() {
            bail!("Supply an archive with --data or raw signals with --signal KEY=PATH");
        }

        let mut builder = SequenceDataset::builder().config(config);
        if let Some(path) = &self.data {
            builder = builder.source(NpzSource::new(path));
        }
        for arg in &self.signal {
            let (key, path) = parse_signal(arg)?;
            let sequence =
                read_npy(path).with_context(|| format!("Failed to read signal '{key}' from {path}"))?;
            builder = builder.sequence(key, sequence);
        }
        builder.build().context("Failed to build dataset")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Inspect { data } => handle_inspect(&data),
        Commands::Train {
            data,
            trainer_config,
            epochs,
            patience,
            lr,
            momentum,
            seed,
            resume,
            open_loop,
            save_dir,
        } => {
            let mut config = match trainer_config {
                Some(path) => TrainerConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to read trainer config {}", path.display()))?,
                None => TrainerConfig::default(),
            };
            if let Some(epochs) = epochs {
                config.epochs = epochs;
            }
            if let Some(patience) = patience {
                config.patience = patience;
            }
            handle_train(
                &data,
                config,
                SgdConfig::new(lr).with_momentum(momentum),
                Seed::new(seed),
                resume.as_deref(),
                open_loop,
                save_dir.as_deref(),
            )
        }
    }
}

/// Split `KEY=PATH` into its parts.
fn parse_signal(arg: &str) -> Result<(&str, &str)> {
    match arg.split_once('=') {
        Some((key, path)) if !key.is_empty() && !path.is_empty() => Ok((key, path)),
        _ => bail!("Expected KEY=PATH, got '{arg}'"),
    }
}

fn handle_inspect(data: &DataArgs) -> Result<()> {
    let config = data.config()?;
    let ds = data.load(&config)?;
    print_dataset_info(&ds);
    Ok(())
}

/// Print dataset information.
fn print_dataset_info(ds: &SequenceDataset) {
    println!("Dataset: {}", ds.name());
    println!("─────────────────────────────────────────");
    println!("  Horizon:        {}", ds.horizon());
    println!("  Primary signal: {}", ds.primary_key());
    for (key, signal) in ds.signals() {
        let normalized = if ds.store().get(key).is_some() { "normalized" } else { "raw" };
        println!("  {key:<15} {:?} ({normalized})", signal.dim());
    }
    println!();
    for split in Split::ALL {
        let nstep = ds.nstep(split);
        let open_loop = ds.loop_data(split);
        println!(
            "  {:<15} {:>6} windows, {:>6} open-loop steps",
            nstep.name().to_string(),
            nstep.n_samples(),
            open_loop.n_steps()
        );
    }
}

fn handle_train(
    data: &DataArgs,
    config: TrainerConfig,
    sgd: SgdConfig,
    seed: Seed,
    resume: Option<&Path>,
    open_loop: bool,
    save_dir: Option<&Path>,
) -> Result<()> {
    let data_config = data.config()?;
    let ds = data.load(&data_config)?;

    println!("=== seqtrain Training ===\n");
    println!("Configuration:");
    println!("  Dataset: {}", ds.name());
    println!("  Horizon: {}", ds.horizon());
    println!("  Epochs: {}", config.epochs);
    println!("  Patience: {}", config.patience);
    println!("  Learning rate: {} (momentum {})", sgd.lr, sgd.momentum);
    println!("  Eval metric: {} ({})", config.eval_metric, config.eval_mode);
    println!("  Seed: {}\n", seed.value());

    let loaders = LoaderSet::nstep(&ds, &data_config).context("Failed to create loaders")?;
    let model = LinearPredictor::for_dataset(&ds, seed).context("Failed to create model")?;
    println!(
        "Model: {} -> {} ({} parameters)\n",
        model.inputs().iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
        model.target(),
        model.parameters().iter().map(|p| p.value.len()).sum::<usize>()
    );

    let mut builder = Trainer::builder(model, Sgd::new(sgd), loaders)
        .config(config)
        .callback(TerminateOnNanCallback::new());
    if let Some(path) = resume {
        let state = TrainerState::load_json(path)
            .with_context(|| format!("Failed to read trainer state {}", path.display()))?;
        println!("Resuming at epoch {}\n", state.current_epoch);
        builder = builder.state(state);
    }
    if let Some(dir) = save_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        builder = builder
            .logger(BasicLogger::new().with_save_dir(dir))
            .visualizer(CurveVisualizer::new());
    }
    let mut trainer = builder.build().context("Failed to create trainer")?;
    let token = trainer.cancellation_token();
    ctrlc::set_handler(move || {
        if interrupt(&token) {
            std::process::exit(130);
        }
    })
    .context("Failed to install interrupt handler")?;

    let report = trainer.train().context("Training failed")?;
    if report.stop_reason == StopReason::Cancelled {
        println!("\nInterrupted: evaluating and saving the best parameters so far");
    }
    println!("Stopped: {} after {} epochs", report.stop_reason, report.epochs_run);
    match report.best_epoch {
        Some(epoch) => println!(
            "Best {} = {:.6} at epoch {epoch}",
            trainer.config().eval_metric,
            report.best_metric
        ),
        None => println!("No improving epoch"),
    }

    let test = trainer.test().context("Evaluation failed")?;
    print_metrics("n-step", &test.metrics);

    if open_loop {
        let loaders = LoaderSet::open_loop(&ds).context("Failed to create open-loop loaders")?;
        let rollout = trainer.test_with(&loaders).context("Open-loop evaluation failed")?;
        print_metrics("open-loop", &rollout.metrics);
    }

    if let Some(dir) = save_dir {
        ds.store()
            .save_json(dir.join("normalization.json"))
            .context("Failed to save normalization stats")?;
        trainer
            .state()
            .save_json(dir.join("trainer_state.json"))
            .context("Failed to save trainer state")?;
        println!("\nSaved run to {}", dir.display());
    }

    Ok(())
}

/// Handle Ctrl-C: the first press cancels training, a second one asks to abort.
fn interrupt(token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        eprintln!("\nAborting");
        return true;
    }
    eprintln!("\nInterrupt received, stopping after the current batch (Ctrl-C again to abort)");
    token.cancel();
    false
}

fn print_metrics(label: &str, metrics: &std::collections::BTreeMap<String, f32>) {
    println!("\n{label} metrics:");
    for (key, value) in metrics {
        println!("  {key:<24} {value:.6}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::WriteNpyExt;

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("U=u.npy").unwrap(), ("U", "u.npy"));
        assert_eq!(parse_signal("Y=runs/a=b.npy").unwrap(), ("Y", "runs/a=b.npy"));
        assert!(parse_signal("u.npy").is_err());
        assert!(parse_signal("=u.npy").is_err());
    }

    #[test]
    fn test_interrupt_cancels_then_aborts() {
        let token = CancellationToken::new();
        assert!(!interrupt(&token));
        assert!(token.is_cancelled());
        assert!(interrupt(&token));
    }

    fn npy(dir: &Path, name: &str, rows: usize) -> String {
        let path = dir.join(name);
        let signal = ndarray::Array2::from_shape_fn((rows, 1), |(t, _)| (t as f32 * 0.3).sin());
        signal.write_npy(std::fs::File::create(&path).unwrap()).unwrap();
        format!("{}={}", name.trim_end_matches(".npy").to_uppercase(), path.display())
    }

    #[test]
    fn test_cancelled_run_still_saves_state() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataArgs {
            data: None,
            signal: vec![npy(dir.path(), "y.npy", 60), npy(dir.path(), "u.npy", 60)],
            dataset_config: None,
            horizon: Some(4),
            nsim: None,
            batch_size: Some(2),
        };
        let config = data.config().unwrap();
        let ds = data.load(&config).unwrap();
        let loaders = LoaderSet::nstep(&ds, &config).unwrap();
        let model = LinearPredictor::for_dataset(&ds, Seed::new(1)).unwrap();
        let mut trainer = Trainer::builder(model, Sgd::with_lr(0.05), loaders)
            .config(TrainerConfig::default().with_epochs(5))
            .build()
            .unwrap();

        assert!(!interrupt(&trainer.cancellation_token()));
        let report = trainer.train().unwrap();
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.epochs_run, 0);

        trainer.test().unwrap();
        let path = dir.path().join("trainer_state.json");
        trainer.state().save_json(&path).unwrap();
        let state = TrainerState::load_json(&path).unwrap();
        assert_eq!(state.best_snapshot, Some(report.best));
    }
}
