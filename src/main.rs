use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use clagent::{
    Agent, AgentConfig, ModelSpec, OptimizerKind, RawInput, TaskHead, TensorLoader,
    TensorLoaderConfig,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "clagent")]
#[command(about = "Continual-learning training agent with multi-task heads", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an agent configuration file
    CheckConfig {
        /// Configuration file (JSON or YAML)
        path: PathBuf,
    },

    /// Build the configured model and report its parameter count
    Params {
        /// Configuration file (JSON or YAML)
        path: PathBuf,
    },

    /// Train a small two-task MLP on synthetic data
    Demo {
        /// Number of training samples
        #[arg(long, default_value_t = 256)]
        samples: usize,

        /// Shuffle seed
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Save the trained weights under this name
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Commands::CheckConfig { path } => check_config(path),
        Commands::Params { path } => show_params(path),
        Commands::Demo { samples, seed, save } => run_demo(samples, seed, save),
    }
}

fn check_config(path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {}", path.display());
    let config = AgentConfig::from_file(&path).context("Failed to load configuration file")?;
    config.validate().context("Configuration is invalid")?;

    info!("Configuration is valid");
    info!("  - Model: {}", config.model.name());
    info!("  - Heads: {:?}", config.out_dim.iter().map(|h| (&h.task, h.dim)).collect::<Vec<_>>());
    info!("  - Optimizer: {:?}, lr {}", config.optimizer, config.lr);
    info!("  - Schedule: {:?} ({} epochs)", config.schedule, config.epochs());
    Ok(())
}

fn show_params(path: PathBuf) -> Result<()> {
    let config = AgentConfig::from_file(&path).context("Failed to load configuration file")?;
    let agent = Agent::new(config).context("Failed to build agent")?;
    info!("#parameter of model: {}", agent.count_parameter());
    Ok(())
}

/// Two linearly separable tasks sharing one input space
fn synthetic_tasks(samples: usize, device: &Device) -> Result<(Tensor, Tensor, Vec<String>)> {
    let x = Tensor::randn(0f32, 1.0, (samples, 8), device)?;
    let rows = x.to_vec2::<f32>()?;

    let mut labels = Vec::with_capacity(samples);
    let mut tasks = Vec::with_capacity(samples);
    for (i, row) in rows.iter().enumerate() {
        if i % 2 == 0 {
            labels.push(u32::from(row[0] > 0.0));
            tasks.push("parity".to_string());
        } else {
            let s = row[1] + row[2];
            labels.push(if s < -0.5 { 0 } else if s < 0.5 { 1 } else { 2 });
            tasks.push("bands".to_string());
        }
    }
    Ok((x, Tensor::from_vec(labels, samples, device)?, tasks))
}

fn run_demo(samples: usize, seed: u64, save: Option<PathBuf>) -> Result<()> {
    let config = AgentConfig {
        lr: 0.01,
        optimizer: OptimizerKind::Adam,
        schedule: vec![3, 5],
        model: ModelSpec::Mlp { in_dim: 8, hidden: vec![32] },
        out_dim: vec![TaskHead::new("parity", 2), TaskHead::new("bands", 3)],
        print_freq: 4,
        ..AgentConfig::default()
    };
    let mut agent = Agent::new(config).context("Failed to build agent")?;
    let device = agent.device().clone();

    let (x, y, tasks) = synthetic_tasks(samples, &device)?;
    let mut train = TensorLoader::new(
        RawInput::Tensor(x),
        y,
        tasks,
        TensorLoaderConfig { batch_size: 32, seed, ..Default::default() },
    )?;
    let (vx, vy, vtasks) = synthetic_tasks(samples / 4 + 1, &device)?;
    let mut val = TensorLoader::new(
        RawInput::Tensor(vx),
        vy,
        vtasks,
        TensorLoaderConfig { batch_size: 64, shuffle: false, ..Default::default() },
    )?;

    let acc = agent
        .learn_batch("demo", &mut train, Some(&mut val))
        .context("Training failed")?;
    info!("Final train accuracy: {:.2}", acc);

    if let Some(name) = save {
        let path = agent.save_model(&name).context("Failed to save model")?;
        info!("Weights written to {}", path.display());
    }
    Ok(())
}
