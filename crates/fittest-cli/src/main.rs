//! FitTest command line entry point

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fittest_core::config::FitTestConfig;
use fittest_core::protocol::{protocol_duration, ProtocolLibrary};

mod demo;
mod link;

/// Respirator fit-test console
#[derive(Parser, Debug)]
#[command(name = "fittest")]
#[command(author, version, about = "Respirator fit-test instrument driver and protocol runner")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports that might host the instrument
    Ports,

    /// Find the instrument's baud rate on a port
    Detect {
        /// Serial port, e.g. /dev/ttyUSB0
        #[arg(long)]
        port: String,

        /// Candidate rates to try instead of the configured ones
        #[arg(long = "rate")]
        rates: Vec<u32>,
    },

    /// Check a protocol definitions file
    Validate {
        /// JSON file mapping protocol names to stage arrays
        file: PathBuf,
    },

    /// Print the compiled timeline of one protocol as JSON
    Compile {
        /// Protocol definitions file
        file: PathBuf,

        /// Protocol name
        #[arg(long)]
        protocol: String,
    },

    /// Run a protocol against a simulated instrument
    Demo {
        /// Protocol definitions file
        file: PathBuf,

        /// Protocol name
        #[arg(long)]
        protocol: String,

        /// Fit factor of the simulated respirator
        #[arg(long, default_value_t = 150.0)]
        fit_factor: f64,

        /// Seed for reproducible readings
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = FitTestConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Ports => link::list(),
        Commands::Detect { port, rates } => link::detect(&config, &port, &rates).await?,
        Commands::Validate { file } => validate(&file)?,
        Commands::Compile { file, protocol } => {
            let library = load_library(&file)?;
            let segments = library.compile(&protocol)?;
            println!("{}", serde_json::to_string_pretty(&segments)?);
        }
        Commands::Demo {
            file,
            protocol,
            fit_factor,
            seed,
        } => {
            let library = load_library(&file)?;
            demo::run(config, library, &protocol, fit_factor, seed).await?;
        }
    }

    Ok(())
}

fn load_library(path: &Path) -> anyhow::Result<ProtocolLibrary> {
    ProtocolLibrary::from_file(path)
        .with_context(|| format!("failed to load protocols from {}", path.display()))
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let library = load_library(path)?;
    let violations = library.validate_all();
    if violations.is_empty() {
        println!("{} protocol(s) valid", library.len());
        for name in library.names() {
            let stages = library.stages(name)?;
            println!("  {} ({} s)", name, protocol_duration(&stages));
        }
        return Ok(());
    }

    for violation in &violations {
        println!("{}", violation);
    }
    anyhow::bail!("{} schema violation(s)", violations.len())
}
