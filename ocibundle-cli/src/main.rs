mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ocibundle::{
    ArtifactAssembler, Client, Error, LocalMaterializer, Operation, Pull, Push, StaticCredentials,
};

use crate::config::{BundleConfig, Overrides};

/// Push files to an OCI registry as one artifact and pull them back
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image address, as registry/repository:tag
    #[arg(long, global = true)]
    image: Option<String>,

    /// Registry username
    #[arg(long, global = true)]
    username: Option<String>,

    /// Registry password
    #[arg(long, global = true)]
    password: Option<String>,

    /// Comma separated list of files to push
    #[arg(long, global = true)]
    files: Option<String>,

    /// Directory pulled files are written to
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Configuration file (toml, yaml or json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to the registry over plain http
    #[arg(long, global = true)]
    plain_http: bool,

    /// Number of blobs transferred at once
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Per request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Push the files to the image address
    Push,

    /// Pull the files stored under the image address
    Pull,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config_file: self.config.clone(),
            image: self.image.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            files: self.files.clone(),
            output: self.output.clone(),
            plain_http: self.plain_http,
            concurrency: self.concurrency,
            timeout: self.timeout,
        }
    }

    /// Which halves of the round trip to run.
    fn steps(&self) -> (bool, bool) {
        match self.command {
            Some(Commands::Push) => (true, false),
            Some(Commands::Pull) => (false, true),
            None => (true, true),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (push, pull) = cli.steps();
    let config = match BundleConfig::load(&cli.overrides(), push) {
        Ok(config) => config,
        Err(Error::Configuration(reason)) => {
            eprintln!("{}", usage(&reason));
            return ExitCode::from(2);
        }
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    debug!("Loaded configuration: {:?}", config);

    tokio::select! {
        result = run(&config, push, pull) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{:#}", err);
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => {
            warn!("Interrupted before {} completed", config.image);
            ExitCode::FAILURE
        }
    }
}

/// Error line followed by the full help text.
fn usage(reason: &str) -> String {
    format!("error: {}\n\n{}", reason, Cli::command().render_help())
}

async fn run(config: &BundleConfig, push: bool, pull: bool) -> Result<()> {
    // Local files are read before anything goes over the network
    let blobs = if push {
        Some(LocalMaterializer::read_all(&config.files)?)
    } else {
        None
    };

    let credentials = Arc::new(StaticCredentials::new(config.credential.clone()));
    let client = Client::new(config.client.clone(), credentials)?;
    let session = client.session(config.image.clone())?;
    let tag = config.image.tag.as_str();

    if let Some(blobs) = blobs {
        let artifact = ArtifactAssembler::default().assemble(blobs)?;
        let outcome = Push::new(tag, artifact)
            .run(&session)
            .await
            .with_context(|| format!("pushing to {}", config.image))?;
        info!("Pushed {} as {}", outcome.manifest.digest, config.image);
    }

    if pull {
        let materializer = LocalMaterializer::new(&config.output);
        let outcome = Pull::new(tag, materializer)
            .run(&session)
            .await
            .with_context(|| format!("pulling from {}", config.image))?;
        for file in &outcome.files {
            info!("Wrote {}", file.display());
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, abandoning transfer");
}
