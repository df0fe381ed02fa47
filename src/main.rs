use clap::Parser;
use hubnode::node::ControlUnit;
use log::{error, info, warn};
use std::path::PathBuf;

/// Command-line arguments for the control-unit node
#[derive(Parser)]
#[command(
    name = "hubnode",
    about = "IoT control-unit node - entity registration, monitoring and aggregation",
    long_about = "A control-unit node that accepts entity model registrations over MQTT or HTTP, \
                  opens a monitoring subscription per registered entity, aggregates received \
                  telemetry and distributes the result downstream."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Reject argument combinations the node cannot start with
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // A missing file falls back to defaults later; only a path that
            // exists but is not a regular file is an argument error.
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "configuration path is not a file: {}",
                        config_path.display()
                    ));
                }
                if config_path.extension().is_some_and(|ext| ext != "toml") {
                    warn!(
                        "configuration file without .toml extension: {}",
                        config_path.display()
                    );
                }
            }
        }

        Ok(())
    }

    /// The config path as UTF-8, or an error naming the offending path
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "configuration path is not valid UTF-8: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting control-unit node");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let config = match ControlUnit::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut node = match ControlUnit::new(config) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to initialize node: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = node.start() {
        error!("Failed to start node: {:#}", e);
        std::process::exit(1);
    }

    // Graceful shutdown on SIGINT
    let shutdown_sender = node.shutdown_sender();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .expect("Error setting SIGINT handler for graceful shutdown");

    info!("Control-unit node is running. Press Ctrl+C to stop.");

    node.wait_for_shutdown();
    node.stop();
    info!("Control-unit node shutdown complete");
}
