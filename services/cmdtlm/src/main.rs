//! Command and Telemetry Service (cmdtlm)

use clap::Parser;
use cmdtlm::{CmdTlmService, ServiceConfig};
use common::shutdown::wait_for_shutdown;
use std::path::PathBuf;
use tracing::info;

/// Command-line arguments for cmdtlm
#[derive(Parser, Clone)]
#[command(
    name = "cmdtlm",
    version = env!("CARGO_PKG_VERSION"),
    about = "Command and Telemetry Service",
    long_about = None
)]
struct Args {
    /// Config file (yaml, toml or json)
    #[arg(short = 'c', long, env = "STELLAR_CONFIG", default_value = "config/cmdtlm.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::load(Some(args.config.as_path()))?;

    let mut log_config = config.log.to_log_config();
    if let Some(level) = args.log_level {
        log_config.level = Some(level);
    }
    common::logging::init_with_config(log_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if args.validate {
        info!(
            "Configuration valid: {} interfaces, {} routers",
            config.interfaces.len(),
            config.routers.len()
        );
        return Ok(());
    }

    let service = CmdTlmService::new(config)?;
    service.start()?;
    info!("cmdtlm running, press Ctrl+C to stop");

    wait_for_shutdown().await;
    info!("Shutting down cmdtlm");
    service.stop();
    Ok(())
}
