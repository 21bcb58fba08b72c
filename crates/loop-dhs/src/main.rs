//! Loop DHS -- loop detection hardware server for DCSS.
//!
//! Usage:
//!   loop-dhs BL-831 loop                       # config/BL-831.toml
//!   loop-dhs BL-831 loop --config other.toml   # Custom config
//!   loop-dhs BL-831 loop -vv                   # Trace logging

use std::path::PathBuf;

use clap::Parser;
use loop_dhs::config::LoopConfig;

#[derive(Parser)]
#[command(name = "loop-dhs", version, about = "Loop detection hardware server")]
struct Cli {
    /// Beamline name (e.g. BL-831)
    beamline: String,

    /// DHS name as registered in DCSS (e.g. loop)
    dhs_name: String,

    /// Path to config file [default: config/<beamline>.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    ["loop_dhs", "dhs_core", "dhs_dcss", "dhs_services"]
        .map(|target| format!("{target}={level}"))
        .join(",")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.verbose).into()),
        )
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(|| LoopConfig::default_path(&cli.beamline));
    let cfg = LoopConfig::load(&config_path)?;

    tracing::info!(
        beamline = %cli.beamline,
        dhs = %cli.dhs_name,
        config = %config_path.display(),
        "initializing dhs"
    );
    tracing::info!(dcss = %cfg.dcss_url(), automl = %cfg.automl_url(), "upstream services");
    tracing::info!(axis = %cfg.axis_url(), jpeg_receiver = %cfg.jpeg_receiver_url(), "image sources");

    let dhs = loop_dhs::build(&cli.dhs_name, &cfg)?;
    loop_dhs::open_connections(dhs.context(), &cfg)?;

    tracing::info!("dhs running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    dhs.shutdown();
    dhs.wait().await;

    tracing::info!("shutdown complete");
    Ok(())
}
