use anyhow::{Context, Result};
use clap::Parser;
use myocast::{telemetry, Runtime};
use myoconf::{DeviceKind, MyoConfig};
use std::path::PathBuf;

/// EMG armband capture service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./myocast.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for the patient registry, sessions and snapshots
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// OTLP gRPC endpoint for OpenTelemetry (e.g., "127.0.0.1:4317")
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Device adapter: "simulated" or "replay"
    #[arg(long)]
    device: Option<String>,

    /// Session file to replay (implies --device replay)
    #[arg(long)]
    replay_file: Option<PathBuf>,

    /// Samples per second emitted by the device adapter
    #[arg(long)]
    rate_hz: Option<u32>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

impl Cli {
    /// CLI flags win over files and environment.
    fn apply(&self, config: &mut MyoConfig) -> Result<()> {
        if let Some(port) = self.port {
            config.infra.bind.http_port = port;
        }
        if let Some(dir) = &self.data_dir {
            config.infra.paths.data_dir = dir.clone();
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            config.infra.telemetry.otlp_endpoint = Some(endpoint.clone());
        }
        if let Some(device) = &self.device {
            config.capture.device.kind = DeviceKind::parse(device)
                .with_context(|| format!("Unknown device {device:?}, use simulated or replay"))?;
        }
        if let Some(path) = &self.replay_file {
            config.capture.device.kind = DeviceKind::Replay;
            config.capture.device.replay_path = Some(path.clone());
        }
        if let Some(rate) = self.rate_hz {
            config.capture.device.rate_hz = rate;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = MyoConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    cli.apply(&mut config)?;

    if cli.show_config {
        for file in &sources.files {
            println!("# loaded: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env: {var}");
        }
        print!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry =
        telemetry::init(&config.infra.telemetry).context("Failed to initialize telemetry")?;

    for file in &sources.files {
        tracing::debug!("config file: {}", file.display());
    }

    let mut runtime = Runtime::build(&config)?;
    runtime.attach_configured_device(&config)?;

    let web_state = runtime.web_state();
    let shutdown_token = web_state.shutdown.clone();
    let app = myocast::router(web_state);
    let addr = config.infra.bind.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("🦾 myocast listening on http://{}", addr);
    tracing::info!("   Control: POST http://{}/capture/start | /capture/stop", addr);
    tracing::info!("   Live feed: ws://{}/stream", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        })
        .await
        .context("HTTP server failed")?;

    tracing::info!("Server stopped, closing capture...");
    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .context("Capture shutdown task failed")?;

    tracing::info!("Shutdown complete");
    telemetry.shutdown();

    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to set up SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down gracefully..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "myocast",
            "--port",
            "6000",
            "--replay-file",
            "/tmp/session_s1.csv",
            "--rate-hz",
            "50",
        ]);
        let mut config = MyoConfig::default();
        cli.apply(&mut config).unwrap();

        assert_eq!(config.infra.bind.http_port, 6000);
        assert_eq!(config.capture.device.kind, DeviceKind::Replay);
        assert_eq!(config.capture.device.rate_hz, 50);
    }

    #[test]
    fn test_cli_rejects_unknown_device() {
        let cli = Cli::parse_from(["myocast", "--device", "myo"]);
        assert!(cli.apply(&mut MyoConfig::default()).is_err());
    }
}
