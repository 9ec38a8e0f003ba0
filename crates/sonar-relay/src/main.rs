//! sonar-relay: MCP gateway exposing Perplexity Sonar tools with usage analytics.

mod config;
mod dashboard;
mod mcp;
mod server;
mod tools;
mod upstream;

use std::time::Duration;

use config::RelayConfig;
use server::AppState;
use sonar_telemetry::{persist, SnapshotFile};
use tokio_util::sync::CancellationToken;
use upstream::UpstreamClient;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        // Check for --config flag first
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            // Fall back to positional arg
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("SONAR_RELAY_CONFIG").ok())
            .unwrap_or_else(|| "sonar-relay.toml".to_string())
    };

    // Load configuration
    let config = RelayConfig::load(&config_path)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,tower_http=warn".into()),
            )
            .init();

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            upstream_base = %config.upstream.base_url,
            snapshot_path = %config.telemetry.snapshot_path,
            "Starting sonar-relay"
        );

        run(config).await
    })
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    // Restore usage counters (or initialize a fresh snapshot on disk)
    let snapshot_file = SnapshotFile::new(&config.telemetry.snapshot_path);
    let usage = persist::open_store(&snapshot_file);

    // Background save loop, cancelled after the listener drains
    let saver_shutdown = CancellationToken::new();
    let saver = tokio::spawn(persist::run_periodic_save(
        usage.clone(),
        snapshot_file.clone(),
        saver_shutdown.clone(),
    ));

    // Build upstream HTTP client
    let upstream_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.timeout_secs))
        .build()?;
    let upstream = UpstreamClient::new(
        upstream_client,
        config.upstream.base_url.clone(),
        config.upstream.api_key.clone(),
    );

    let state = AppState {
        config,
        upstream,
        usage,
        snapshot: snapshot_file,
    };

    let served = server::run(state).await;

    // Final flush: cancel the save loop and wait for its shutdown save.
    saver_shutdown.cancel();
    if let Err(e) = saver.await {
        tracing::warn!(error = %e, "Snapshot save task did not shut down cleanly");
    }

    served
}
