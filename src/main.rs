use anyhow::{bail, Context, Result};
use config_manager::SystemConfig;
use job_orchestrator::{ScanService, ScanUpdate};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addresses: Vec<String> = std::env::args().skip(1).collect();
    if addresses.is_empty() {
        bail!("usage: wallet_pulse <wallet-address> [<wallet-address> ...]");
    }

    let config = SystemConfig::load().context("failed to load configuration")?;
    info!("Configuration loaded");

    let service = ScanService::new(config).context("failed to initialize scan service")?;

    let job = service.start_scan(addresses).await?;
    info!("Scan job {} started", job.id);

    let mut updates = service
        .subscribe(job.id)
        .await
        .context("scan finished before the stream could attach")?;

    loop {
        match updates.recv().await {
            Ok(ScanUpdate::Snapshot(snapshot)) => {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                if snapshot.progress == 100 {
                    info!("Scan complete");
                    break;
                }
            }
            Ok(ScanUpdate::Failed(error)) => {
                bail!("scan failed: {:?} - {}", error.code, error.message);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Consumer lagged, {} updates dropped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
