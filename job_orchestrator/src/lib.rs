pub mod retry_queue;
pub mod scanner;
pub mod snapshot;
pub mod upstream;

pub use retry_queue::{QueueOutcome, RetryItem, RetryQueueProcessor};
pub use scanner::{SnapshotEmitter, WalletScanner};
pub use snapshot::{
    ProgressWindow, ScanDiagnostics, ScanError, ScanErrorCode, ScanUpdate, TokenHolding,
    WalletSnapshot, AGGREGATE_ADDRESS,
};
pub use upstream::{LiveUpstream, Upstream};

use config_manager::SystemConfig;
use solana_client::validate_address;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("Solana RPC error: {0}")]
    Solana(String),
    #[error("Price API error: {0}")]
    Gecko(String),
    #[error("Transaction parsing error: {0}")]
    Parse(String),
    #[error("P&L calculation error: {0}")]
    PnL(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Job execution failed: {0}")]
    JobExecution(String),
    #[error("Scan cancelled")]
    Cancelled,
}

impl From<solana_client::SolanaClientError> for OrchestratorError {
    fn from(err: solana_client::SolanaClientError) -> Self {
        match err {
            solana_client::SolanaClientError::InvalidAddress { reason } => {
                OrchestratorError::InvalidAddress(reason)
            }
            solana_client::SolanaClientError::RateLimited { retry_after } => {
                OrchestratorError::RateLimited { retry_after }
            }
            other => OrchestratorError::Solana(other.to_string()),
        }
    }
}

impl From<gecko_client::GeckoClientError> for OrchestratorError {
    fn from(err: gecko_client::GeckoClientError) -> Self {
        OrchestratorError::Gecko(err.to_string())
    }
}

impl From<tx_parser::ParseError> for OrchestratorError {
    fn from(err: tx_parser::ParseError) -> Self {
        OrchestratorError::Parse(err.to_string())
    }
}

impl From<pnl_core::PnLError> for OrchestratorError {
    fn from(err: pnl_core::PnLError) -> Self {
        OrchestratorError::PnL(err.to_string())
    }
}

impl From<config_manager::ConfigurationError> for OrchestratorError {
    fn from(err: config_manager::ConfigurationError) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}

impl From<&OrchestratorError> for ScanError {
    fn from(err: &OrchestratorError) -> Self {
        let code = match err {
            OrchestratorError::InvalidAddress(_) => ScanErrorCode::InvalidArgument,
            OrchestratorError::Cancelled => ScanErrorCode::Cancelled,
            OrchestratorError::Solana(_)
            | OrchestratorError::Gecko(_)
            | OrchestratorError::RateLimited { .. } => ScanErrorCode::UpstreamUnavailable,
            _ => ScanErrorCode::Internal,
        };
        ScanError {
            code,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Handle returned to the caller when a scan starts
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub id: Uuid,
    pub addresses: Vec<String>,
}

struct JobHandle {
    sender: broadcast::Sender<ScanUpdate>,
    cancel: CancellationToken,
}

/// The consumer-facing boundary: start a scan and get a job id back
/// immediately; all snapshots for that job are published on a broadcast
/// channel keyed by the id, ready for a subscription layer to fan out.
pub struct ScanService {
    config: SystemConfig,
    upstream: Arc<dyn Upstream>,
    jobs: Arc<RwLock<HashMap<Uuid, JobHandle>>>,
}

impl ScanService {
    pub fn new(config: SystemConfig) -> Result<Self> {
        let upstream: Arc<dyn Upstream> = Arc::new(LiveUpstream::new(&config)?);
        Ok(Self::with_upstream(config, upstream))
    }

    /// Construct against any upstream implementation (tests use scripted
    /// fakes)
    pub fn with_upstream(config: SystemConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            config,
            upstream,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate the request, register a job and spawn its pipeline.
    /// Returns as soon as the job is registered.
    pub async fn start_scan(&self, addresses: Vec<String>) -> Result<ScanJob> {
        if addresses.is_empty() {
            return Err(OrchestratorError::InvalidAddress(
                "no wallet addresses provided".to_string(),
            ));
        }
        for address in &addresses {
            validate_address(address)?;
        }

        let job_id = Uuid::new_v4();
        let (sender, _) = broadcast::channel(self.config.system.snapshot_channel_capacity);
        let cancel = CancellationToken::new();

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(
                job_id,
                JobHandle {
                    sender: sender.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        info!(
            "Starting scan job {} for {} wallet(s)",
            job_id,
            addresses.len()
        );

        let scanner = WalletScanner::new(&self.config, Arc::clone(&self.upstream));
        let jobs = Arc::clone(&self.jobs);
        let capacity = self.config.system.snapshot_channel_capacity;
        let timeout = Duration::from_millis(self.config.system.emission_timeout_ms);
        let scan_addresses = addresses.clone();

        tokio::spawn(async move {
            let (update_tx, mut update_rx) = mpsc::channel(capacity);
            let emitter = SnapshotEmitter::new(update_tx, timeout);

            let pipeline = async {
                let result = scanner.run(&scan_addresses, &emitter, &cancel).await;
                drop(emitter);
                result
            };

            let forward = async {
                while let Some(update) = update_rx.recv().await {
                    // No live receivers is fine; broadcast drops the update
                    let _ = sender.send(update);
                }
            };

            let (result, _) = tokio::join!(pipeline, forward);

            if let Err(ref e) = result {
                error!("Scan job {} failed: {}", job_id, e);
                let _ = sender.send(ScanUpdate::Failed(ScanError::from(e)));
            }

            jobs.write().await.remove(&job_id);
        });

        Ok(ScanJob { id: job_id, addresses })
    }

    /// Attach to a running job's update stream. None once the job has
    /// finished and unregistered itself.
    pub async fn subscribe(&self, job_id: Uuid) -> Option<broadcast::Receiver<ScanUpdate>> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id).map(|handle| handle.sender.subscribe())
    }

    /// Signal a running job to stop promptly
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let jobs = self.jobs.read().await;
        match jobs.get(&job_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn active_jobs(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_scan_rejects_empty_request() {
        let service = ScanService::with_upstream(
            SystemConfig::default(),
            Arc::new(crate::upstream::test_support::NullUpstream),
        );

        let result = service.start_scan(vec![]).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_start_scan_rejects_malformed_address_before_any_fetch() {
        let service = ScanService::with_upstream(
            SystemConfig::default(),
            Arc::new(crate::upstream::test_support::NullUpstream),
        );

        let result = service.start_scan(vec!["not-an-address!!".to_string()]).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidAddress(_))));
        assert_eq!(service.active_jobs().await, 0);
    }

    #[test]
    fn test_stream_error_codes() {
        let err = OrchestratorError::InvalidAddress("bad".to_string());
        assert_eq!(ScanError::from(&err).code, ScanErrorCode::InvalidArgument);

        let err = OrchestratorError::Solana("boom".to_string());
        assert_eq!(ScanError::from(&err).code, ScanErrorCode::UpstreamUnavailable);

        let err = OrchestratorError::Cancelled;
        assert_eq!(ScanError::from(&err).code, ScanErrorCode::Cancelled);

        let err = OrchestratorError::JobExecution("boom".to_string());
        assert_eq!(ScanError::from(&err).code, ScanErrorCode::Internal);
    }

    #[test]
    fn test_rate_limit_preserved_through_error_conversion() {
        let err: OrchestratorError = solana_client::SolanaClientError::RateLimited {
            retry_after: Duration::from_secs(2),
        }
        .into();

        assert!(matches!(
            err,
            OrchestratorError::RateLimited { retry_after } if retry_after == Duration::from_secs(2)
        ));
    }
}
