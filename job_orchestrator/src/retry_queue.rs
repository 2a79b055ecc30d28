use crate::upstream::Upstream;
use crate::{OrchestratorError, Result};
use config_manager::RetrySettings;
use solana_client::TransactionDetail;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A pending transaction-detail fetch
#[derive(Debug, Clone)]
pub struct RetryItem {
    pub signature: String,
    pub attempts: u32,
}

impl RetryItem {
    fn new(signature: String) -> Self {
        Self {
            signature,
            attempts: 0,
        }
    }
}

/// What a drained queue produced
#[derive(Debug, Clone, Default)]
pub struct QueueOutcome {
    /// Details fetched, parsed and handed to the consumer
    pub successful: usize,
    /// Signatures excluded permanently: failed on chain, unknown to the
    /// provider, or out of retry budget
    pub failed: Vec<String>,
}

/// FIFO processor for the transaction-detail stage, the one upstream class
/// with strict rate limits.
///
/// Completed details are pushed onto `completed` as they arrive so the
/// driver can fold them into the snapshot and advance progress per item.
/// Rate-limit signals sleep for the provider-specified delay and requeue at
/// the tail without consuming retry budget; transient failures requeue with
/// a fixed delay until the per-item budget runs out; a 200-status body that
/// wraps a failed on-chain transaction is terminal and never requeued.
#[derive(Debug, Clone)]
pub struct RetryQueueProcessor {
    max_attempts: u32,
    transient_delay: Duration,
}

impl RetryQueueProcessor {
    pub fn new(retry: &RetrySettings) -> Self {
        Self {
            max_attempts: retry.queue_max_attempts,
            transient_delay: Duration::from_millis(retry.queue_transient_delay_ms),
        }
    }

    pub async fn drain(
        &self,
        upstream: Arc<dyn Upstream>,
        signatures: Vec<String>,
        cancel: CancellationToken,
        completed: mpsc::Sender<TransactionDetail>,
    ) -> Result<QueueOutcome> {
        let total = signatures.len();
        let mut queue: VecDeque<RetryItem> =
            signatures.into_iter().map(RetryItem::new).collect();
        let mut outcome = QueueOutcome::default();

        while let Some(mut item) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            match upstream.get_transaction(&item.signature).await {
                Ok(Some(detail)) if detail.failed_on_chain() => {
                    warn!(
                        "Transaction {} failed on chain, excluding from accounting",
                        item.signature
                    );
                    outcome.failed.push(item.signature);
                }
                Ok(Some(detail)) => {
                    outcome.successful += 1;
                    debug!(
                        "Fetched transaction {} ({}/{})",
                        item.signature, outcome.successful, total
                    );
                    if completed.send(detail).await.is_err() {
                        // Consumer dropped the channel; the scan is over
                        return Err(OrchestratorError::Cancelled);
                    }
                }
                Ok(None) => {
                    warn!(
                        "Provider has no record of transaction {}, excluding",
                        item.signature
                    );
                    outcome.failed.push(item.signature);
                }
                Err(OrchestratorError::RateLimited { retry_after }) => {
                    info!(
                        "Rate limited fetching {}, honoring retry-after of {:?}",
                        item.signature, retry_after
                    );
                    self.sleep_or_cancel(retry_after, &cancel).await?;
                    queue.push_back(item);
                }
                Err(e) => {
                    item.attempts += 1;
                    if item.attempts > self.max_attempts {
                        warn!(
                            "Transaction {} failed {} times, excluding permanently: {}",
                            item.signature, item.attempts, e
                        );
                        outcome.failed.push(item.signature);
                    } else {
                        debug!(
                            "Transient failure fetching {} (attempt {}/{}): {}",
                            item.signature, item.attempts, self.max_attempts, e
                        );
                        self.sleep_or_cancel(self.transient_delay, &cancel).await?;
                        queue.push_back(item);
                    }
                }
            }
        }

        info!(
            "Retry queue drained: {}/{} successful, {} excluded",
            outcome.successful,
            total,
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn sleep_or_cancel(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pnl_core::PriceSeries;
    use rust_decimal::Decimal;
    use solana_client::{SignatureInfo, TokenAccount, TokenMetadata};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// One scripted response per fetch attempt, consumed front to back
    enum Scripted {
        Ok(serde_json::Value),
        NotFound,
        RateLimited(u64),
        Transient,
    }

    struct ScriptedUpstream {
        responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
        fetch_counts: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedUpstream {
        fn new(scripts: Vec<(&str, Vec<Scripted>)>) -> Self {
            Self {
                responses: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|(sig, responses)| (sig.to_string(), responses.into()))
                        .collect(),
                ),
                fetch_counts: Mutex::new(HashMap::new()),
            }
        }

        fn fetch_count(&self, signature: &str) -> usize {
            self.fetch_counts
                .lock()
                .unwrap()
                .get(signature)
                .copied()
                .unwrap_or(0)
        }
    }

    fn detail_json(signature: &str, failed: bool) -> serde_json::Value {
        serde_json::json!({
            "blockTime": 1700000000,
            "slot": 1,
            "meta": {
                "err": if failed { serde_json::json!({"InstructionError": [0, "Custom"]}) } else { serde_json::Value::Null },
                "fee": 5000
            },
            "transaction": {
                "message": {"accountKeys": [], "instructions": []},
                "signatures": [signature]
            }
        })
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn get_balance(&self, _address: &str) -> Result<Decimal> {
            unimplemented!("not exercised by queue tests")
        }
        async fn get_sol_price(&self) -> Result<Decimal> {
            unimplemented!("not exercised by queue tests")
        }
        async fn get_token_accounts(&self, _address: &str) -> Result<Vec<TokenAccount>> {
            unimplemented!("not exercised by queue tests")
        }
        async fn get_token_metadata(&self, _mint: &str) -> Result<TokenMetadata> {
            unimplemented!("not exercised by queue tests")
        }
        async fn get_pool(&self, _mint: &str) -> Result<String> {
            unimplemented!("not exercised by queue tests")
        }
        async fn get_price_history(&self, _pool: &str) -> Result<Arc<PriceSeries>> {
            unimplemented!("not exercised by queue tests")
        }
        async fn get_token_price(&self, _mint: &str) -> Result<Decimal> {
            unimplemented!("not exercised by queue tests")
        }
        async fn list_signatures(&self, _address: &str) -> Result<Vec<SignatureInfo>> {
            unimplemented!("not exercised by queue tests")
        }

        async fn get_transaction(
            &self,
            signature: &str,
        ) -> Result<Option<TransactionDetail>> {
            *self
                .fetch_counts
                .lock()
                .unwrap()
                .entry(signature.to_string())
                .or_insert(0) += 1;

            let next = self
                .responses
                .lock()
                .unwrap()
                .get_mut(signature)
                .and_then(|queue| queue.pop_front());

            match next {
                Some(Scripted::Ok(value)) => {
                    Ok(Some(serde_json::from_value(value).unwrap()))
                }
                Some(Scripted::NotFound) | None => Ok(None),
                Some(Scripted::RateLimited(seconds)) => Err(OrchestratorError::RateLimited {
                    retry_after: Duration::from_secs(seconds),
                }),
                Some(Scripted::Transient) => {
                    Err(OrchestratorError::Solana("connection reset".to_string()))
                }
            }
        }
    }

    fn fast_processor(max_attempts: u32) -> RetryQueueProcessor {
        RetryQueueProcessor {
            max_attempts,
            transient_delay: Duration::from_millis(1),
        }
    }

    async fn run_queue(
        processor: &RetryQueueProcessor,
        upstream: Arc<ScriptedUpstream>,
        signatures: &[&str],
    ) -> (QueueOutcome, Vec<String>) {
        let (tx, mut rx) = mpsc::channel(64);
        let drain = processor.drain(
            upstream,
            signatures.iter().map(|s| s.to_string()).collect(),
            CancellationToken::new(),
            tx,
        );

        let collector = async {
            let mut seen = Vec::new();
            while let Some(detail) = rx.recv().await {
                seen.push(detail.signature().unwrap_or_default().to_string());
            }
            seen
        };

        let (outcome, seen) = tokio::join!(drain, collector);
        (outcome.unwrap(), seen)
    }

    #[tokio::test]
    async fn test_clean_queue_drains_in_order() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![
            ("sig-a", vec![Scripted::Ok(detail_json("sig-a", false))]),
            ("sig-b", vec![Scripted::Ok(detail_json("sig-b", false))]),
        ]));

        let (outcome, seen) = run_queue(&fast_processor(3), upstream, &["sig-a", "sig-b"]).await;

        assert_eq!(outcome.successful, 2);
        assert!(outcome.failed.is_empty());
        assert_eq!(seen, vec!["sig-a", "sig-b"]);
    }

    #[tokio::test]
    async fn test_rate_limited_item_requeues_then_succeeds() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![(
            "sig-a",
            vec![
                Scripted::RateLimited(0),
                Scripted::Ok(detail_json("sig-a", false)),
            ],
        )]));

        let (outcome, seen) =
            run_queue(&fast_processor(3), Arc::clone(&upstream), &["sig-a"]).await;

        assert_eq!(outcome.successful, 1);
        assert!(outcome.failed.is_empty());
        assert_eq!(seen, vec!["sig-a"]);
        assert_eq!(upstream.fetch_count("sig-a"), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_consume_retry_budget() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![(
            "sig-a",
            vec![
                Scripted::RateLimited(0),
                Scripted::RateLimited(0),
                Scripted::RateLimited(0),
                Scripted::Ok(detail_json("sig-a", false)),
            ],
        )]));

        // max_attempts 1: three rate limits would exhaust any budget that
        // counted them
        let (outcome, _) = run_queue(&fast_processor(1), upstream, &["sig-a"]).await;
        assert_eq!(outcome.successful, 1);
    }

    #[tokio::test]
    async fn test_failed_on_chain_is_terminal_not_requeued() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![(
            "sig-a",
            vec![Scripted::Ok(detail_json("sig-a", true))],
        )]));

        let (outcome, seen) =
            run_queue(&fast_processor(3), Arc::clone(&upstream), &["sig-a"]).await;

        assert_eq!(outcome.successful, 0);
        assert_eq!(outcome.failed, vec!["sig-a"]);
        assert!(seen.is_empty());
        assert_eq!(upstream.fetch_count("sig-a"), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_budget() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![(
            "sig-a",
            vec![
                Scripted::Transient,
                Scripted::Transient,
                Scripted::Transient,
            ],
        )]));

        let (outcome, _) = run_queue(&fast_processor(2), Arc::clone(&upstream), &["sig-a"]).await;

        assert_eq!(outcome.successful, 0);
        assert_eq!(outcome.failed, vec!["sig-a"]);
        // initial attempt + 2 retries
        assert_eq!(upstream.fetch_count("sig-a"), 3);
    }

    #[tokio::test]
    async fn test_unknown_signature_excluded() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![("sig-a", vec![Scripted::NotFound])]));

        let (outcome, _) = run_queue(&fast_processor(3), upstream, &["sig-a"]).await;
        assert_eq!(outcome.failed, vec!["sig-a"]);
    }

    #[tokio::test]
    async fn test_failing_item_does_not_block_rest_of_queue() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![
            ("sig-bad", vec![Scripted::Transient, Scripted::Transient]),
            ("sig-good", vec![Scripted::Ok(detail_json("sig-good", false))]),
        ]));

        let (outcome, seen) =
            run_queue(&fast_processor(1), upstream, &["sig-bad", "sig-good"]).await;

        assert_eq!(outcome.successful, 1);
        assert_eq!(outcome.failed, vec!["sig-bad"]);
        // the good item completed while the bad one was cycling
        assert_eq!(seen, vec!["sig-good"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_drain() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![(
            "sig-a",
            vec![Scripted::Ok(detail_json("sig-a", false))],
        )]));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, _rx) = mpsc::channel(4);
        let result = fast_processor(3)
            .drain(upstream, vec!["sig-a".to_string()], cancel, tx)
            .await;

        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    }
}
