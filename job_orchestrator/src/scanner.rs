use crate::retry_queue::RetryQueueProcessor;
use crate::snapshot::{
    ProgressWindow, ScanUpdate, TokenHolding, WalletSnapshot, AGGREGATE_ADDRESS,
};
use crate::upstream::Upstream;
use crate::{OrchestratorError, Result};
use config_manager::SystemConfig;
use pnl_core::{CostBasisEngine, PriceSeries, TransactionRecord};
use rust_decimal::Decimal;
use solana_client::{validate_address, TokenAccount, WRAPPED_SOL_MINT};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Stage boundaries within one wallet's progress window
const STAGE_BASE_ACCOUNT: u8 = 10;
const STAGE_TOKENS_LISTED: u8 = 20;
const STAGE_TOKENS_DONE: u8 = 60;
const STAGE_SIGNATURES_LISTED: u8 = 70;
const STAGE_COMPLETE: u8 = 100;

/// Pushes snapshot updates onto the job's stream. Intermediate updates wait
/// at most `timeout` on a slow consumer and are then dropped; the terminal
/// update is delivered with a plain send so a slow-but-alive consumer still
/// receives it.
pub struct SnapshotEmitter {
    tx: mpsc::Sender<ScanUpdate>,
    timeout: Duration,
}

impl SnapshotEmitter {
    pub fn new(tx: mpsc::Sender<ScanUpdate>, timeout: Duration) -> Self {
        Self { tx, timeout }
    }

    pub async fn emit(&self, snapshot: &WalletSnapshot) {
        let update = ScanUpdate::Snapshot(snapshot.clone());
        match self.tx.send_timeout(update, self.timeout).await {
            Ok(()) => {}
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(
                    "Snapshot consumer is slow, dropping update at progress {}",
                    snapshot.progress
                );
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                debug!("Snapshot consumer is gone");
            }
        }
    }

    pub async fn emit_final(&self, snapshot: &WalletSnapshot) {
        if self
            .tx
            .send(ScanUpdate::Snapshot(snapshot.clone()))
            .await
            .is_err()
        {
            debug!("Snapshot consumer gone before final emission");
        }
    }
}

/// The staged aggregation pipeline for one scan request. Stages run
/// sequentially; every emission carries the whole accumulated snapshot with
/// a progress value that never decreases.
pub struct WalletScanner {
    upstream: Arc<dyn Upstream>,
    queue: RetryQueueProcessor,
    detail_channel_capacity: usize,
}

impl WalletScanner {
    pub fn new(config: &SystemConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            queue: RetryQueueProcessor::new(&config.retry),
            detail_channel_capacity: config.system.snapshot_channel_capacity,
        }
    }

    /// Run a full scan over one or more wallets, building a single snapshot
    /// (`aggregate` when more than one address is given) and emitting it
    /// after every completed stage. Returns the final snapshot.
    pub async fn run(
        &self,
        addresses: &[String],
        emitter: &SnapshotEmitter,
        cancel: &CancellationToken,
    ) -> Result<WalletSnapshot> {
        if addresses.is_empty() {
            return Err(OrchestratorError::InvalidAddress(
                "no wallet addresses provided".to_string(),
            ));
        }

        // Fail fast on any malformed address before the first upstream call
        for address in addresses {
            validate_address(address)?;
        }

        let label = if addresses.len() == 1 {
            addresses[0].clone()
        } else {
            AGGREGATE_ADDRESS.to_string()
        };
        let owned: HashSet<String> = addresses.iter().cloned().collect();
        let mut snapshot = WalletSnapshot::new(label);

        for (index, wallet) in addresses.iter().enumerate() {
            let window = ProgressWindow::for_wallet(index, addresses.len());
            self.scan_wallet(wallet, &owned, &mut snapshot, window, emitter, cancel)
                .await?;
        }

        snapshot.advance_progress(100);
        emitter.emit_final(&snapshot).await;
        info!(
            "Scan complete for {}: {} tokens, {} transactions, value {}",
            snapshot.address,
            snapshot.tokens.len(),
            snapshot.transactions.len(),
            snapshot.wallet_value
        );

        Ok(snapshot)
    }

    async fn scan_wallet(
        &self,
        wallet: &str,
        owned: &HashSet<String>,
        snapshot: &mut WalletSnapshot,
        window: ProgressWindow,
        emitter: &SnapshotEmitter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Stage 2: base account + native spot price. The balance fetch is
        // required; a failed spot price degrades to zero rather than
        // aborting the scan.
        let balance = self.upstream.get_balance(wallet).await?;
        let sol_price = match self.upstream.get_sol_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!("Failed to fetch SOL spot price: {}", e);
                Decimal::ZERO
            }
        };

        snapshot.sol_balance += balance;
        snapshot.sol_value += balance * sol_price;
        snapshot.recompute_value();
        snapshot.advance_progress(window.at(STAGE_BASE_ACCOUNT));
        emitter.emit(snapshot).await;

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        // Stage 3: token account enumeration (required)
        let token_accounts = self.upstream.get_token_accounts(wallet).await?;
        info!(
            "Wallet {} holds {} token accounts",
            wallet,
            token_accounts.len()
        );
        snapshot.advance_progress(window.at(STAGE_TOKENS_LISTED));
        emitter.emit(snapshot).await;

        // Stage 4: per-token enrichment, apportioned equally per token.
        // A failing token is skipped and recorded, never fatal.
        let token_total = token_accounts.len().max(1);
        let token_span = (STAGE_TOKENS_DONE - STAGE_TOKENS_LISTED) as usize;
        for (index, account) in token_accounts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            match self.process_token(&account).await {
                Ok(holding) => snapshot.add_holding(holding),
                Err(e) => {
                    warn!("Skipping token {}: {}", account.mint, e);
                    snapshot.diagnostics.skipped_tokens.push(account.mint.clone());
                }
            }

            let stage = STAGE_TOKENS_LISTED + ((index + 1) * token_span / token_total) as u8;
            snapshot.advance_progress(window.at(stage));
            emitter.emit(snapshot).await;
        }

        // The native balance rides along as a pseudo-holding after the
        // token loop
        let sol_holding = self.build_sol_holding(balance, sol_price).await;
        snapshot.add_holding(sol_holding);
        snapshot.advance_progress(window.at(STAGE_TOKENS_DONE));
        emitter.emit(snapshot).await;

        // Stage 5: transaction signature listing (required)
        let signatures = self.upstream.list_signatures(wallet).await?;
        info!(
            "Wallet {} has {} transaction signatures",
            wallet,
            signatures.len()
        );
        snapshot.advance_progress(window.at(STAGE_SIGNATURES_LISTED));
        emitter.emit(snapshot).await;

        // Stage 6: detail fetches through the retry queue, progress
        // apportioned by successful count over total
        let total = signatures.len();
        if total > 0 {
            let (detail_tx, mut detail_rx) = mpsc::channel(self.detail_channel_capacity);
            let drain = tokio::spawn({
                let queue = self.queue.clone();
                let upstream = Arc::clone(&self.upstream);
                let sigs: Vec<String> =
                    signatures.iter().map(|info| info.signature.clone()).collect();
                let cancel = cancel.clone();
                async move { queue.drain(upstream, sigs, cancel, detail_tx).await }
            });

            let tx_span = (STAGE_COMPLETE - STAGE_SIGNATURES_LISTED) as usize;
            let mut successful = 0usize;
            while let Some(detail) = detail_rx.recv().await {
                successful += 1;
                match tx_parser::parse_transaction(&detail, wallet, owned) {
                    Ok(records) => snapshot.transactions.extend(records),
                    Err(e) => {
                        let signature = detail.signature().unwrap_or_default().to_string();
                        warn!("Skipping unparseable transaction {}: {}", signature, e);
                        snapshot.diagnostics.skipped_transactions.push(signature);
                    }
                }

                let stage = STAGE_SIGNATURES_LISTED + (successful * tx_span / total) as u8;
                snapshot.advance_progress(window.at(stage));
                emitter.emit(snapshot).await;
            }

            let outcome = drain.await.map_err(|e| {
                OrchestratorError::JobExecution(format!("retry queue task failed: {}", e))
            })??;
            snapshot.diagnostics.failed_signatures.extend(outcome.failed);
        }

        // Stage 7: with the history complete, re-fold every holding's cost
        // basis and finish this wallet's window
        self.recompute_holdings(snapshot);
        snapshot.advance_progress(window.at(STAGE_COMPLETE));
        emitter.emit(snapshot).await;

        Ok(())
    }

    /// Fetch everything one token needs: metadata, pool, historical series
    /// (through the shared cache) and spot price. Cost-basis fields start
    /// at zero and are filled in once transaction history is complete.
    async fn process_token(&self, account: &TokenAccount) -> Result<TokenHolding> {
        let metadata = self.upstream.get_token_metadata(&account.mint).await?;
        let pool = self.upstream.get_pool(&account.mint).await?;
        let history = self.upstream.get_price_history(&pool).await?;
        let price = self.upstream.get_token_price(&account.mint).await?;

        Ok(TokenHolding {
            mint: account.mint.clone(),
            name: metadata.name,
            description: metadata.description,
            image: metadata.image,
            pool,
            amount: account.amount,
            price,
            value: account.amount * price,
            invested: Decimal::ZERO,
            pnl: Decimal::ZERO,
            pnl_percentage: Decimal::ZERO,
            history_prices: (*history).clone(),
        })
    }

    /// Native SOL as a holding. Pool and series are best-effort; the
    /// balance and spot price are already known from stage 2.
    async fn build_sol_holding(&self, balance: Decimal, sol_price: Decimal) -> TokenHolding {
        let (pool, history) = match self.upstream.get_pool(WRAPPED_SOL_MINT).await {
            Ok(pool) => match self.upstream.get_price_history(&pool).await {
                Ok(series) => (pool, (*series).clone()),
                Err(e) => {
                    debug!("No historical series for native SOL: {}", e);
                    (pool, PriceSeries::default())
                }
            },
            Err(e) => {
                debug!("No pool found for native SOL: {}", e);
                (String::new(), PriceSeries::default())
            }
        };

        TokenHolding {
            mint: WRAPPED_SOL_MINT.to_string(),
            name: "SOL".to_string(),
            description: String::new(),
            image: String::new(),
            pool,
            amount: balance,
            price: sol_price,
            value: balance * sol_price,
            invested: Decimal::ZERO,
            pnl: Decimal::ZERO,
            pnl_percentage: Decimal::ZERO,
            history_prices: history,
        }
    }

    /// Average-cost fold over the accumulated records, per held token.
    /// A token whose acquisitions cannot be priced keeps zeroed cost-basis
    /// fields rather than failing the scan.
    fn recompute_holdings(&self, snapshot: &mut WalletSnapshot) {
        let mut records: Vec<TransactionRecord> = snapshot.transactions.clone();
        records.sort_by_key(|record| record.timestamp);

        for holding in &mut snapshot.tokens {
            let token_records: Vec<TransactionRecord> = records
                .iter()
                .filter(|record| record.token_mint == holding.mint)
                .cloned()
                .collect();

            if token_records.is_empty() {
                continue;
            }

            match CostBasisEngine::fold(&token_records, &holding.history_prices) {
                Ok(engine) => {
                    let metrics = engine.metrics(holding.amount, holding.price);
                    holding.invested = metrics.invested;
                    holding.value = metrics.value;
                    holding.pnl = metrics.pnl;
                    holding.pnl_percentage = metrics.pnl_percentage;
                }
                Err(e) => {
                    warn!("Cost basis unavailable for {}: {}", holding.mint, e);
                }
            }
        }

        snapshot.recompute_value();
    }
}
