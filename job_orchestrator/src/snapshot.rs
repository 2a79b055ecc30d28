use chrono::{DateTime, Utc};
use pnl_core::{PriceSeries, TransactionRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_client::WRAPPED_SOL_MINT;

/// Synthetic address marker for a multi-wallet aggregate snapshot
pub const AGGREGATE_ADDRESS: &str = "aggregate";

/// One token's derived metrics inside a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenHolding {
    pub mint: String,
    pub name: String,
    pub description: String,
    pub image: String,
    /// Liquidity pool the historical series was sourced from
    pub pool: String,
    pub amount: Decimal,
    pub price: Decimal,
    /// amount * price at computation time
    pub value: Decimal,
    /// avg cost basis * amount
    pub invested: Decimal,
    /// value - invested
    pub pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub history_prices: PriceSeries,
}

/// Signatures and mints excluded from the scan, surfaced to the caller
/// instead of silently looping or aborting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScanDiagnostics {
    /// Token mints whose processing failed and was skipped
    pub skipped_tokens: Vec<String>,
    /// Signatures that exhausted retries or failed on chain
    pub failed_signatures: Vec<String>,
    /// Signatures fetched successfully but unparseable
    pub skipped_transactions: Vec<String>,
}

/// The unit streamed to the caller. Mutated in place and re-emitted as each
/// stage completes; every emission carries the entire accumulated state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletSnapshot {
    pub address: String,
    pub sol_balance: Decimal,
    pub sol_value: Decimal,
    /// sol_value plus the value of all token holdings
    pub wallet_value: Decimal,
    pub tokens: Vec<TokenHolding>,
    pub transactions: Vec<TransactionRecord>,
    /// 0-100, non-decreasing across one request's emissions
    pub progress: u8,
    pub last_updated: DateTime<Utc>,
    pub diagnostics: ScanDiagnostics,
}

impl WalletSnapshot {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            sol_balance: Decimal::ZERO,
            sol_value: Decimal::ZERO,
            wallet_value: Decimal::ZERO,
            tokens: Vec::new(),
            transactions: Vec::new(),
            progress: 0,
            last_updated: Utc::now(),
            diagnostics: ScanDiagnostics::default(),
        }
    }

    /// Raise progress to `progress`, never lowering it
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.last_updated = Utc::now();
    }

    /// Add a holding, merging by mint so a multi-wallet aggregate carries a
    /// single entry per token
    pub fn add_holding(&mut self, holding: TokenHolding) {
        if let Some(existing) = self.tokens.iter_mut().find(|t| t.mint == holding.mint) {
            existing.amount += holding.amount;
            existing.value = existing.amount * existing.price;
            if existing.history_prices.is_empty() {
                existing.history_prices = holding.history_prices;
            }
        } else {
            self.tokens.push(holding);
        }
        self.recompute_value();
    }

    /// Recompute the total wallet value. The native-SOL pseudo-holding is
    /// already counted through `sol_value`, so it is excluded from the
    /// token sum.
    pub fn recompute_value(&mut self) {
        let token_value: Decimal = self
            .tokens
            .iter()
            .filter(|t| t.mint != WRAPPED_SOL_MINT)
            .map(|t| t.value)
            .sum();
        self.wallet_value = self.sol_value + token_value;
    }
}

/// Structured stream-terminating error (status code + message)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanError {
    pub code: ScanErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanErrorCode {
    InvalidArgument,
    UpstreamUnavailable,
    Cancelled,
    Internal,
}

/// One item on a scan's update stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanUpdate {
    Snapshot(WalletSnapshot),
    Failed(ScanError),
}

impl ScanUpdate {
    pub fn progress(&self) -> Option<u8> {
        match self {
            ScanUpdate::Snapshot(snapshot) => Some(snapshot.progress),
            ScanUpdate::Failed(_) => None,
        }
    }
}

/// Maps a pipeline stage's 0-100 progress into this wallet's share of a
/// multi-wallet request, keeping the overall sequence monotone.
#[derive(Debug, Clone, Copy)]
pub struct ProgressWindow {
    base: u8,
    span: u8,
}

impl ProgressWindow {
    pub fn full() -> Self {
        Self { base: 0, span: 100 }
    }

    /// Window for wallet `index` of `count`, each taking an equal share
    pub fn for_wallet(index: usize, count: usize) -> Self {
        let count = count.max(1) as u32;
        let index = (index as u32).min(count - 1);
        let base = (index * 100 / count) as u8;
        let end = ((index + 1) * 100 / count) as u8;
        Self {
            base,
            span: end - base,
        }
    }

    /// Overall progress for a stage value within this window
    pub fn at(&self, stage_progress: u8) -> u8 {
        self.base + (stage_progress.min(100) as u32 * self.span as u32 / 100) as u8
    }
}
