pub mod cost_basis;
pub mod price_series;

pub use cost_basis::{CostBasisEngine, HoldingMetrics};
pub use price_series::{PricePoint, PriceSeries};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PnLError {
    #[error("No price data available for cost-basis calculation: {0}")]
    MissingPriceData(String),
}

pub type Result<T> = std::result::Result<T, PnLError>;

/// Net effect of a transaction on the wallet's balance of one token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferDirection {
    /// Tokens flowed into the wallet (acquisition)
    Receive,
    /// Tokens flowed out of the wallet (disposal)
    Send,
    /// The transaction touched the wallet without a net token movement
    Unknown,
}

/// Normalized view of one on-chain transaction. Immutable once constructed
/// by the parser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    /// Transaction signature
    pub signature: String,

    /// Net-effect classification for the target wallet
    pub direction: TransferDirection,

    /// Set when the transaction moves value between addresses the caller
    /// owns; such records are excluded from external buy/sell accounting
    pub is_internal: bool,

    /// Block time of the transaction
    pub timestamp: DateTime<Utc>,

    /// Mint of the token that moved
    pub token_mint: String,

    /// Absolute amount moved (ui units)
    pub amount: Decimal,
}
