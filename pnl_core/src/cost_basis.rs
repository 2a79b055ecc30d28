use crate::{PnLError, PriceSeries, Result, TransactionRecord, TransferDirection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Derived metrics for one held token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldingMetrics {
    /// Average acquisition price per unit
    pub avg_cost_basis: Decimal,
    /// Cost basis of the currently held amount
    pub invested: Decimal,
    /// Current value of the held amount
    pub value: Decimal,
    /// value - invested
    pub pnl: Decimal,
    /// pnl / invested * 100 (zero when nothing was invested)
    pub pnl_percentage: Decimal,
}

/// Average-cost cost-basis accumulator.
///
/// Folds a token's chronological transaction list (oldest first) into the
/// running held amount and cost basis. Disposals remove cost at the average
/// acquisition price of the remaining position - this is average-cost
/// accounting, not FIFO.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostBasisEngine {
    total_amount_held: Decimal,
    total_cost_basis: Decimal,
}

impl CostBasisEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a chronological record list with prices resolved from the
    /// token's historical series at each transaction time.
    pub fn fold(records: &[TransactionRecord], series: &PriceSeries) -> Result<Self> {
        let mut engine = Self::new();

        for record in records {
            if record.is_internal {
                debug!(
                    "Skipping internal transfer {} in cost-basis fold",
                    record.signature
                );
                continue;
            }

            match record.direction {
                TransferDirection::Receive => {
                    let price = series.price_at(record.timestamp.timestamp()).ok_or_else(|| {
                        PnLError::MissingPriceData(record.token_mint.clone())
                    })?;
                    engine.apply_receive(record.amount, price);
                }
                TransferDirection::Send => {
                    engine.apply_send(record.amount);
                }
                TransferDirection::Unknown => {}
            }
        }

        Ok(engine)
    }

    /// Acquisition: the position grows and its cost basis grows by the
    /// acquisition value at the transaction-time price.
    pub fn apply_receive(&mut self, amount: Decimal, price_at_tx: Decimal) {
        self.total_amount_held += amount;
        self.total_cost_basis += amount * price_at_tx;
    }

    /// Disposal: cost is removed at the current average cost per unit.
    /// With nothing held there is no cost to remove.
    pub fn apply_send(&mut self, amount: Decimal) {
        if self.total_amount_held > Decimal::ZERO {
            let cost_per_unit = self.total_cost_basis / self.total_amount_held;
            self.total_cost_basis -= amount * cost_per_unit;
            self.total_amount_held -= amount;
        }
    }

    pub fn total_amount_held(&self) -> Decimal {
        self.total_amount_held
    }

    pub fn total_cost_basis(&self) -> Decimal {
        self.total_cost_basis
    }

    pub fn avg_cost_basis(&self) -> Decimal {
        if self.total_amount_held > Decimal::ZERO {
            self.total_cost_basis / self.total_amount_held
        } else {
            Decimal::ZERO
        }
    }

    /// Derive holding metrics against the wallet's current on-chain balance
    /// and the current spot price.
    pub fn metrics(&self, current_balance: Decimal, current_price: Decimal) -> HoldingMetrics {
        let avg_cost_basis = self.avg_cost_basis();
        let invested = current_balance * avg_cost_basis;
        let value = current_balance * current_price;
        let pnl = value - invested;
        let pnl_percentage = if invested > Decimal::ZERO {
            pnl / invested * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        HoldingMetrics {
            avg_cost_basis,
            invested,
            value,
            pnl,
            pnl_percentage,
        }
    }
}
