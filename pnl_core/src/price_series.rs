use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bucket of a token's historical price series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    /// Bucket timestamp (unix seconds)
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A token's historical price series over a date range, as delivered by the
/// OHLCV upstream (oldest-first not guaranteed; lookups scan the full list).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(points: Vec<PricePoint>) -> Self {
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Price "as of" a target timestamp: the closing price of the point
    /// closest by absolute time difference. Ties resolve to the first point
    /// encountered in series order.
    pub fn price_at(&self, target: i64) -> Option<Decimal> {
        let mut best: Option<(i64, f64)> = None;

        for point in &self.points {
            let diff = (point.timestamp - target).abs();
            match best {
                Some((best_diff, _)) if diff >= best_diff => {}
                _ => best = Some((diff, point.close)),
            }
        }

        best.and_then(|(_, close)| Decimal::try_from(close).ok())
    }
}
