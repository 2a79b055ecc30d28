pub mod price_cache;
pub mod types;

pub use price_cache::{CacheKey, PriceHistoryCache};

use config_manager::GeckoConfig;
use pnl_core::{PricePoint, PriceSeries};
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use types::{OhlcvResponse, PoolsResponse, SimplePriceResponse, TokenPriceResponse};

#[derive(Error, Debug)]
pub enum GeckoClientError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("Price not found in response for {0}")]
    MissingPrice(String),
    #[error("No liquidity pools listed for token {0}")]
    NoPools(String),
}

pub type Result<T> = std::result::Result<T, GeckoClientError>;

/// Typed client for the CoinGecko / GeckoTerminal price endpoints. No
/// internal retries and no shared-state mutation; the historical price
/// cache sits in front of `get_ohlcv` at the call site.
#[derive(Clone)]
pub struct GeckoClient {
    config: GeckoConfig,
    http_client: Client,
}

impl GeckoClient {
    pub fn new(config: GeckoConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Current USD spot price of SOL from CoinGecko
    pub async fn get_sol_price(&self) -> Result<Decimal> {
        let url = format!(
            "{}/simple/price?ids=solana&vs_currencies=usd",
            self.config.price_api_url
        );
        let response: SimplePriceResponse = self.get_json(&url).await?;

        let price = response
            .get("solana")
            .and_then(|prices| prices.get("usd"))
            .copied()
            .ok_or_else(|| GeckoClientError::MissingPrice("solana".to_string()))?;

        Decimal::try_from(price).map_err(|_| GeckoClientError::MissingPrice("solana".to_string()))
    }

    /// Current USD spot prices for a set of token mints, batched at the
    /// configured size. Tokens the provider does not price default to zero.
    pub async fn get_token_prices(&self, mints: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut result = HashMap::new();

        for batch in mints.chunks(self.config.price_batch_size.max(1)) {
            let url = format!(
                "{}/simple/networks/solana/token_price/{}",
                self.config.terminal_api_url,
                batch.join(",")
            );
            debug!("Fetching token prices: {}", url);

            let response: TokenPriceResponse = self.get_json(&url).await?;
            let prices = response.data.attributes.token_prices;

            for mint in batch {
                let price = prices
                    .get(mint)
                    .and_then(|raw| raw.parse::<Decimal>().ok())
                    .unwrap_or_else(|| {
                        debug!("No spot price listed for {}, defaulting to 0", mint);
                        Decimal::ZERO
                    });
                result.insert(mint.clone(), price);
            }
        }

        Ok(result)
    }

    /// Current USD spot price for a single token mint
    pub async fn get_token_price(&self, mint: &str) -> Result<Decimal> {
        let mints = [mint.to_string()];
        let prices = self.get_token_prices(&mints).await?;
        prices
            .get(mint)
            .copied()
            .ok_or_else(|| GeckoClientError::MissingPrice(mint.to_string()))
    }

    /// Address of the token's top liquidity pool, the source of its
    /// historical series
    pub async fn get_pool(&self, mint: &str) -> Result<String> {
        let url = format!(
            "{}/networks/solana/tokens/{}/pools?page=1",
            self.config.terminal_api_url, mint
        );
        let response: PoolsResponse = self.get_json(&url).await?;

        response
            .data
            .first()
            .map(|pool| pool.attributes.address.clone())
            .ok_or_else(|| GeckoClientError::NoPools(mint.to_string()))
    }

    /// Historical OHLCV series for a pool at the given resolution
    pub async fn get_ohlcv(&self, pool: &str, timeframe: &str) -> Result<PriceSeries> {
        let url = format!(
            "{}/networks/solana/pools/{}/ohlcv/{}?currency=usd",
            self.config.terminal_api_url, pool, timeframe
        );
        let response: OhlcvResponse = self.get_json(&url).await?;

        Ok(parse_ohlcv_rows(
            pool,
            &response.data.attributes.ohlcv_list,
        ))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeckoClientError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Convert raw `[timestamp, open, high, low, close, volume]` rows into a
/// series, skipping malformed rows rather than failing the whole fetch.
fn parse_ohlcv_rows(pool: &str, rows: &[Vec<f64>]) -> PriceSeries {
    let mut points = Vec::with_capacity(rows.len());

    for row in rows {
        if row.len() < 6 {
            warn!(
                "Skipping malformed OHLCV row for pool {} ({} columns)",
                pool,
                row.len()
            );
            continue;
        }
        points.push(PricePoint {
            timestamp: row[0] as i64,
            open: row[1],
            high: row[2],
            low: row[3],
            close: row[4],
            volume: row[5],
        });
    }

    PriceSeries::new(points)
}
