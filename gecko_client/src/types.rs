//! Serde models for the CoinGecko / GeckoTerminal response shapes.

use serde::Deserialize;
use std::collections::HashMap;

/// CoinGecko /simple/price: {"solana": {"usd": <price>}}
pub type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

// --- GeckoTerminal batched token prices ---

#[derive(Debug, Deserialize)]
pub struct TokenPriceResponse {
    pub data: TokenPriceData,
}

#[derive(Debug, Deserialize)]
pub struct TokenPriceData {
    pub id: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub attributes: TokenPriceAttributes,
}

#[derive(Debug, Deserialize)]
pub struct TokenPriceAttributes {
    pub token_prices: HashMap<String, String>,
}

// --- GeckoTerminal pools for a token ---

#[derive(Debug, Deserialize)]
pub struct PoolsResponse {
    #[serde(default)]
    pub data: Vec<Pool>,
}

#[derive(Debug, Deserialize)]
pub struct Pool {
    pub id: String,
    #[serde(rename = "type")]
    pub pool_type: String,
    pub attributes: PoolAttributes,
}

#[derive(Debug, Deserialize)]
pub struct PoolAttributes {
    pub address: String,
    pub name: Option<String>,
    pub base_token_price_usd: Option<String>,
    pub token_price_usd: Option<String>,
    pub reserve_in_usd: Option<String>,
    pub pool_created_at: Option<String>,
}

// --- GeckoTerminal pool OHLCV ---

#[derive(Debug, Deserialize)]
pub struct OhlcvResponse {
    pub data: OhlcvData,
    pub meta: Option<OhlcvMeta>,
}

#[derive(Debug, Deserialize)]
pub struct OhlcvData {
    pub id: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub attributes: OhlcvAttributes,
}

#[derive(Debug, Deserialize)]
pub struct OhlcvAttributes {
    /// Rows ordered [timestamp, open, high, low, close, volume]
    pub ohlcv_list: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
pub struct OhlcvMeta {
    pub base: Option<CoinMeta>,
    pub quote: Option<CoinMeta>,
}

#[derive(Debug, Deserialize)]
pub struct CoinMeta {
    pub address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
}
