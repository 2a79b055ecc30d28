use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use config_manager::SystemConfig;
use gecko_client::{CacheKey, GeckoClient, PriceHistoryCache};
use pnl_core::PriceSeries;
use rust_decimal::Decimal;
use solana_client::{
    SignatureInfo, SolanaRpcClient, TokenAccount, TokenMetadata, TransactionDetail,
};
use std::sync::Arc;

/// The upstream data surface the pipeline consumes. One live implementation
/// bundles the Solana RPC and price API clients; tests substitute scripted
/// fakes.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get_balance(&self, address: &str) -> Result<Decimal>;
    async fn get_sol_price(&self) -> Result<Decimal>;
    async fn get_token_accounts(&self, address: &str) -> Result<Vec<TokenAccount>>;
    async fn get_token_metadata(&self, mint: &str) -> Result<TokenMetadata>;
    async fn get_pool(&self, mint: &str) -> Result<String>;
    async fn get_price_history(&self, pool: &str) -> Result<Arc<PriceSeries>>;
    async fn get_token_price(&self, mint: &str) -> Result<Decimal>;
    async fn list_signatures(&self, address: &str) -> Result<Vec<SignatureInfo>>;
    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionDetail>>;
}

/// Production upstream: Solana RPC + Gecko price APIs, with the shared
/// historical price cache in front of OHLCV fetches.
pub struct LiveUpstream {
    solana: SolanaRpcClient,
    gecko: GeckoClient,
    cache: Arc<PriceHistoryCache>,
    ohlcv_timeframe: String,
}

impl LiveUpstream {
    pub fn new(config: &SystemConfig) -> Result<Self> {
        let solana = SolanaRpcClient::new(config.solana.clone(), &config.retry)?;
        let gecko = GeckoClient::new(config.gecko.clone())?;
        let cache = Arc::new(PriceHistoryCache::from_config(&config.cache));

        Ok(Self {
            solana,
            gecko,
            cache,
            ohlcv_timeframe: config.gecko.ohlcv_timeframe.clone(),
        })
    }

    /// Share one cache across several upstream instances
    pub fn with_cache(config: &SystemConfig, cache: Arc<PriceHistoryCache>) -> Result<Self> {
        let mut upstream = Self::new(config)?;
        upstream.cache = cache;
        Ok(upstream)
    }
}

#[async_trait]
impl Upstream for LiveUpstream {
    async fn get_balance(&self, address: &str) -> Result<Decimal> {
        Ok(self.solana.get_balance(address).await?)
    }

    async fn get_sol_price(&self) -> Result<Decimal> {
        Ok(self.gecko.get_sol_price().await?)
    }

    async fn get_token_accounts(&self, address: &str) -> Result<Vec<TokenAccount>> {
        Ok(self.solana.get_token_accounts(address).await?)
    }

    async fn get_token_metadata(&self, mint: &str) -> Result<TokenMetadata> {
        Ok(self.solana.get_token_metadata(mint).await?)
    }

    async fn get_pool(&self, mint: &str) -> Result<String> {
        Ok(self.gecko.get_pool(mint).await?)
    }

    async fn get_price_history(&self, pool: &str) -> Result<Arc<PriceSeries>> {
        let key = CacheKey::new(pool, Utc::now().date_naive(), &self.ohlcv_timeframe);
        let gecko = self.gecko.clone();
        let pool = pool.to_string();
        let timeframe = self.ohlcv_timeframe.clone();

        let series = self
            .cache
            .get_or_fetch(key, move || async move {
                gecko.get_ohlcv(&pool, &timeframe).await
            })
            .await?;

        Ok(series)
    }

    async fn get_token_price(&self, mint: &str) -> Result<Decimal> {
        Ok(self.gecko.get_token_price(mint).await?)
    }

    async fn list_signatures(&self, address: &str) -> Result<Vec<SignatureInfo>> {
        Ok(self.solana.list_signatures(address).await?)
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionDetail>> {
        Ok(self.solana.get_transaction(signature).await?)
    }
}

impl std::fmt::Debug for LiveUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpstream")
            .field("ohlcv_timeframe", &self.ohlcv_timeframe)
            .finish()
    }
}
