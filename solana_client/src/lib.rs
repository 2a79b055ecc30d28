pub mod address;
pub mod types;

pub use address::{validate_address, PUBKEY_LENGTH};
pub use types::{
    SignatureInfo, TokenAccount, TokenMetadata, TransactionDetail, TransactionTokenBalance,
};

use config_manager::{RetrySettings, SolanaConfig};
use reqwest::Client;
use retry_utils::{retry_with_backoff, RetryConfig, RetryKind};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use types::{AssetResult, BalanceResult, RpcResponse, TokenAccountsResult};

/// SPL token program, the fixed filter for token-account enumeration
pub const SPL_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Wrapped-SOL mint, used where the native asset needs a token identity
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

#[derive(Error, Debug)]
pub enum SolanaClientError {
    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

pub type Result<T> = std::result::Result<T, SolanaClientError>;

/// Typed client for the Solana JSON-RPC endpoints the pipeline consumes.
/// No internal retries except for the transaction-detail fetch, whose
/// transient network failures get a bounded backoff; rate-limit signals
/// always surface to the caller.
#[derive(Clone)]
pub struct SolanaRpcClient {
    config: SolanaConfig,
    fetch_retry: RetryConfig,
    http_client: Client,
    request_id: Arc<AtomicU64>,
}

impl SolanaRpcClient {
    pub fn new(config: SolanaConfig, retry: &RetrySettings) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            fetch_retry: RetryConfig {
                max_attempts: retry.fetch_max_attempts,
                delays_ms: retry.fetch_delays_ms.clone(),
            },
            http_client,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// SOL balance for an address (lamports converted at 1e9)
    pub async fn get_balance(&self, address: &str) -> Result<Decimal> {
        let response = self.rpc_request("getBalance", json!([address])).await?;
        let result: BalanceResult = Self::unwrap_result(response)?;

        let balance = Decimal::from(result.value) / Decimal::from(LAMPORTS_PER_SOL);
        debug!("Balance for {}: {} SOL", address, balance);
        Ok(balance)
    }

    /// All SPL token accounts with balances for an address
    pub async fn get_token_accounts(&self, address: &str) -> Result<Vec<TokenAccount>> {
        let params = json!([
            address,
            { "programId": SPL_TOKEN_PROGRAM },
            { "encoding": "jsonParsed" },
        ]);

        let response = self.rpc_request("getTokenAccountsByOwner", params).await?;
        let result: TokenAccountsResult = Self::unwrap_result(response)?;

        let accounts = result
            .value
            .into_iter()
            .map(|entry| {
                let info = entry.account.data.parsed.info;
                TokenAccount {
                    mint: info.mint,
                    amount: info
                        .token_amount
                        .ui_amount
                        .and_then(|v| Decimal::try_from(v).ok())
                        .unwrap_or(Decimal::ZERO),
                    decimals: info.token_amount.decimals,
                    token_account: entry.pubkey,
                }
            })
            .collect::<Vec<_>>();

        debug!("Found {} token accounts for {}", accounts.len(), address);
        Ok(accounts)
    }

    /// Token metadata (name, symbol, description, image) via getAsset
    pub async fn get_token_metadata(&self, mint: &str) -> Result<TokenMetadata> {
        let response = self.rpc_request("getAsset", json!([mint])).await?;
        let asset: AssetResult = Self::unwrap_result(response)?;

        let mut metadata = TokenMetadata {
            mint: asset.id,
            ..TokenMetadata::default()
        };

        if let Some(content) = asset.content {
            if let Some(fields) = content.metadata {
                metadata.name = fields.name.unwrap_or_default();
                metadata.symbol = fields.symbol.unwrap_or_default();
                metadata.description = fields.description.unwrap_or_default();
            }
            if let Some(links) = content.links {
                metadata.image = links.image.unwrap_or_default();
            }
        }

        Ok(metadata)
    }

    /// All transaction signatures for an address, paged with a `before`
    /// cursor until the history is exhausted or `max_signatures` is hit.
    pub async fn list_signatures(&self, address: &str) -> Result<Vec<SignatureInfo>> {
        let page_size = self.config.signature_page_size;
        let max_signatures = self.config.max_signatures as usize;
        let mut results: Vec<SignatureInfo> = Vec::new();
        let mut before: Option<String> = None;

        loop {
            let mut options = serde_json::Map::new();
            options.insert("limit".to_string(), json!(page_size));
            if let Some(ref cursor) = before {
                options.insert("before".to_string(), json!(cursor));
            }

            let response = self
                .rpc_request("getSignaturesForAddress", json!([address, options]))
                .await?;
            let page: Vec<SignatureInfo> = Self::unwrap_result(response)?;

            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            before = page.last().map(|info| info.signature.clone());
            results.extend(page);

            if max_signatures > 0 && results.len() >= max_signatures {
                results.truncate(max_signatures);
                info!(
                    "Signature listing for {} truncated to {} entries",
                    address, max_signatures
                );
                break;
            }

            if page_len < page_size as usize {
                break;
            }
        }

        debug!("Collected {} signatures for {}", results.len(), address);
        Ok(results)
    }

    /// Transaction detail for one signature ("json" encoding, account keys
    /// as strings, instruction account references by index). Transient
    /// network failures are retried with a bounded backoff; rate-limit
    /// signals surface immediately so the retry queue can honor the
    /// provider delay. Returns None when the provider has no record of the
    /// signature.
    pub async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionDetail>> {
        retry_with_backoff(
            || self.get_transaction_once(signature),
            &self.fetch_retry,
            classify_for_retry,
        )
        .await
    }

    async fn get_transaction_once(&self, signature: &str) -> Result<Option<TransactionDetail>> {
        let params = json!([
            signature,
            { "encoding": "json", "maxSupportedTransactionVersion": 0 },
        ]);

        let response = self.rpc_request("getTransaction", params).await?;

        match response.result {
            Some(value) if !value.is_null() => {
                let detail: TransactionDetail = serde_json::from_value(value)?;
                Ok(Some(detail))
            }
            _ => {
                if let Some(error) = response.error {
                    return Err(SolanaClientError::Rpc {
                        code: error.code,
                        message: error.message,
                    });
                }
                warn!("No transaction data returned for signature {}", signature);
                Ok(None)
            }
        }
    }

    async fn rpc_request(&self, method: &str, params: Value) -> Result<RpcResponse<Value>> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(&self.config.rpc_url)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if let Some(retry_after) = parse_retry_after(response.headers()) {
                return Err(SolanaClientError::RateLimited { retry_after });
            }
            let body = response.text().await.unwrap_or_default();
            return Err(SolanaClientError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    fn unwrap_result<T: serde::de::DeserializeOwned>(response: RpcResponse<Value>) -> Result<T> {
        match response.result {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => {
                let error = response.error.map(|e| (e.code, e.message)).unwrap_or((
                    0,
                    "empty result without error body".to_string(),
                ));
                Err(SolanaClientError::Rpc {
                    code: error.0,
                    message: error.1,
                })
            }
        }
    }
}

/// Retry classification for the transaction-detail fetch
fn classify_for_retry(err: &SolanaClientError) -> RetryKind {
    match err {
        SolanaClientError::RateLimited { .. } => RetryKind::RateLimit,
        SolanaClientError::Http(_) => RetryKind::Transient,
        SolanaClientError::Upstream { status, .. } if *status >= 500 => RetryKind::Transient,
        _ => RetryKind::Permanent,
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_manager::SystemConfig;

    fn test_client() -> SolanaRpcClient {
        let config = SystemConfig::default();
        SolanaRpcClient::new(config.solana, &config.retry).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = test_client();
        assert_eq!(
            client.config.rpc_url,
            "https://api.mainnet-beta.solana.com"
        );
    }

    #[test]
    fn test_request_ids_increment() {
        let client = test_client();
        let first = client.next_request_id();
        let second = client.next_request_id();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_rate_limit_classified_for_caller() {
        let err = SolanaClientError::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(classify_for_retry(&err), RetryKind::RateLimit);
    }

    #[test]
    fn test_server_errors_classified_transient() {
        let err = SolanaClientError::Upstream {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(classify_for_retry(&err), RetryKind::Transient);

        let err = SolanaClientError::Upstream {
            status: 404,
            body: "not found".to_string(),
        };
        assert_eq!(classify_for_retry(&err), RetryKind::Permanent);
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert(reqwest::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        assert_eq!(parse_retry_after(&reqwest::header::HeaderMap::new()), None);
    }

    #[test]
    fn test_unwrap_result_surfaces_rpc_error() {
        let response: RpcResponse<Value> = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "Invalid params"}
        }))
        .unwrap();

        let err = SolanaRpcClient::unwrap_result::<Value>(response).unwrap_err();
        match err {
            SolanaClientError::Rpc { code, message } => {
                assert_eq!(code, -32602);
                assert!(message.contains("Invalid params"));
            }
            other => panic!("expected Rpc error, got {:?}", other),
        }
    }
}
