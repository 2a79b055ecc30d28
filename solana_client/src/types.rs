//! Serde models for the Solana JSON-RPC response shapes this client reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 response envelope
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<T>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

/// getBalance result: lamports under a slot context
#[derive(Debug, Deserialize)]
pub struct BalanceResult {
    pub context: RpcContext,
    pub value: u64,
}

#[derive(Debug, Deserialize)]
pub struct RpcContext {
    pub slot: u64,
}

// --- getTokenAccountsByOwner (jsonParsed) ---

#[derive(Debug, Deserialize)]
pub struct TokenAccountsResult {
    pub context: RpcContext,
    pub value: Vec<TokenAccountEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccountEntry {
    pub pubkey: String,
    pub account: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccountInfo {
    pub data: TokenAccountData,
    pub lamports: u64,
    pub owner: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccountData {
    pub parsed: ParsedTokenData,
    pub program: String,
}

#[derive(Debug, Deserialize)]
pub struct ParsedTokenData {
    pub info: ParsedTokenInfo,
    #[serde(rename = "type")]
    pub account_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ParsedTokenInfo {
    pub mint: String,
    pub owner: String,
    #[serde(rename = "tokenAmount")]
    pub token_amount: TokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAmount {
    pub amount: String,
    pub decimals: u8,
    #[serde(rename = "uiAmount")]
    pub ui_amount: Option<f64>,
    #[serde(rename = "uiAmountString")]
    pub ui_amount_string: String,
}

/// Flattened token-account view handed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAccount {
    pub mint: String,
    pub amount: rust_decimal::Decimal,
    pub decimals: u8,
    pub token_account: String,
}

// --- getAsset (token metadata) ---

#[derive(Debug, Clone, Deserialize)]
pub struct AssetResult {
    pub interface: Option<String>,
    pub id: String,
    pub content: Option<AssetContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetContent {
    #[serde(rename = "json_uri")]
    pub json_uri: Option<String>,
    #[serde(default)]
    pub files: Vec<AssetFile>,
    pub metadata: Option<AssetMetadataFields>,
    pub links: Option<AssetLinks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetFile {
    pub uri: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetMetadataFields {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetLinks {
    pub image: Option<String>,
}

/// Flattened metadata view handed to callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub image: String,
}

// --- getSignaturesForAddress ---

#[derive(Debug, Clone, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub err: Option<Value>,
    pub memo: Option<String>,
    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,
}

// --- getTransaction ("json" encoding: account keys as strings, ---
// --- instructions referencing accounts by index)                ---

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionDetail {
    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,
    pub slot: u64,
    pub meta: Option<TransactionMeta>,
    pub transaction: TransactionPayload,
}

impl TransactionDetail {
    /// True when the provider reports the on-chain transaction itself
    /// failed. A 200-status fetch of such a transaction is not a usable
    /// result for accounting.
    pub fn failed_on_chain(&self) -> bool {
        self.meta
            .as_ref()
            .map(|meta| meta.err.is_some())
            .unwrap_or(false)
    }

    pub fn signature(&self) -> Option<&str> {
        self.transaction.signatures.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionMeta {
    pub err: Option<Value>,
    pub fee: u64,
    #[serde(rename = "preBalances", default)]
    pub pre_balances: Vec<u64>,
    #[serde(rename = "postBalances", default)]
    pub post_balances: Vec<u64>,
    #[serde(rename = "preTokenBalances")]
    pub pre_token_balances: Option<Vec<TransactionTokenBalance>>,
    #[serde(rename = "postTokenBalances")]
    pub post_token_balances: Option<Vec<TransactionTokenBalance>>,
    #[serde(rename = "logMessages")]
    pub log_messages: Option<Vec<String>>,
    #[serde(rename = "computeUnitsConsumed")]
    pub compute_units_consumed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionTokenBalance {
    #[serde(rename = "accountIndex")]
    pub account_index: u32,
    pub mint: String,
    pub owner: Option<String>,
    #[serde(rename = "programId")]
    pub program_id: Option<String>,
    #[serde(rename = "uiTokenAmount")]
    pub ui_token_amount: TokenAmount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionPayload {
    pub message: TransactionMessage,
    pub signatures: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionMessage {
    #[serde(rename = "accountKeys")]
    pub account_keys: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<CompiledInstruction>,
    #[serde(rename = "recentBlockhash")]
    pub recent_blockhash: Option<String>,
    pub header: Option<MessageHeader>,
    #[serde(rename = "addressTableLookups")]
    pub address_table_lookups: Option<Vec<AddressTableLookup>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompiledInstruction {
    #[serde(default)]
    pub accounts: Vec<usize>,
    pub data: String,
    #[serde(rename = "programIdIndex")]
    pub program_id_index: usize,
    #[serde(rename = "stackHeight")]
    pub stack_height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "numReadonlySignedAccounts")]
    pub num_readonly_signed_accounts: u8,
    #[serde(rename = "numReadonlyUnsignedAccounts")]
    pub num_readonly_unsigned_accounts: u8,
    #[serde(rename = "numRequiredSignatures")]
    pub num_required_signatures: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressTableLookup {
    #[serde(rename = "accountKey")]
    pub account_key: String,
    #[serde(rename = "readonlyIndexes", default)]
    pub readonly_indexes: Vec<u32>,
    #[serde(rename = "writableIndexes", default)]
    pub writable_indexes: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transaction_detail_parses_json_encoding() {
        let raw = json!({
            "blockTime": 1700000000,
            "slot": 250000000,
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [10_000_000_000u64, 0],
                "postBalances": [9_000_000_000u64, 1_000_000_000u64],
                "preTokenBalances": [],
                "postTokenBalances": [{
                    "accountIndex": 1,
                    "mint": "MintAaa",
                    "owner": "OwnerAaa",
                    "programId": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                    "uiTokenAmount": {
                        "amount": "1500000",
                        "decimals": 6,
                        "uiAmount": 1.5,
                        "uiAmountString": "1.5"
                    }
                }],
                "logMessages": []
            },
            "transaction": {
                "message": {
                    "accountKeys": ["KeyA", "KeyB", "KeyC"],
                    "instructions": [{
                        "accounts": [0, 1],
                        "data": "3Bxs4h24hBtQy9rw",
                        "programIdIndex": 2,
                        "stackHeight": null
                    }],
                    "recentBlockhash": "hash"
                },
                "signatures": ["sig-1"]
            }
        });

        let detail: TransactionDetail = serde_json::from_value(raw).unwrap();
        assert!(!detail.failed_on_chain());
        assert_eq!(detail.signature(), Some("sig-1"));
        assert_eq!(detail.transaction.message.instructions[0].accounts, vec![0, 1]);
        let post = detail.meta.unwrap().post_token_balances.unwrap();
        assert_eq!(post[0].ui_token_amount.ui_amount, Some(1.5));
    }

    #[test]
    fn test_failed_on_chain_detected_from_meta_err() {
        let raw = json!({
            "blockTime": 1700000000,
            "slot": 1,
            "meta": {
                "err": {"InstructionError": [0, "Custom"]},
                "fee": 5000
            },
            "transaction": {
                "message": {"accountKeys": [], "instructions": []},
                "signatures": ["sig-err"]
            }
        });

        let detail: TransactionDetail = serde_json::from_value(raw).unwrap();
        assert!(detail.failed_on_chain());
    }
}
