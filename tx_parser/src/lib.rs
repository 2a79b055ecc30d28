use chrono::{DateTime, Utc};
use pnl_core::{TransactionRecord, TransferDirection};
use rust_decimal::Decimal;
use solana_client::types::{TransactionDetail, TransactionTokenBalance};
use solana_client::WRAPPED_SOL_MINT;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Missing required data: {0}")]
    MissingData(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

const LAMPORTS_PER_SOL: f64 = 1e9;

/// Normalize one fetched transaction into per-token records for the target
/// wallet. Classification is by net balance effect: the wallet's pre/post
/// token balances are diffed per mint, positive deltas become `Receive`,
/// negative deltas `Send`. Native SOL movement is recorded under the
/// wrapped-SOL mint. A transaction that touches the wallet without moving
/// anything yields a single `Unknown` record so it still appears in
/// history.
pub fn parse_transaction(
    detail: &TransactionDetail,
    wallet: &str,
    owned: &HashSet<String>,
) -> Result<Vec<TransactionRecord>> {
    let meta = detail
        .meta
        .as_ref()
        .ok_or_else(|| ParseError::MissingData("transaction meta".to_string()))?;

    let signature = detail
        .signature()
        .ok_or_else(|| ParseError::MissingData("transaction signature".to_string()))?
        .to_string();

    let timestamp = detail
        .block_time
        .and_then(|bt| DateTime::<Utc>::from_timestamp(bt, 0))
        .unwrap_or_else(|| {
            warn!("Transaction {} has no block time", signature);
            Utc::now()
        });

    let is_internal = is_internal_transfer(detail, owned);

    let pre = wallet_token_amounts(meta.pre_token_balances.as_deref(), wallet);
    let post = wallet_token_amounts(meta.post_token_balances.as_deref(), wallet);

    let mut mints: Vec<&String> = pre.keys().chain(post.keys()).collect();
    mints.sort();
    mints.dedup();

    let mut records = Vec::new();

    for mint in mints {
        let pre_amount = pre.get(mint).copied().unwrap_or(0.0);
        let post_amount = post.get(mint).copied().unwrap_or(0.0);
        let diff = post_amount - pre_amount;

        if diff == 0.0 {
            continue;
        }

        let direction = if diff > 0.0 {
            TransferDirection::Receive
        } else {
            TransferDirection::Send
        };

        records.push(TransactionRecord {
            signature: signature.clone(),
            direction,
            is_internal,
            timestamp,
            token_mint: mint.clone(),
            amount: Decimal::try_from(diff.abs()).unwrap_or(Decimal::ZERO),
        });
    }

    // Native SOL movement for the wallet's own account entry
    if let Some(index) = detail
        .transaction
        .message
        .account_keys
        .iter()
        .position(|key| key == wallet)
    {
        let pre_lamports = meta.pre_balances.get(index).copied().unwrap_or(0);
        let post_lamports = meta.post_balances.get(index).copied().unwrap_or(0);
        let sol_diff = (post_lamports as f64 - pre_lamports as f64) / LAMPORTS_PER_SOL;

        if sol_diff != 0.0 {
            records.push(TransactionRecord {
                signature: signature.clone(),
                direction: if sol_diff > 0.0 {
                    TransferDirection::Receive
                } else {
                    TransferDirection::Send
                },
                is_internal,
                timestamp,
                token_mint: WRAPPED_SOL_MINT.to_string(),
                amount: Decimal::try_from(sol_diff.abs()).unwrap_or(Decimal::ZERO),
            });
        }
    }

    if records.is_empty() {
        debug!("Transaction {} moved nothing for wallet {}", signature, wallet);
        records.push(TransactionRecord {
            signature,
            direction: TransferDirection::Unknown,
            is_internal,
            timestamp,
            token_mint: String::new(),
            amount: Decimal::ZERO,
        });
    }

    Ok(records)
}

/// Best-effort internal-transfer check: a transaction is flagged internal
/// when any instruction's first two referenced accounts both belong to the
/// owned set. Not a full instruction decode; false negatives are expected
/// and acceptable.
pub fn is_internal_transfer(detail: &TransactionDetail, owned: &HashSet<String>) -> bool {
    if owned.len() < 2 {
        return false;
    }

    let keys = &detail.transaction.message.account_keys;

    for instruction in &detail.transaction.message.instructions {
        let mut referenced = instruction
            .accounts
            .iter()
            .take(2)
            .filter_map(|&index| keys.get(index));

        let (first, second) = (referenced.next(), referenced.next());
        if let (Some(first), Some(second)) = (first, second) {
            if owned.contains(first) && owned.contains(second) {
                return true;
            }
        }
    }

    false
}

fn wallet_token_amounts(
    balances: Option<&[TransactionTokenBalance]>,
    wallet: &str,
) -> HashMap<String, f64> {
    let mut amounts = HashMap::new();

    for balance in balances.unwrap_or_default() {
        if balance.owner.as_deref() != Some(wallet) {
            continue;
        }
        let amount = balance
            .ui_token_amount
            .ui_amount
            .or_else(|| balance.ui_token_amount.ui_amount_string.parse().ok())
            .unwrap_or(0.0);
        amounts.insert(balance.mint.clone(), amount);
    }

    amounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WALLET_A: &str = "WalletAaa";
    const WALLET_B: &str = "WalletBbb";

    fn detail(
        pre_token: serde_json::Value,
        post_token: serde_json::Value,
        account_keys: serde_json::Value,
        instructions: serde_json::Value,
    ) -> TransactionDetail {
        serde_json::from_value(json!({
            "blockTime": 1700000000,
            "slot": 1,
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [2_000_000_000u64, 0],
                "postBalances": [2_000_000_000u64, 0],
                "preTokenBalances": pre_token,
                "postTokenBalances": post_token
            },
            "transaction": {
                "message": {
                    "accountKeys": account_keys,
                    "instructions": instructions,
                    "recentBlockhash": "hash"
                },
                "signatures": ["sig-1"]
            }
        }))
        .unwrap()
    }

    fn token_balance(owner: &str, mint: &str, amount: f64) -> serde_json::Value {
        json!({
            "accountIndex": 1,
            "mint": mint,
            "owner": owner,
            "programId": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
            "uiTokenAmount": {
                "amount": format!("{}", (amount * 1e6) as u64),
                "decimals": 6,
                "uiAmount": amount,
                "uiAmountString": amount.to_string()
            }
        })
    }

    #[test]
    fn test_balance_increase_classified_as_receive() {
        let detail = detail(
            json!([token_balance(WALLET_A, "MintAaa", 1.0)]),
            json!([token_balance(WALLET_A, "MintAaa", 3.5)]),
            json!([WALLET_A]),
            json!([]),
        );

        let records = parse_transaction(&detail, WALLET_A, &HashSet::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, TransferDirection::Receive);
        assert_eq!(records[0].amount, Decimal::try_from(2.5).unwrap());
        assert_eq!(records[0].token_mint, "MintAaa");
        assert!(!records[0].is_internal);
    }

    #[test]
    fn test_balance_decrease_classified_as_send() {
        let detail = detail(
            json!([token_balance(WALLET_A, "MintAaa", 4.0)]),
            json!([token_balance(WALLET_A, "MintAaa", 1.0)]),
            json!([WALLET_A]),
            json!([]),
        );

        let records = parse_transaction(&detail, WALLET_A, &HashSet::new()).unwrap();
        assert_eq!(records[0].direction, TransferDirection::Send);
        assert_eq!(records[0].amount, Decimal::from(3));
    }

    #[test]
    fn test_other_wallets_balances_ignored() {
        let detail = detail(
            json!([token_balance(WALLET_B, "MintAaa", 1.0)]),
            json!([token_balance(WALLET_B, "MintAaa", 9.0)]),
            json!([WALLET_A]),
            json!([]),
        );

        let records = parse_transaction(&detail, WALLET_A, &HashSet::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, TransferDirection::Unknown);
    }

    #[test]
    fn test_sol_movement_recorded_under_wrapped_mint() {
        let mut detail = detail(json!([]), json!([]), json!([WALLET_A]), json!([]));
        if let Some(meta) = detail.meta.as_mut() {
            meta.pre_balances = vec![5_000_000_000];
            meta.post_balances = vec![3_000_000_000];
        }

        let records = parse_transaction(&detail, WALLET_A, &HashSet::new()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_mint, WRAPPED_SOL_MINT);
        assert_eq!(records[0].direction, TransferDirection::Send);
        assert_eq!(records[0].amount, Decimal::from(2));
    }

    #[test]
    fn test_internal_transfer_flagged_when_first_two_accounts_owned() {
        let owned: HashSet<String> =
            [WALLET_A.to_string(), WALLET_B.to_string()].into_iter().collect();

        let detail = detail(
            json!([token_balance(WALLET_A, "MintAaa", 4.0)]),
            json!([token_balance(WALLET_A, "MintAaa", 1.0)]),
            json!([WALLET_A, WALLET_B, "SomeProgram"]),
            json!([{
                "accounts": [0, 1],
                "data": "data",
                "programIdIndex": 2,
                "stackHeight": null
            }]),
        );

        assert!(is_internal_transfer(&detail, &owned));

        let records = parse_transaction(&detail, WALLET_A, &owned).unwrap();
        assert!(records[0].is_internal);
    }

    #[test]
    fn test_external_counterparty_not_flagged_internal() {
        let owned: HashSet<String> =
            [WALLET_A.to_string(), WALLET_B.to_string()].into_iter().collect();

        let detail = detail(
            json!([]),
            json!([]),
            json!([WALLET_A, "StrangerWallet", "SomeProgram"]),
            json!([{
                "accounts": [0, 1],
                "data": "data",
                "programIdIndex": 2,
                "stackHeight": null
            }]),
        );

        assert!(!is_internal_transfer(&detail, &owned));
    }

    #[test]
    fn test_single_owned_wallet_never_internal() {
        let owned: HashSet<String> = [WALLET_A.to_string()].into_iter().collect();

        let detail = detail(
            json!([]),
            json!([]),
            json!([WALLET_A, WALLET_A]),
            json!([{
                "accounts": [0, 1],
                "data": "data",
                "programIdIndex": 0,
                "stackHeight": null
            }]),
        );

        assert!(!is_internal_transfer(&detail, &owned));
    }

    #[test]
    fn test_missing_meta_is_a_parse_error() {
        let detail: TransactionDetail = serde_json::from_value(json!({
            "blockTime": 1700000000,
            "slot": 1,
            "meta": null,
            "transaction": {
                "message": {"accountKeys": [], "instructions": []},
                "signatures": ["sig-1"]
            }
        }))
        .unwrap();

        assert!(matches!(
            parse_transaction(&detail, WALLET_A, &HashSet::new()),
            Err(ParseError::MissingData(_))
        ));
    }
}
