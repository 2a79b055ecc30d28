use crate::{Result, SolanaClientError};

/// Byte length of an ed25519 public key, the on-chain account identifier
pub const PUBKEY_LENGTH: usize = 32;

/// Check that a candidate address is structurally a valid on-chain account
/// identifier: base58, decoding to exactly 32 bytes. Runs before any
/// upstream call so malformed input never spends quota.
pub fn validate_address(address: &str) -> Result<()> {
    let decoded = bs58::decode(address).into_vec().map_err(|e| {
        SolanaClientError::InvalidAddress {
            reason: format!("not valid base58: {}", e),
        }
    })?;

    if decoded.len() != PUBKEY_LENGTH {
        return Err(SolanaClientError::InvalidAddress {
            reason: format!(
                "decoded to {} bytes, expected {}",
                decoded.len(),
                PUBKEY_LENGTH
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "So11111111111111111111111111111111111111112";

    #[test]
    fn test_valid_address_passes() {
        assert!(validate_address(VALID).is_ok());
    }

    #[test]
    fn test_bad_encoding_rejected() {
        // '0', 'O', 'I' and 'l' are not base58 characters
        let err = validate_address("0OIl").unwrap_err();
        match err {
            SolanaClientError::InvalidAddress { reason } => {
                assert!(reason.contains("base58"), "unexpected reason: {}", reason);
            }
            other => panic!("expected InvalidAddress, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_length_rejected() {
        // valid base58, but decodes to far fewer than 32 bytes
        let err = validate_address("abc").unwrap_err();
        match err {
            SolanaClientError::InvalidAddress { reason } => {
                assert!(reason.contains("expected 32"), "unexpected reason: {}", reason);
            }
            other => panic!("expected InvalidAddress, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_address_rejected() {
        assert!(validate_address("").is_err());
    }
}
