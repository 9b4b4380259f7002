use crate::config::AuthConfig;
use crate::error::{MarketError, Result};
use crate::validation::validate_address;
use chrono::{DateTime, TimeZone, Utc};
use ethers::types::Signature;
use std::str::FromStr;
use tracing::debug;

/// Unix timestamps above this are taken to be milliseconds
const MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Recover the address that produced an EIP-191 personal-message signature
///
/// # Returns
/// The signer address, `0x`-prefixed and lowercased
pub fn recover_address(message: &str, signature: &str) -> Result<String> {
    let signature = Signature::from_str(signature.trim())
        .map_err(|e| MarketError::Authentication(format!("malformed signature: {}", e)))?;
    let address = signature
        .recover(message)
        .map_err(|e| MarketError::Authentication(format!("recovery failed: {}", e)))?;
    Ok(format!("{:?}", address))
}

/// Verify that `claimed` signed `message`
///
/// Fails with `Authentication` when the signature does not parse, does not
/// recover, or recovers to a different address.
pub fn verify_wallet_signature(message: &str, signature: &str, claimed: &str) -> Result<String> {
    let claimed = validate_address(claimed, "address")
        .map_err(|_| MarketError::Authentication(format!("malformed address: {}", claimed)))?;
    let recovered = recover_address(message, signature)?;

    if recovered != claimed {
        debug!(%claimed, %recovered, "signature recovered to a different address");
        return Err(MarketError::Authentication(
            "recovered address mismatch".to_string(),
        ));
    }
    Ok(claimed)
}

/// Extract the `Timestamp:` line of a signed message
///
/// Accepts unix seconds, unix milliseconds or RFC 3339.
pub fn message_timestamp(message: &str) -> Option<DateTime<Utc>> {
    let value = message.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("timestamp")
            .then(|| value.trim())
    })?;

    if let Ok(n) = value.parse::<i64>() {
        return if n >= MILLIS_CUTOFF {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Signature verification with a replay window
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    max_age_secs: i64,
    max_skew_secs: i64,
}

impl SignatureVerifier {
    pub fn new(max_age_secs: i64, max_skew_secs: i64) -> Self {
        Self {
            max_age_secs,
            max_skew_secs,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.max_signature_age_secs, config.max_clock_skew_secs)
    }

    /// Verify signer and freshness; returns the canonical address
    pub fn verify(
        &self,
        message: &str,
        signature: &str,
        claimed: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let signed_at = message_timestamp(message).ok_or_else(|| {
            MarketError::Authentication("message has no Timestamp line".to_string())
        })?;

        let age = (now - signed_at).num_seconds();
        if age > self.max_age_secs {
            return Err(MarketError::Authentication(format!(
                "signed message is {}s old",
                age
            )));
        }
        if -age > self.max_skew_secs {
            return Err(MarketError::Authentication(format!(
                "signed message is {}s in the future",
                -age
            )));
        }

        verify_wallet_signature(message, signature, claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ethers::signers::{LocalWallet, Signer};

    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    async fn sign(message: &str) -> String {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let signature = wallet.sign_message(message).await.unwrap();
        format!("0x{}", signature)
    }

    fn message_at(at: DateTime<Utc>) -> String {
        format!("Sign in to sigmarket\nTimestamp: {}", at.timestamp())
    }

    #[tokio::test]
    async fn test_recovers_signer() {
        let message = "hello";
        let signature = sign(message).await;
        assert_eq!(recover_address(message, &signature).unwrap(), ADDRESS);
    }

    #[tokio::test]
    async fn test_claimed_address_is_case_insensitive() {
        let message = "hello";
        let signature = sign(message).await;
        let upper = "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266";
        assert_eq!(
            verify_wallet_signature(message, &signature, upper).unwrap(),
            ADDRESS
        );
    }

    #[tokio::test]
    async fn test_wrong_signer_rejected() {
        let signature = sign("hello").await;
        let other = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";
        assert!(matches!(
            verify_wallet_signature("hello", &signature, other),
            Err(MarketError::Authentication(_))
        ));
        // tampered message recovers someone else
        assert!(verify_wallet_signature("hello!", &signature, ADDRESS).is_err());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        assert!(matches!(
            verify_wallet_signature("hello", "0xnothex", ADDRESS),
            Err(MarketError::Authentication(_))
        ));
    }

    #[test]
    fn test_timestamp_formats() {
        let secs = message_timestamp("a\nTimestamp: 1700000000").unwrap();
        let millis = message_timestamp("timestamp:1700000000000").unwrap();
        let rfc = message_timestamp("Timestamp: 2023-11-14T22:13:20Z").unwrap();
        assert_eq!(secs, millis);
        assert_eq!(secs, rfc);
        assert!(message_timestamp("no time here").is_none());
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let verifier = SignatureVerifier::new(300, 60);
        let now = Utc::now();

        let fresh = message_at(now - Duration::seconds(10));
        let sig = sign(&fresh).await;
        assert_eq!(verifier.verify(&fresh, &sig, ADDRESS, now).unwrap(), ADDRESS);

        let stale = message_at(now - Duration::seconds(301));
        let sig = sign(&stale).await;
        assert!(verifier.verify(&stale, &sig, ADDRESS, now).is_err());

        let future = message_at(now + Duration::seconds(120));
        let sig = sign(&future).await;
        assert!(verifier.verify(&future, &sig, ADDRESS, now).is_err());

        let sig = sign("no timestamp").await;
        assert!(verifier.verify("no timestamp", &sig, ADDRESS, now).is_err());
    }
}
