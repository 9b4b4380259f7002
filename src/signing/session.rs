use crate::config::AuthConfig;
use crate::error::{MarketError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// A bearer token issued after a verified signature
#[derive(Debug, Clone, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub address: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and checks HMAC-SHA256 bearer tokens of the form
/// `base64url(address|expiry).base64url(mac)`
#[derive(Clone)]
pub struct SessionTokens {
    secret: Vec<u8>,
    ttl: Duration,
}

impl SessionTokens {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    /// Configured secret, or a random key that lives as long as the process.
    /// Tokens from a random key stop verifying after a restart.
    pub fn from_config(config: &AuthConfig) -> Self {
        match config.session_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => Self::new(secret, config.session_ttl_secs),
            _ => {
                warn!("auth.session_secret not set; using a random per-process session key");
                Self::random(config.session_ttl_secs)
            }
        }
    }

    pub fn random(ttl_secs: i64) -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            secret,
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| MarketError::Internal(format!("HMAC init failed: {}", e)))
    }

    /// Issue a token for an already verified, lowercased address
    pub fn issue(&self, address: &str, now: DateTime<Utc>) -> Result<SessionToken> {
        let expires_at = now + self.ttl;
        let payload = format!("{}|{}", address, expires_at.timestamp());

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let tag = mac.finalize().into_bytes();

        Ok(SessionToken {
            token: format!("{}.{}", B64.encode(payload), B64.encode(tag)),
            address: address.to_string(),
            expires_at,
        })
    }

    /// Check a token and return the address it was issued to
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<String> {
        let invalid = |reason: &str| MarketError::Authentication(format!("bearer token {}", reason));

        let (payload_b64, tag_b64) = token.trim().split_once('.').ok_or_else(|| invalid("malformed"))?;
        let payload = B64.decode(payload_b64).map_err(|_| invalid("malformed"))?;
        let tag = B64.decode(tag_b64).map_err(|_| invalid("malformed"))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&tag).map_err(|_| invalid("has a bad MAC"))?;

        let payload = String::from_utf8(payload).map_err(|_| invalid("malformed"))?;
        let (address, expiry) = payload.split_once('|').ok_or_else(|| invalid("malformed"))?;
        let expiry = expiry
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| invalid("malformed"))?;

        if expiry <= now {
            return Err(invalid("expired"));
        }
        Ok(address.to_string())
    }
}
