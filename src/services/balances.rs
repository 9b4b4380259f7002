use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

use crate::adapters::BalanceSource;

/// Token balances with a short-lived cache.
///
/// A failing or slow chain never fails the request: an unknown balance is
/// reported as zero, which places the holder in the lowest tier.
pub struct TokenBalances {
    source: Arc<dyn BalanceSource>,
    cache: DashMap<String, (i64, DateTime<Utc>)>,
    ttl: Duration,
}

impl TokenBalances {
    pub fn new(source: Arc<dyn BalanceSource>, ttl_secs: i64) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl: Duration::seconds(ttl_secs.max(0)),
        }
    }

    /// Balance in whole tokens, 0 when the chain cannot be reached
    pub async fn balance(&self, address: &str) -> i64 {
        let now = Utc::now();
        if let Some(entry) = self.cache.get(address) {
            let (balance, fetched_at) = *entry;
            if now - fetched_at < self.ttl {
                return balance;
            }
        }

        match self.source.token_balance(address).await {
            Ok(balance) => {
                self.cache.insert(address.to_string(), (balance, now));
                balance
            }
            Err(e) => {
                warn!(address, error = %e, "Token balance unavailable, treating as zero");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::chain_rpc::MockBalanceSource;
    use crate::error::MarketError;

    #[tokio::test]
    async fn test_balance_is_cached() {
        let mut source = MockBalanceSource::new();
        source.expect_token_balance().times(1).returning(|_| Ok(750));

        let balances = TokenBalances::new(Arc::new(source), 60);
        assert_eq!(balances.balance("0xabc").await, 750);
        assert_eq!(balances.balance("0xabc").await, 750);
    }

    #[tokio::test]
    async fn test_unknown_balance_is_zero_and_not_cached() {
        let mut source = MockBalanceSource::new();
        source
            .expect_token_balance()
            .times(2)
            .returning(|_| Err(MarketError::dependency("chain_rpc", "timed out")));

        let balances = TokenBalances::new(Arc::new(source), 60);
        assert_eq!(balances.balance("0xabc").await, 0);
        assert_eq!(balances.balance("0xabc").await, 0);
    }
}
