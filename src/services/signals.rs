//! Signal lifecycle: creation behind the eligibility gate, exactly-once
//! settlement, upvotes and the reputation views built on top.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::TokenBalances;
use crate::adapters::{
    KarmaRule, MarketGateway, MarketRequest, NotificationSink, NotifyEvent, SettlementReport,
    SignalFilter, SqliteStore,
};
use crate::config::{EligibilityConfig, KarmaConfig};
use crate::domain::{new_id, MarketLink, NewSignal, Outcome, ProviderStats, Signal};
use crate::error::{MarketError, Result};

/// Attempts at creating the remote market before giving up
const LINK_ATTEMPTS: u32 = 3;
const LINK_BACKOFF: Duration = Duration::from_millis(250);

/// Provider profile with recent signals
#[derive(Debug, Clone, Serialize)]
pub struct ProviderProfile {
    #[serde(flatten)]
    pub stats: ProviderStats,
    pub recent_signals: Vec<Signal>,
}

#[derive(Clone)]
pub struct SignalService {
    store: Arc<SqliteStore>,
    balances: Arc<TokenBalances>,
    markets: Arc<dyn MarketGateway>,
    notifier: NotificationSink,
    karma: KarmaConfig,
    eligibility: EligibilityConfig,
}

impl SignalService {
    pub fn new(
        store: Arc<SqliteStore>,
        balances: Arc<TokenBalances>,
        markets: Arc<dyn MarketGateway>,
        notifier: NotificationSink,
        karma: KarmaConfig,
        eligibility: EligibilityConfig,
    ) -> Self {
        Self {
            store,
            balances,
            markets,
            notifier,
            karma,
            eligibility,
        }
    }

    fn karma_rule(&self) -> KarmaRule {
        KarmaRule {
            hit_delta: self.karma.hit_delta,
            miss_delta: self.karma.miss_delta,
            floor: self.karma.floor,
        }
    }

    /// Post a signal for `provider` (already authenticated, lowercased).
    ///
    /// Karma and token balance are both checked and every failing requirement
    /// is named. Market linkage runs in the background and never fails creation.
    pub async fn create_signal(&self, provider: &str, input: NewSignal) -> Result<Signal> {
        let now = Utc::now();
        input.validate(now)?;

        let profile = self.store.ensure_provider(provider, self.karma.initial).await?;
        let balance = self.balances.balance(provider).await;

        let mut unmet = Vec::new();
        if profile.karma < self.eligibility.min_karma {
            unmet.push(format!(
                "karma {} is below the required {}",
                profile.karma, self.eligibility.min_karma
            ));
        }
        if balance < self.eligibility.min_token_balance {
            unmet.push(format!(
                "token balance {} is below the required {}",
                balance, self.eligibility.min_token_balance
            ));
        }
        if !unmet.is_empty() {
            return Err(MarketError::Eligibility(unmet.join("; ")));
        }

        let link = if self.markets.is_enabled() {
            MarketLink::Pending
        } else {
            MarketLink::Disabled
        };
        let signal = self
            .store
            .insert_signal(&new_id("sig"), provider, &input, link, now)
            .await?;

        info!(
            signal_id = %signal.id,
            provider,
            asset = %signal.asset,
            karma_at_submit = signal.karma_at_submit,
            "Signal created"
        );

        if link == MarketLink::Pending {
            let service = self.clone();
            let pending = signal.clone();
            tokio::spawn(async move {
                if let Err(e) = service.link_market(&pending).await {
                    warn!(signal_id = %pending.id, error = %e, "Market linkage bookkeeping failed");
                }
            });
        }

        self.notifier.emit(NotifyEvent::SignalCreated {
            signal_id: signal.id.clone(),
            provider: signal.provider.clone(),
            asset: signal.asset.clone(),
            direction: signal.direction,
            entry_price: signal.entry_price,
            target_price: signal.target_price,
        });

        Ok(signal)
    }

    /// Mirror a signal into a remote market, retrying a few times.
    /// Records LINKED or FAILED; only storage errors are returned.
    pub async fn link_market(&self, signal: &Signal) -> Result<MarketLink> {
        let request = MarketRequest::for_signal(signal);

        for attempt in 1..=LINK_ATTEMPTS {
            match self.markets.create_market(&request).await {
                Ok(market_id) => {
                    self.store
                        .set_market_link(&signal.id, Some(&market_id), MarketLink::Linked)
                        .await?;
                    return Ok(MarketLink::Linked);
                }
                Err(e) => {
                    warn!(signal_id = %signal.id, attempt, error = %e, "Market creation failed");
                    if attempt < LINK_ATTEMPTS {
                        tokio::time::sleep(LINK_BACKOFF * attempt).await;
                    }
                }
            }
        }

        self.store
            .set_market_link(&signal.id, None, MarketLink::Failed)
            .await?;
        Ok(MarketLink::Failed)
    }

    /// Settle a signal exactly once; `AlreadySettled` on every later call
    pub async fn settle_signal(
        &self,
        signal_id: &str,
        outcome: Outcome,
        result_price: Option<Decimal>,
    ) -> Result<SettlementReport> {
        if let Some(price) = result_price {
            crate::validation::validate_positive_price(price, "result_price")?;
        }

        let report = self
            .store
            .settle_signal(signal_id, outcome, result_price, self.karma_rule(), Utc::now())
            .await?;

        self.notifier.emit(NotifyEvent::SignalSettled {
            signal_id: report.signal.id.clone(),
            asset: report.signal.asset.clone(),
            outcome,
            karma_delta: report.karma_delta,
            wagers_settled: report.wagers.len(),
        });

        Ok(report)
    }

    /// Resolution pushed by the remote market service
    pub async fn on_market_resolved(
        &self,
        market_id: &str,
        outcome: Outcome,
        result_price: Option<Decimal>,
    ) -> Result<SettlementReport> {
        let signal = self
            .store
            .find_signal_by_market(market_id)
            .await?
            .ok_or_else(|| MarketError::not_found("market", market_id))?;

        self.settle_signal(&signal.id, outcome, result_price).await
    }

    /// One upvote per (signal, voter); providers cannot upvote themselves
    pub async fn upvote(&self, signal_id: &str, voter: &str) -> Result<i64> {
        let signal = self.get_signal(signal_id).await?;
        if signal.provider == voter {
            return Err(MarketError::Validation(
                "providers cannot upvote their own signals".to_string(),
            ));
        }
        self.store.upvote_signal(signal_id, voter).await
    }

    pub async fn get_signal(&self, signal_id: &str) -> Result<Signal> {
        self.store
            .get_signal(signal_id)
            .await?
            .ok_or_else(|| MarketError::not_found("signal", signal_id))
    }

    pub async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>> {
        self.store.list_signals(filter).await
    }

    pub async fn provider_profile(&self, address: &str) -> Result<ProviderProfile> {
        let provider = self
            .store
            .get_provider(address)
            .await?
            .ok_or_else(|| MarketError::not_found("provider", address))?;

        let active = self.store.count_active_signals(address).await?;
        let recent_signals = self
            .store
            .list_signals(&SignalFilter {
                status: None,
                provider: Some(address.to_string()),
                limit: 20,
            })
            .await?;

        Ok(ProviderProfile {
            stats: ProviderStats::new(&provider, active),
            recent_signals,
        })
    }

    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<ProviderStats>> {
        let rows = self.store.leaderboard(limit).await?;
        Ok(rows
            .iter()
            .map(|(provider, active)| ProviderStats::new(provider, *active))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::prediction_market::MockMarketGateway;
    use crate::adapters::StaticBalances;
    use crate::domain::{Direction, SignalStatus};
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    const PROVIDER: &str = "0x1111111111111111111111111111111111111111";
    const VOTER: &str = "0x3333333333333333333333333333333333333333";

    fn btc_long() -> NewSignal {
        NewSignal {
            asset: "BTC".into(),
            direction: Direction::Long,
            entry_price: dec!(90000),
            target_price: dec!(92000),
            stop_loss: None,
            timeframe: "24h".into(),
            deadline: Utc::now() + ChronoDuration::hours(24),
            reasoning: "Range breakout".into(),
        }
    }

    async fn service(markets: MockMarketGateway, balance: i64) -> (SignalService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let source = StaticBalances::new();
        source.set(PROVIDER, balance);
        let balances = Arc::new(TokenBalances::new(Arc::new(source), 60));

        let service = SignalService::new(
            store.clone(),
            balances,
            Arc::new(markets),
            NotificationSink::disabled(),
            KarmaConfig::default(),
            EligibilityConfig::default(),
        );
        (service, store)
    }

    fn disabled_markets() -> MockMarketGateway {
        let mut markets = MockMarketGateway::new();
        markets.expect_is_enabled().return_const(false);
        markets
    }

    #[tokio::test]
    async fn test_eligibility_names_every_unmet_requirement() {
        let (service, store) = service(disabled_markets(), 10).await;
        store.ensure_provider(PROVIDER, 50).await.unwrap();
        store.adjust_karma(PROVIDER, -40, None).await.unwrap();

        let err = service.create_signal(PROVIDER, btc_long()).await.unwrap_err();
        match err {
            MarketError::Eligibility(msg) => {
                assert!(msg.contains("karma 10"));
                assert!(msg.contains("token balance 10"));
            }
            other => panic!("expected eligibility error, got {other:?}"),
        }
        assert!(store
            .list_signals(&SignalFilter { limit: 10, ..Default::default() })
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_signal_snapshots_karma_and_skips_disabled_linkage() {
        let (service, store) = service(disabled_markets(), 500).await;
        store.ensure_provider(PROVIDER, 50).await.unwrap();
        store.adjust_karma(PROVIDER, 10, None).await.unwrap();

        let signal = service.create_signal(PROVIDER, btc_long()).await.unwrap();
        assert_eq!(signal.status, SignalStatus::Active);
        assert_eq!(signal.karma_at_submit, 60);
        assert_eq!(signal.market_link, MarketLink::Disabled);
        assert!(signal.market_id.is_none());
    }

    #[tokio::test]
    async fn test_link_market_records_remote_id() {
        let mut markets = MockMarketGateway::new();
        markets.expect_is_enabled().return_const(false);
        markets
            .expect_create_market()
            .times(1)
            .returning(|_| Ok("mkt_42".to_string()));
        let (service, store) = service(markets, 500).await;

        let signal = service.create_signal(PROVIDER, btc_long()).await.unwrap();
        let link = service.link_market(&signal).await.unwrap();
        assert_eq!(link, MarketLink::Linked);

        let stored = store.get_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.market_id.as_deref(), Some("mkt_42"));
        assert_eq!(stored.market_link, MarketLink::Linked);

        let found = store.find_signal_by_market("mkt_42").await.unwrap().unwrap();
        assert_eq!(found.id, signal.id);
    }

    #[tokio::test]
    async fn test_link_market_gives_up_after_retries() {
        let mut markets = MockMarketGateway::new();
        markets.expect_is_enabled().return_const(false);
        markets
            .expect_create_market()
            .times(LINK_ATTEMPTS as usize)
            .returning(|_| Err(MarketError::dependency("prediction_market", "503")));
        let (service, store) = service(markets, 500).await;

        let signal = service.create_signal(PROVIDER, btc_long()).await.unwrap();
        let link = service.link_market(&signal).await.unwrap();
        assert_eq!(link, MarketLink::Failed);

        let stored = store.get_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.market_link, MarketLink::Failed);
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn test_settle_twice_conflicts_and_karma_moves_once() {
        let (service, store) = service(disabled_markets(), 500).await;
        let signal = service.create_signal(PROVIDER, btc_long()).await.unwrap();

        let report = service
            .settle_signal(&signal.id, Outcome::Miss, Some(dec!(88000)))
            .await
            .unwrap();
        assert_eq!(report.signal.status, SignalStatus::Resolved);
        assert_eq!(report.provider_karma, 45);

        let err = service
            .settle_signal(&signal.id, Outcome::Hit, None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::AlreadySettled(_)));

        let provider = store.get_provider(PROVIDER).await.unwrap().unwrap();
        assert_eq!(provider.karma, 45);
    }

    #[tokio::test]
    async fn test_market_resolution_for_unknown_market_is_not_found() {
        let (service, _store) = service(disabled_markets(), 500).await;
        let err = service
            .on_market_resolved("mkt_missing", Outcome::Hit, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_upvotes_are_once_per_voter_and_not_self() {
        let (service, _store) = service(disabled_markets(), 500).await;
        let signal = service.create_signal(PROVIDER, btc_long()).await.unwrap();

        assert_eq!(service.upvote(&signal.id, VOTER).await.unwrap(), 1);
        assert!(matches!(
            service.upvote(&signal.id, VOTER).await,
            Err(MarketError::DuplicateVote(_))
        ));
        assert!(matches!(
            service.upvote(&signal.id, PROVIDER).await,
            Err(MarketError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_and_leaderboard_reflect_settlements() {
        let (service, _store) = service(disabled_markets(), 500).await;
        let first = service.create_signal(PROVIDER, btc_long()).await.unwrap();
        service.create_signal(PROVIDER, btc_long()).await.unwrap();
        service.settle_signal(&first.id, Outcome::Hit, None).await.unwrap();

        let profile = service.provider_profile(PROVIDER).await.unwrap();
        assert_eq!(profile.stats.karma, 60);
        assert_eq!(profile.stats.wins, 1);
        assert_eq!(profile.stats.signals_posted, 2);
        assert_eq!(profile.stats.active_signals, 1);
        assert_eq!(profile.recent_signals.len(), 2);

        let board = service.leaderboard(10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].address, PROVIDER);
    }
}
