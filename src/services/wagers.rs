use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::adapters::{MarketGateway, NotificationSink, NotifyEvent, SqliteStore};
use crate::config::WagerConfig;
use crate::domain::{
    new_id, pool_odds_bps, price_to_bps, MarketLink, Outcome, Portfolio, Signal, Wager,
    WagerStatus,
};
use crate::error::{MarketError, Result};
use crate::validation::validate_amount;

/// Wager ledger: placement with locked odds, exposure and P&L views.
/// Settlement itself happens inside the signal's settlement transaction.
#[derive(Clone)]
pub struct WagerLedger {
    store: Arc<SqliteStore>,
    markets: Arc<dyn MarketGateway>,
    notifier: NotificationSink,
    config: WagerConfig,
    initial_karma: i64,
}

impl WagerLedger {
    pub fn new(
        store: Arc<SqliteStore>,
        markets: Arc<dyn MarketGateway>,
        notifier: NotificationSink,
        config: WagerConfig,
        initial_karma: i64,
    ) -> Self {
        Self {
            store,
            markets,
            notifier,
            config,
            initial_karma,
        }
    }

    /// Odds for `side`, taken from the remote book when the signal is linked
    /// and the book answers, otherwise from the local pools
    pub async fn quote_odds(&self, signal: &Signal, side: Outcome) -> Result<i64> {
        if let (MarketLink::Linked, Some(market_id)) = (signal.market_link, &signal.market_id) {
            match self.markets.get_orderbook(market_id).await {
                Ok(book) => {
                    if let Some(bps) = book.price_for(side).and_then(price_to_bps) {
                        return Ok(bps);
                    }
                    debug!(market_id = %market_id, "Remote book has no usable price, using pool odds");
                }
                Err(e) => debug!(market_id = %market_id, error = %e, "Orderbook unavailable, using pool odds"),
            }
        }

        let (hit, miss) = self.store.pool_totals(&signal.id).await?;
        let (side_pool, other_pool) = match side {
            Outcome::Hit => (hit, miss),
            Outcome::Miss => (miss, hit),
        };
        Ok(pool_odds_bps(side_pool, other_pool, self.config.virtual_liquidity))
    }

    /// Place a PENDING wager; odds are fixed here and never recomputed
    pub async fn place_wager(
        &self,
        bettor: &str,
        signal_id: &str,
        side: Outcome,
        stake: i64,
    ) -> Result<Wager> {
        validate_amount(stake, "stake", Some(self.config.max_stake))?;

        let signal = self
            .store
            .get_signal(signal_id)
            .await?
            .ok_or_else(|| MarketError::not_found("signal", signal_id))?;

        let now = Utc::now();
        if !signal.accepts_wagers(now) {
            return Err(MarketError::Conflict(format!(
                "signal {} is not accepting wagers",
                signal_id
            )));
        }

        self.store.ensure_provider(bettor, self.initial_karma).await?;
        let odds_bps = self.quote_odds(&signal, side).await?;

        let wager = Wager {
            id: new_id("wgr"),
            signal_id: signal.id.clone(),
            bettor: bettor.to_string(),
            side,
            stake,
            odds_bps,
            status: WagerStatus::Pending,
            payout: None,
            created_at: now,
            settled_at: None,
        };
        self.store.insert_wager(&wager).await?;

        info!(
            wager_id = %wager.id,
            signal_id,
            bettor,
            side = %side,
            stake,
            odds_bps,
            "Wager placed"
        );

        self.notifier.emit(NotifyEvent::WagerPlaced {
            signal_id: wager.signal_id.clone(),
            side,
            stake,
            odds_bps,
        });

        Ok(wager)
    }

    pub async fn list_for_signal(&self, signal_id: &str) -> Result<Vec<Wager>> {
        if self.store.get_signal(signal_id).await?.is_none() {
            return Err(MarketError::not_found("signal", signal_id));
        }
        self.store.list_wagers_for_signal(signal_id).await
    }

    pub async fn list_for_bettor(&self, bettor: &str) -> Result<Vec<Wager>> {
        self.store.list_wagers_for_bettor(bettor).await
    }

    /// Sum of stakes still pending
    pub async fn exposure(&self, bettor: &str) -> Result<i64> {
        self.store.exposure(bettor).await
    }

    pub async fn portfolio(&self, bettor: &str) -> Result<Portfolio> {
        let wagers = self.store.list_wagers_for_bettor(bettor).await?;
        Ok(Portfolio::from_wagers(bettor, &wagers))
    }
}
