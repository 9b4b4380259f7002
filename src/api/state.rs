use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::adapters::{
    gateway_from_config, BalanceSource, MarketGateway, NotificationSink, RpcBalanceClient,
    SqliteStore, StaticBalances,
};
use crate::api::types::WsMessage;
use crate::config::AppConfig;
use crate::error::Result;
use crate::services::{AccessService, KnowledgeService, SignalService, TokenBalances, WagerLedger};
use crate::signing::{SessionTokens, SignatureVerifier};

const WS_CHANNEL_CAPACITY: usize = 256;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    /// Database connection pool
    pub store: Arc<SqliteStore>,

    pub signals: Arc<SignalService>,
    pub wagers: Arc<WagerLedger>,
    pub access: Arc<AccessService>,
    pub knowledge: Arc<KnowledgeService>,

    pub verifier: SignatureVerifier,
    pub sessions: SessionTokens,

    /// WebSocket broadcast channel
    pub ws_tx: broadcast::Sender<WsMessage>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    /// Wire services over explicit collaborators
    pub fn build(
        config: AppConfig,
        store: Arc<SqliteStore>,
        balance_source: Arc<dyn BalanceSource>,
        markets: Arc<dyn MarketGateway>,
        notifier: NotificationSink,
    ) -> Result<Self> {
        let balances = Arc::new(TokenBalances::new(
            balance_source,
            config.chain.balance_cache_secs,
        ));

        let signals = SignalService::new(
            store.clone(),
            balances.clone(),
            markets.clone(),
            notifier.clone(),
            config.karma.clone(),
            config.eligibility.clone(),
        );
        let wagers = WagerLedger::new(
            store.clone(),
            markets,
            notifier.clone(),
            config.wagers.clone(),
            config.karma.initial,
        );
        let access = Arc::new(AccessService::new(
            store.clone(),
            balances,
            config.access.clone(),
        )?);
        let knowledge = KnowledgeService::new(
            store.clone(),
            access.clone(),
            notifier,
            config.knowledge.clone(),
        );

        let (ws_tx, _) = broadcast::channel(WS_CHANNEL_CAPACITY);

        Ok(Self {
            verifier: SignatureVerifier::from_config(&config.auth),
            sessions: SessionTokens::from_config(&config.auth),
            config: Arc::new(config),
            store,
            signals: Arc::new(signals),
            wagers: Arc::new(wagers),
            access,
            knowledge: Arc::new(knowledge),
            ws_tx,
            start_time: Utc::now(),
        })
    }

    /// Wire services from configuration: chain RPC when configured (zero
    /// balances otherwise), the remote market gateway, and Discord.
    pub fn from_config(config: AppConfig, store: Arc<SqliteStore>) -> Result<Self> {
        let balance_source: Arc<dyn BalanceSource> = match RpcBalanceClient::from_config(&config.chain)? {
            Some(client) => Arc::new(client),
            None => {
                info!("chain.rpc_url not set; token balances read as zero");
                Arc::new(StaticBalances::new())
            }
        };
        let markets = gateway_from_config(&config.prediction_market)?;
        let notifier = NotificationSink::from_webhook(config.notify.discord_webhook_url.as_deref());

        Self::build(config, store, balance_source, markets, notifier)
    }

    /// Push an event to every `/ws` subscriber; no subscribers is not an error
    pub fn broadcast(&self, message: WsMessage) {
        let _ = self.ws_tx.send(message);
    }
}
