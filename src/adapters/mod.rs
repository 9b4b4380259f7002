pub mod api_server;
pub mod chain_rpc;
pub mod discord;
pub mod prediction_market;
pub mod sqlite;

pub use api_server::start_api_server;
pub use chain_rpc::{BalanceSource, RpcBalanceClient, StaticBalances};
pub use discord::{DiscordNotifier, NotificationSink, Notifier, NotifyEvent};
pub use prediction_market::{
    gateway_from_config, BookLevel, DisabledMarketGateway, HttpMarketGateway, MarketGateway,
    MarketRequest, Orderbook,
};
pub use sqlite::{KarmaRule, SettlementReport, SignalFilter, SqliteStore};
