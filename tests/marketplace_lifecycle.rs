//! End-to-end flows over the service layer, in memory and on a pooled file database

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sigmarket::access::{ChargeMethod, Feature, StakeStatus};
use sigmarket::adapters::{
    DisabledMarketGateway, MarketGateway, MarketRequest, NotificationSink, Orderbook,
    BookLevel, SqliteStore, StaticBalances,
};
use sigmarket::api::AppState;
use sigmarket::config::AppConfig;
use sigmarket::domain::{
    payout_for, Direction, MarketLink, NewSignal, Outcome, SignalStatus, WagerStatus,
};
use sigmarket::error::{MarketError, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const PROVIDER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const BETTOR: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const GURU: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

async fn app_with(markets: Arc<dyn MarketGateway>) -> AppState {
    let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
    let balances = StaticBalances::new();
    balances.set(PROVIDER, 500);
    balances.set(GURU, 1_000);

    AppState::build(
        AppConfig::default_config(),
        store,
        Arc::new(balances),
        markets,
        NotificationSink::disabled(),
    )
    .expect("app state")
}

async fn app() -> AppState {
    app_with(Arc::new(DisabledMarketGateway)).await
}

/// Fresh database file under the temp dir; several pooled connections
struct FileDb {
    path: PathBuf,
}

impl FileDb {
    fn new(name: &str) -> Self {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "sigmarket-{name}-{}-{nanos}.db",
            std::process::id()
        ));
        Self { path }
    }

    async fn app(&self) -> AppState {
        let url = format!("sqlite://{}?mode=rwc", self.path.display());
        let store = SqliteStore::new(&url, 8).await.expect("file store");
        store.migrate().await.expect("migrations");

        AppState::build(
            AppConfig::default_config(),
            Arc::new(store),
            Arc::new(StaticBalances::new()),
            Arc::new(DisabledMarketGateway),
            NotificationSink::disabled(),
        )
        .expect("app state")
    }
}

impl Drop for FileDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.path.clone().into_os_string();
            path.push(suffix);
            let _ = std::fs::remove_file(path);
        }
    }
}

fn btc_long() -> NewSignal {
    NewSignal {
        asset: "BTC".to_string(),
        direction: Direction::Long,
        entry_price: dec!(90000),
        target_price: dec!(92000),
        stop_loss: Some(dec!(88500)),
        timeframe: "24h".to_string(),
        deadline: Utc::now() + Duration::hours(24),
        reasoning: "Reclaimed the weekly open".to_string(),
    }
}

/// Provider starts at 50; one +10 brings them to the 60 the flows expect
async fn seed_provider_at_60(app: &AppState) {
    app.store.ensure_provider(PROVIDER, 50).await.unwrap();
    app.store.adjust_karma(PROVIDER, 10, None).await.unwrap();
}

#[tokio::test]
async fn signal_wager_settlement_flow() {
    let app = app().await;
    seed_provider_at_60(&app).await;

    // Scenario 1
    let signal = app.signals.create_signal(PROVIDER, btc_long()).await.unwrap();
    assert_eq!(signal.status, SignalStatus::Active);
    assert_eq!(signal.karma_at_submit, 60);
    assert_eq!(signal.market_link, MarketLink::Disabled);

    // Scenario 2
    let wager = app
        .wagers
        .place_wager(BETTOR, &signal.id, Outcome::Hit, 100)
        .await
        .unwrap();
    assert_eq!(wager.status, WagerStatus::Pending);
    assert_eq!(wager.stake, 100);

    // Scenario 3
    let report = app
        .signals
        .settle_signal(&signal.id, Outcome::Hit, Some(dec!(92150)))
        .await
        .unwrap();
    assert_eq!(report.signal.status, SignalStatus::Settled);
    assert_eq!(report.signal.outcome, Some(Outcome::Hit));
    assert_eq!(report.provider_karma, 70);
    assert_eq!(report.wagers.len(), 1);
    let settled = &report.wagers[0];
    assert_eq!(settled.status, WagerStatus::Won);
    assert_eq!(settled.payout, Some(payout_for(100, wager.odds_bps)));

    // Scenario 4
    let err = app
        .signals
        .settle_signal(&signal.id, Outcome::Hit, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::AlreadySettled(_)));
    assert_eq!(err.status_code(), 409);

    let provider = app.store.get_provider(PROVIDER).await.unwrap().unwrap();
    assert_eq!(provider.karma, 70);
    assert_eq!(provider.wins, 1);

    // the wager keeps its payout; nothing moved it twice
    let wagers = app.wagers.list_for_signal(&signal.id).await.unwrap();
    assert_eq!(wagers[0].payout, settled.payout);
}

#[tokio::test]
async fn concurrent_settlement_applies_karma_once() {
    let app = app().await;
    seed_provider_at_60(&app).await;
    let signal = app.signals.create_signal(PROVIDER, btc_long()).await.unwrap();
    app.wagers
        .place_wager(BETTOR, &signal.id, Outcome::Miss, 250)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let signals = app.signals.clone();
        let id = signal.id.clone();
        handles.push(tokio::spawn(async move {
            signals.settle_signal(&id, Outcome::Miss, None).await
        }));
    }

    let mut succeeded = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(MarketError::AlreadySettled(_)) => conflicts += 1,
            Err(other) => panic!("unexpected settlement error: {other}"),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(conflicts, 7);

    let provider = app.store.get_provider(PROVIDER).await.unwrap().unwrap();
    assert_eq!(provider.karma, 55);
    assert_eq!(provider.losses, 1);

    let wagers = app.wagers.list_for_bettor(BETTOR).await.unwrap();
    assert_eq!(wagers.len(), 1);
    assert_eq!(wagers[0].status, WagerStatus::Won);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settlement_on_a_pooled_file_database_applies_karma_once() {
    let db = FileDb::new("settle");
    let app = db.app().await;
    seed_provider_at_60(&app).await;
    let signal = app.signals.create_signal(PROVIDER, btc_long()).await.unwrap();
    app.wagers
        .place_wager(BETTOR, &signal.id, Outcome::Hit, 100)
        .await
        .unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(8));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let signals = app.signals.clone();
        let id = signal.id.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            signals.settle_signal(&id, Outcome::Hit, None).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(report) => {
                succeeded += 1;
                assert_eq!(report.signal.status, SignalStatus::Settled);
                assert_eq!(report.wagers.len(), 1);
            }
            Err(MarketError::AlreadySettled(_)) => {}
            Err(other) => panic!("unexpected settlement error: {other}"),
        }
    }
    assert_eq!(succeeded, 1);

    let provider = app.store.get_provider(PROVIDER).await.unwrap().unwrap();
    assert_eq!(provider.karma, 70);
    assert_eq!(provider.wins, 1);

    let wagers = app.wagers.list_for_bettor(BETTOR).await.unwrap();
    assert_eq!(wagers[0].status, WagerStatus::Won);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_consumers_cannot_both_take_the_last_credit() {
    let db = FileDb::new("credits");
    let app = db.app().await;
    app.access.purchase(BETTOR, Some("SINGLE"), None).await.unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let access = app.access.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            access
                .consume(BETTOR, Feature::KnowledgeQuery, false, false, None)
                .await
        }));
    }

    let mut credits = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.charged_via, ChargeMethod::Credit);
                credits += 1;
            }
            Err(MarketError::QuotaExceeded(_)) => refused += 1,
            Err(other) => panic!("unexpected consume error: {other}"),
        }
    }
    assert_eq!((credits, refused), (1, 1));

    let summary = app.access.credits(BETTOR).await.unwrap();
    assert_eq!(summary.remaining, 0);
    assert_eq!(summary.purchases[0].credits_remaining, 0);
}

#[tokio::test]
async fn karma_can_go_negative_without_a_floor() {
    let app = app().await;
    app.store.ensure_provider(PROVIDER, 50).await.unwrap();
    let karma = app.store.adjust_karma(PROVIDER, -60, None).await.unwrap();
    assert_eq!(karma, -10);

    let err = app
        .signals
        .create_signal(PROVIDER, btc_long())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn top_token_tier_is_unlimited_regardless_of_stake() {
    // Scenario 5
    let app = app().await;

    let quote = app
        .access
        .tier_for(GURU, Feature::KnowledgeQuery, false)
        .await
        .unwrap();
    assert!(quote.unlimited);
    assert_eq!(quote.fee_per_action, 0);

    app.access.stake(GURU, 10).await.unwrap();
    let quote = app
        .access
        .tier_for(GURU, Feature::KnowledgeQuery, true)
        .await
        .unwrap();
    assert!(quote.unlimited);
    assert_eq!(quote.fee_per_action, 0);
}

#[tokio::test]
async fn unstake_returns_principal_minus_fee() {
    // Scenario 6
    let app = app().await;
    let stake = app.access.stake(BETTOR, 100).await.unwrap();
    assert_eq!(stake.status, StakeStatus::Active);

    let unstaked = app.access.unstake(BETTOR, &stake.id).await.unwrap();
    assert_eq!(unstaked.split.returned, 95);
    assert_eq!(unstaked.split.fee, 5);
    assert_eq!(unstaked.split.returned + unstaked.split.fee, 100);
    assert_eq!(unstaked.stake.returned, Some(95));
    assert_eq!(unstaked.stake.fee_paid, Some(5));

    let stakes = app.access.list_stakes(BETTOR).await.unwrap();
    assert_eq!(stakes[0].status, StakeStatus::Withdrawn);
}

#[tokio::test]
async fn credits_are_spent_oldest_first_and_never_go_negative() {
    let app = app().await;

    let first = app.access.purchase(BETTOR, Some("SINGLE"), None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = app.access.purchase(BETTOR, Some("PACK_10"), None).await.unwrap();

    let receipt = app
        .access
        .consume(BETTOR, Feature::KnowledgeQuery, false, false, None)
        .await
        .unwrap();
    assert_eq!(receipt.charged_via, ChargeMethod::Credit);
    assert_eq!(receipt.purchase_id.as_deref(), Some(first.id.as_str()));

    let receipt = app
        .access
        .consume(BETTOR, Feature::KnowledgeQuery, false, false, None)
        .await
        .unwrap();
    assert_eq!(receipt.purchase_id.as_deref(), Some(second.id.as_str()));

    for _ in 0..9 {
        app.access
            .consume(BETTOR, Feature::KnowledgeQuery, false, false, None)
            .await
            .unwrap();
    }
    let summary = app.access.credits(BETTOR).await.unwrap();
    assert_eq!(summary.remaining, 0);
    assert!(summary.purchases.iter().all(|p| p.credits_remaining >= 0));

    let err = app
        .access
        .consume(BETTOR, Feature::KnowledgeQuery, false, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::QuotaExceeded(_)));
}

/// Remote market stand-in: records creations and serves a fixed book
#[derive(Default)]
struct RecordingGateway {
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl MarketGateway for RecordingGateway {
    async fn create_market(&self, request: &MarketRequest) -> Result<String> {
        let mut created = self.created.lock().unwrap();
        created.push(request.external_id.clone());
        Ok(format!("mkt_{}", created.len()))
    }

    async fn get_orderbook(&self, _market_id: &str) -> Result<Orderbook> {
        Ok(Orderbook {
            bids: vec![BookLevel {
                price: dec!(0.70),
                size: dec!(500),
            }],
            asks: vec![BookLevel {
                price: dec!(0.74),
                size: dec!(500),
            }],
        })
    }
}

#[tokio::test]
async fn linked_signal_settles_from_market_callback() {
    let gateway = Arc::new(RecordingGateway::default());
    let app = app_with(gateway.clone()).await;
    seed_provider_at_60(&app).await;

    let signal = app.signals.create_signal(PROVIDER, btc_long()).await.unwrap();
    assert_eq!(signal.market_link, MarketLink::Pending);
    assert!(signal.market_id.is_none());

    // linkage completes in the background
    let mut linked = None;
    for _ in 0..50 {
        let current = app.signals.get_signal(&signal.id).await.unwrap();
        if current.market_link == MarketLink::Linked {
            linked = Some(current);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let linked = linked.expect("signal was never linked");
    assert_eq!(linked.market_id.as_deref(), Some("mkt_1"));
    assert_eq!(gateway.created.lock().unwrap().as_slice(), &[signal.id.clone()]);

    let wager = app
        .wagers
        .place_wager(BETTOR, &signal.id, Outcome::Hit, 72)
        .await
        .unwrap();
    assert_eq!(wager.odds_bps, 7_200);

    let report = app
        .signals
        .on_market_resolved("mkt_1", Outcome::Hit, Some(dec!(92010)))
        .await
        .unwrap();
    assert_eq!(report.signal.id, signal.id);
    assert_eq!(report.wagers[0].payout, Some(100));
}
