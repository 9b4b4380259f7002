use crate::access::{
    next_purchase_to_consume, ChargeMethod, Feature, Purchase, Stake, StakeStatus, UnstakeSplit,
};
use crate::domain::{
    apply_vote, EntryStatus, KnowledgeEntry, MarketLink, NewKnowledgeEntry, NewSignal, Outcome, Provider,
    Signal, SignalStatus, VoteDirection, Wager, WagerStatus,
};
use crate::error::{MarketError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Karma change applied when a signal settles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KarmaRule {
    pub hit_delta: i64,
    pub miss_delta: i64,
    pub floor: Option<i64>,
}

impl KarmaRule {
    pub fn delta_for(&self, outcome: Outcome) -> i64 {
        match outcome {
            Outcome::Hit => self.hit_delta,
            Outcome::Miss => self.miss_delta,
        }
    }
}

/// Everything that changed in one settlement transaction
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub signal: Signal,
    pub karma_delta: i64,
    pub provider_karma: i64,
    /// Wagers this settlement moved out of PENDING
    pub wagers: Vec<Wager>,
}

/// Signal list filter
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub status: Option<SignalStatus>,
    pub provider: Option<String>,
    pub limit: i64,
}

/// SQLite storage adapter
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `database_url`
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        if !in_memory {
            ensure_parent_dir(database_url)?;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // an in-memory database lives and dies with its only connection
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(options)
                .await?
        };

        info!(in_memory, "Connected to SQLite");
        Ok(Self { pool })
    }

    /// Fresh in-memory store with migrations applied
    pub async fn in_memory() -> Result<Self> {
        let store = Self::new("sqlite::memory:", 1).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ==================== Providers ====================

    /// Create the provider row if it does not exist yet
    #[instrument(skip(self))]
    pub async fn ensure_provider(&self, address: &str, initial_karma: i64) -> Result<Provider> {
        let now = to_millis(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO providers (address, karma, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(address)
        .bind(initial_karma)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_provider(address)
            .await?
            .ok_or_else(|| MarketError::not_found("provider", address))
    }

    pub async fn get_provider(&self, address: &str) -> Result<Option<Provider>> {
        let row = sqlx::query("SELECT * FROM providers WHERE address = ?1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(provider_from_row).transpose()
    }

    /// Atomic `karma = karma + delta`, optionally floored
    #[instrument(skip(self))]
    pub async fn adjust_karma(&self, address: &str, delta: i64, floor: Option<i64>) -> Result<i64> {
        let karma: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE providers
            SET karma = CASE WHEN ?3 IS NULL THEN karma + ?2 ELSE MAX(karma + ?2, ?3) END,
                updated_at = ?4
            WHERE address = ?1
            RETURNING karma
            "#,
        )
        .bind(address)
        .bind(delta)
        .bind(floor)
        .bind(to_millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        karma.ok_or_else(|| MarketError::not_found("provider", address))
    }

    /// Providers ordered by karma, with their active signal counts
    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<(Provider, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT p.*,
                   (SELECT COUNT(*) FROM signals s
                    WHERE s.provider = p.address AND s.status = 'ACTIVE') AS active_signals
            FROM providers p
            WHERE p.signals_posted > 0
            ORDER BY p.karma DESC, p.wins DESC, p.address ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(Provider, i64)> {
                Ok((provider_from_row(row)?, row.try_get("active_signals")?))
            })
            .collect()
    }

    pub async fn count_active_signals(&self, provider: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM signals WHERE provider = ?1 AND status = 'ACTIVE'",
        )
        .bind(provider)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    // ==================== Signals ====================

    /// Insert a signal, snapshotting the provider's karma in the same statement
    #[instrument(skip(self, input), fields(asset = %input.asset))]
    pub async fn insert_signal(
        &self,
        id: &str,
        provider: &str,
        input: &NewSignal,
        market_link: MarketLink,
        now: DateTime<Utc>,
    ) -> Result<Signal> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO signals (
                id, provider, asset, direction, entry_price, target_price, stop_loss,
                timeframe, deadline, karma_at_submit, reasoning, market_link, created_at
            )
            SELECT ?1, address, ?2, ?3, ?4, ?5, ?6, ?7, ?8, karma, ?9, ?10, ?11
            FROM providers WHERE address = ?12
            "#,
        )
        .bind(id)
        .bind(input.normalized_asset())
        .bind(input.direction.as_str())
        .bind(input.entry_price.to_string())
        .bind(input.target_price.to_string())
        .bind(input.stop_loss.map(|d| d.to_string()))
        .bind(input.timeframe.trim())
        .bind(to_millis(input.deadline))
        .bind(&input.reasoning)
        .bind(market_link.as_str())
        .bind(to_millis(now))
        .bind(provider)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(MarketError::not_found("provider", provider));
        }

        sqlx::query(
            "UPDATE providers SET signals_posted = signals_posted + 1, updated_at = ?2 WHERE address = ?1",
        )
        .bind(provider)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM signals WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let signal = signal_from_row(&row)?;

        tx.commit().await?;
        debug!(signal_id = %id, "Inserted signal");
        Ok(signal)
    }

    pub async fn get_signal(&self, id: &str) -> Result<Option<Signal>> {
        let row = sqlx::query("SELECT * FROM signals WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    pub async fn find_signal_by_market(&self, market_id: &str) -> Result<Option<Signal>> {
        let row = sqlx::query("SELECT * FROM signals WHERE market_id = ?1")
            .bind(market_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    /// Signals by recency, optionally filtered by status and provider
    pub async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM signals
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR provider = ?2)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.provider.as_deref())
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    /// Record the outcome of market linkage
    #[instrument(skip(self))]
    pub async fn set_market_link(
        &self,
        signal_id: &str,
        market_id: Option<&str>,
        link: MarketLink,
    ) -> Result<()> {
        sqlx::query("UPDATE signals SET market_id = ?2, market_link = ?3 WHERE id = ?1")
            .bind(signal_id)
            .bind(market_id)
            .bind(link.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Settle a signal exactly once.
    ///
    /// The claim is a conditional update keyed on `status = 'ACTIVE'`, so of
    /// any number of concurrent calls only one sees a row change; the write
    /// it makes holds the database lock until commit. The terminal status,
    /// karma, win/loss counters and every pending wager move in the same
    /// transaction.
    #[instrument(skip(self))]
    pub async fn settle_signal(
        &self,
        signal_id: &str,
        outcome: Outcome,
        result_price: Option<Decimal>,
        karma: KarmaRule,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport> {
        let mut tx = self.pool.begin().await?;
        let now_ms = to_millis(now);

        let claimed = sqlx::query(
            r#"
            UPDATE signals
            SET outcome = ?2, result_price = ?3, settled_at = ?4
            WHERE id = ?1 AND status = 'ACTIVE'
            "#,
        )
        .bind(signal_id)
        .bind(outcome.as_str())
        .bind(result_price.map(|d| d.to_string()))
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let exists: Option<String> = sqlx::query_scalar("SELECT status FROM signals WHERE id = ?1")
                .bind(signal_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(status) => {
                    MarketError::AlreadySettled(format!("signal {} is already {}", signal_id, status))
                }
                None => MarketError::not_found("signal", signal_id),
            });
        }

        let wager_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wagers WHERE signal_id = ?1")
            .bind(signal_id)
            .fetch_one(&mut *tx)
            .await?;
        let terminal = SignalStatus::terminal_for(usize::try_from(wager_count).unwrap_or(0));
        sqlx::query("UPDATE signals SET status = ?2 WHERE id = ?1")
            .bind(signal_id)
            .bind(terminal.as_str())
            .execute(&mut *tx)
            .await?;

        let delta = karma.delta_for(outcome);
        let (wins, losses) = match outcome {
            Outcome::Hit => (1, 0),
            Outcome::Miss => (0, 1),
        };
        let provider_karma: i64 = sqlx::query_scalar(
            r#"
            UPDATE providers
            SET karma = CASE WHEN ?3 IS NULL THEN karma + ?2 ELSE MAX(karma + ?2, ?3) END,
                wins = wins + ?4,
                losses = losses + ?5,
                updated_at = ?6
            WHERE address = (SELECT provider FROM signals WHERE id = ?1)
            RETURNING karma
            "#,
        )
        .bind(signal_id)
        .bind(delta)
        .bind(karma.floor)
        .bind(wins)
        .bind(losses)
        .bind(now_ms)
        .fetch_one(&mut *tx)
        .await?;

        let pending = sqlx::query(
            "SELECT * FROM wagers WHERE signal_id = ?1 AND status = 'PENDING' ORDER BY created_at, id",
        )
        .bind(signal_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut settled = Vec::with_capacity(pending.len());
        for row in &pending {
            let mut wager = wager_from_row(row)?;
            let (status, payout) = wager.resolve(outcome);

            let updated = sqlx::query(
                r#"
                UPDATE wagers SET status = ?2, payout = ?3, settled_at = ?4
                WHERE id = ?1 AND status = 'PENDING'
                "#,
            )
            .bind(&wager.id)
            .bind(status.as_str())
            .bind(payout)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 1 {
                wager.status = status;
                wager.payout = Some(payout);
                wager.settled_at = Some(from_millis(now_ms)?);
                settled.push(wager);
            }
        }

        let row = sqlx::query("SELECT * FROM signals WHERE id = ?1")
            .bind(signal_id)
            .fetch_one(&mut *tx)
            .await?;
        let signal = signal_from_row(&row)?;

        tx.commit().await?;
        info!(
            signal_id,
            outcome = %outcome,
            karma_delta = delta,
            wagers = settled.len(),
            "Signal settled"
        );

        Ok(SettlementReport {
            signal,
            karma_delta: delta,
            provider_karma,
            wagers: settled,
        })
    }

    /// Record an upvote; `DuplicateVote` if this voter already upvoted
    #[instrument(skip(self))]
    pub async fn upvote_signal(&self, signal_id: &str, voter: &str) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO signal_upvotes (signal_id, voter, created_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (signal_id, voter) DO NOTHING
            "#,
        )
        .bind(signal_id)
        .bind(voter)
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(MarketError::DuplicateVote(format!(
                "{} already upvoted signal {}",
                voter, signal_id
            )));
        }

        let upvotes: i64 = sqlx::query_scalar(
            "UPDATE signals SET upvotes = upvotes + 1 WHERE id = ?1 RETURNING upvotes",
        )
        .bind(signal_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(upvotes)
    }

    // ==================== Wagers ====================

    /// Insert a wager and bump the signal's volume in one transaction.
    /// Fails with `Conflict` once the signal has left ACTIVE or passed its deadline.
    #[instrument(skip(self, wager), fields(wager_id = %wager.id, signal_id = %wager.signal_id))]
    pub async fn insert_wager(&self, wager: &Wager) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let created = to_millis(wager.created_at);

        let bumped = sqlx::query(
            r#"
            UPDATE signals SET total_wagered = total_wagered + ?2
            WHERE id = ?1 AND status = 'ACTIVE' AND deadline > ?3
            "#,
        )
        .bind(&wager.signal_id)
        .bind(wager.stake)
        .bind(created)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            let exists: Option<String> = sqlx::query_scalar("SELECT status FROM signals WHERE id = ?1")
                .bind(&wager.signal_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => MarketError::Conflict(format!(
                    "signal {} is not accepting wagers",
                    wager.signal_id
                )),
                None => MarketError::not_found("signal", &wager.signal_id),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO wagers (id, signal_id, bettor, side, stake, odds_bps, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7)
            "#,
        )
        .bind(&wager.id)
        .bind(&wager.signal_id)
        .bind(&wager.bettor)
        .bind(wager.side.as_str())
        .bind(wager.stake)
        .bind(wager.odds_bps)
        .bind(created)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_wagers_for_signal(&self, signal_id: &str) -> Result<Vec<Wager>> {
        let rows = sqlx::query("SELECT * FROM wagers WHERE signal_id = ?1 ORDER BY created_at, id")
            .bind(signal_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(wager_from_row).collect()
    }

    pub async fn list_wagers_for_bettor(&self, bettor: &str) -> Result<Vec<Wager>> {
        let rows = sqlx::query("SELECT * FROM wagers WHERE bettor = ?1 ORDER BY created_at DESC, id")
            .bind(bettor)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(wager_from_row).collect()
    }

    /// Total staked on (HIT, MISS) for a signal
    pub async fn pool_totals(&self, signal_id: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(CASE WHEN side = 'HIT' THEN stake END), 0) AS hit,
                   COALESCE(SUM(CASE WHEN side = 'MISS' THEN stake END), 0) AS miss
            FROM wagers WHERE signal_id = ?1
            "#,
        )
        .bind(signal_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_get("hit")?, row.try_get("miss")?))
    }

    pub async fn exposure(&self, bettor: &str) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(stake), 0) FROM wagers WHERE bettor = ?1 AND status = 'PENDING'",
        )
        .bind(bettor)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    // ==================== Knowledge ====================

    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn insert_knowledge(
        &self,
        id: &str,
        contributor: &str,
        input: &NewKnowledgeEntry,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeEntry> {
        let tags = serde_json::to_string(&input.normalized_tags())?;
        sqlx::query(
            r#"
            INSERT INTO knowledge_entries (id, contributor, title, content, category, tags, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(id)
        .bind(contributor)
        .bind(input.title.trim())
        .bind(&input.content)
        .bind(input.category.trim().to_lowercase())
        .bind(tags)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        self.get_knowledge(id)
            .await?
            .ok_or_else(|| MarketError::not_found("knowledge entry", id))
    }

    pub async fn get_knowledge(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        let row = sqlx::query("SELECT * FROM knowledge_entries WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(knowledge_from_row).transpose()
    }

    /// Entries by quality, optionally in one category
    pub async fn list_knowledge(&self, category: Option<&str>, limit: i64) -> Result<Vec<KnowledgeEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM knowledge_entries
            WHERE (?1 IS NULL OR category = ?1)
            ORDER BY quality_score DESC, created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(category.map(|c| c.trim().to_lowercase()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(knowledge_from_row).collect()
    }

    /// Record a vote and move the score, clamped to [0, 100]
    #[instrument(skip(self))]
    pub async fn vote_knowledge(
        &self,
        entry_id: &str,
        voter: &str,
        direction: VoteDirection,
        delta: i64,
    ) -> Result<KnowledgeEntry> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO knowledge_votes (entry_id, voter, direction, created_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (entry_id, voter) DO NOTHING
            "#,
        )
        .bind(entry_id)
        .bind(voter)
        .bind(direction.as_str())
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(MarketError::DuplicateVote(format!(
                "{} already voted on entry {}",
                voter, entry_id
            )));
        }

        // the vote insert above holds the write lock, so this read is current
        let score: i64 = sqlx::query_scalar("SELECT quality_score FROM knowledge_entries WHERE id = ?1")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MarketError::not_found("knowledge entry", entry_id))?;
        let score = apply_vote(score, delta);

        sqlx::query("UPDATE knowledge_entries SET quality_score = ?2, status = ?3 WHERE id = ?1")
            .bind(entry_id)
            .bind(score)
            .bind(EntryStatus::for_score(score).as_str())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT * FROM knowledge_entries WHERE id = ?1")
            .bind(entry_id)
            .fetch_one(&mut *tx)
            .await?;
        let entry = knowledge_from_row(&row)?;

        tx.commit().await?;
        Ok(entry)
    }

    /// Count a paid query and credit the contributor's share
    pub async fn record_knowledge_query(&self, entry_id: &str, earned: i64) -> Result<KnowledgeEntry> {
        let row = sqlx::query(
            r#"
            UPDATE knowledge_entries
            SET query_count = query_count + 1, earnings = earnings + ?2
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(entry_id)
        .bind(earned)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => knowledge_from_row(&row),
            None => Err(MarketError::not_found("knowledge entry", entry_id)),
        }
    }

    // ==================== Stakes ====================

    #[instrument(skip(self))]
    pub async fn insert_stake(&self, id: &str, holder: &str, amount: i64, now: DateTime<Utc>) -> Result<Stake> {
        sqlx::query(
            "INSERT INTO stakes (id, holder, amount, status, created_at) VALUES (?1, ?2, ?3, 'ACTIVE', ?4)",
        )
        .bind(id)
        .bind(holder)
        .bind(amount)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        self.get_stake(id)
            .await?
            .ok_or_else(|| MarketError::not_found("stake", id))
    }

    pub async fn get_stake(&self, id: &str) -> Result<Option<Stake>> {
        let row = sqlx::query("SELECT * FROM stakes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(stake_from_row).transpose()
    }

    pub async fn list_stakes(&self, holder: &str) -> Result<Vec<Stake>> {
        let rows = sqlx::query("SELECT * FROM stakes WHERE holder = ?1 ORDER BY created_at, id")
            .bind(holder)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(stake_from_row).collect()
    }

    pub async fn active_stake_total(&self, holder: &str) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM stakes WHERE holder = ?1 AND status = 'ACTIVE'",
        )
        .bind(holder)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    /// Withdraw an active stake; `Conflict` if it was already withdrawn
    #[instrument(skip(self))]
    pub async fn withdraw_stake(
        &self,
        id: &str,
        holder: &str,
        split: UnstakeSplit,
        now: DateTime<Utc>,
    ) -> Result<Stake> {
        let row = sqlx::query(
            r#"
            UPDATE stakes
            SET status = 'WITHDRAWN', fee_paid = ?3, returned = ?4, withdrawn_at = ?5
            WHERE id = ?1 AND holder = ?2 AND status = 'ACTIVE'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(holder)
        .bind(split.fee)
        .bind(split.returned)
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => stake_from_row(&row),
            None => Err(MarketError::Conflict(format!("stake {} is not active", id))),
        }
    }

    // ==================== Purchases ====================

    #[instrument(skip(self, purchase), fields(purchase_id = %purchase.id))]
    pub async fn insert_purchase(&self, purchase: &Purchase) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO purchases (
                id, holder, package, price_paid, credits_total, credits_remaining, expires_at, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&purchase.id)
        .bind(&purchase.holder)
        .bind(&purchase.package)
        .bind(purchase.price_paid)
        .bind(purchase.credits_total)
        .bind(purchase.credits_remaining)
        .bind(purchase.expires_at.map(to_millis))
        .bind(to_millis(purchase.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Purchases oldest first
    pub async fn list_purchases(&self, holder: &str) -> Result<Vec<Purchase>> {
        let rows = sqlx::query("SELECT * FROM purchases WHERE holder = ?1 ORDER BY created_at, id")
            .bind(holder)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(purchase_from_row).collect()
    }

    /// Take one credit from the oldest usable purchase.
    ///
    /// The decrement is conditional on the purchase still having a credit, so
    /// two requests racing for the last one cannot both win; the loser picks
    /// again from a fresh listing. Returns the purchase drawn from.
    #[instrument(skip(self))]
    pub async fn consume_credit(&self, holder: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        loop {
            let purchases = self.list_purchases(holder).await?;
            let Some(pick) = next_purchase_to_consume(&purchases, now) else {
                return Ok(None);
            };

            let taken = sqlx::query(
                r#"
                UPDATE purchases
                SET credits_remaining = credits_remaining - 1
                WHERE id = ?1
                  AND credits_remaining > 0
                  AND (expires_at IS NULL OR expires_at > ?2)
                "#,
            )
            .bind(&pick.id)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?;

            if taken.rows_affected() == 1 {
                return Ok(Some(pick.id.clone()));
            }
            debug!(holder, purchase = %pick.id, "Credit taken concurrently, retrying");
        }
    }

    // ==================== Usage ====================

    /// Record a free-quota use if fewer than `quota` were used since
    /// `period_start`; false when the quota is gone
    pub async fn try_use_free_quota(
        &self,
        holder: &str,
        feature: Feature,
        quota: u32,
        period_start: DateTime<Utc>,
        reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO usage_events (holder, feature, charged_via, fee, reference, created_at)
            SELECT ?1, ?2, 'FREE_QUOTA', 0, ?5, ?6
            WHERE (
                SELECT COUNT(*) FROM usage_events
                WHERE holder = ?1 AND feature = ?2 AND charged_via = 'FREE_QUOTA' AND created_at >= ?4
            ) < ?3
            "#,
        )
        .bind(holder)
        .bind(feature.as_str())
        .bind(quota as i64)
        .bind(to_millis(period_start))
        .bind(reference)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    pub async fn record_usage(
        &self,
        holder: &str,
        feature: Feature,
        charged_via: ChargeMethod,
        fee: i64,
        purchase_id: Option<&str>,
        reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_events (holder, feature, charged_via, fee, purchase_id, reference, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(holder)
        .bind(feature.as_str())
        .bind(charged_via.as_str())
        .bind(fee)
        .bind(purchase_id)
        .bind(reference)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Free-quota uses of `feature` since `period_start`
    pub async fn free_uses_since(
        &self,
        holder: &str,
        feature: Feature,
        period_start: DateTime<Utc>,
    ) -> Result<u32> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM usage_events
            WHERE holder = ?1 AND feature = ?2 AND charged_via = 'FREE_QUOTA' AND created_at >= ?3
            "#,
        )
        .bind(holder)
        .bind(feature.as_str())
        .bind(to_millis(period_start))
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }
}

// ==================== Row mapping ====================

fn ensure_parent_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| MarketError::Internal(format!("timestamp out of range: {}", ms)))
}

fn opt_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| MarketError::Internal(format!("bad decimal {:?}: {}", s, e)))
}

fn parse_enum<T>(s: &str) -> Result<T>
where
    T: for<'a> TryFrom<&'a str, Error = String>,
{
    T::try_from(s).map_err(MarketError::Internal)
}

fn provider_from_row(row: &SqliteRow) -> Result<Provider> {
    Ok(Provider {
        address: row.try_get("address")?,
        karma: row.try_get("karma")?,
        wins: row.try_get("wins")?,
        losses: row.try_get("losses")?,
        signals_posted: row.try_get("signals_posted")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn signal_from_row(row: &SqliteRow) -> Result<Signal> {
    let stop_loss: Option<String> = row.try_get("stop_loss")?;
    let outcome: Option<String> = row.try_get("outcome")?;
    let result_price: Option<String> = row.try_get("result_price")?;

    Ok(Signal {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        asset: row.try_get("asset")?,
        direction: parse_enum(row.try_get::<&str, _>("direction")?)?,
        entry_price: parse_decimal(row.try_get("entry_price")?)?,
        target_price: parse_decimal(row.try_get("target_price")?)?,
        stop_loss: stop_loss.as_deref().map(parse_decimal).transpose()?,
        timeframe: row.try_get("timeframe")?,
        deadline: from_millis(row.try_get("deadline")?)?,
        karma_at_submit: row.try_get("karma_at_submit")?,
        reasoning: row.try_get("reasoning")?,
        status: parse_enum::<SignalStatus>(row.try_get::<&str, _>("status")?)?,
        outcome: outcome.as_deref().map(parse_enum::<Outcome>).transpose()?,
        result_price: result_price.as_deref().map(parse_decimal).transpose()?,
        total_wagered: row.try_get("total_wagered")?,
        upvotes: row.try_get("upvotes")?,
        market_id: row.try_get("market_id")?,
        market_link: parse_enum::<MarketLink>(row.try_get::<&str, _>("market_link")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        settled_at: opt_millis(row.try_get("settled_at")?)?,
    })
}

fn wager_from_row(row: &SqliteRow) -> Result<Wager> {
    Ok(Wager {
        id: row.try_get("id")?,
        signal_id: row.try_get("signal_id")?,
        bettor: row.try_get("bettor")?,
        side: parse_enum::<Outcome>(row.try_get::<&str, _>("side")?)?,
        stake: row.try_get("stake")?,
        odds_bps: row.try_get("odds_bps")?,
        status: parse_enum::<WagerStatus>(row.try_get::<&str, _>("status")?)?,
        payout: row.try_get("payout")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        settled_at: opt_millis(row.try_get("settled_at")?)?,
    })
}

fn knowledge_from_row(row: &SqliteRow) -> Result<KnowledgeEntry> {
    let tags: String = row.try_get("tags")?;
    Ok(KnowledgeEntry {
        id: row.try_get("id")?,
        contributor: row.try_get("contributor")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        category: row.try_get("category")?,
        tags: serde_json::from_str(&tags)?,
        quality_score: row.try_get("quality_score")?,
        query_count: row.try_get("query_count")?,
        earnings: row.try_get("earnings")?,
        status: parse_enum::<EntryStatus>(row.try_get::<&str, _>("status")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn stake_from_row(row: &SqliteRow) -> Result<Stake> {
    Ok(Stake {
        id: row.try_get("id")?,
        holder: row.try_get("holder")?,
        amount: row.try_get("amount")?,
        status: parse_enum::<StakeStatus>(row.try_get::<&str, _>("status")?)?,
        fee_paid: row.try_get("fee_paid")?,
        returned: row.try_get("returned")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        withdrawn_at: opt_millis(row.try_get("withdrawn_at")?)?,
    })
}

fn purchase_from_row(row: &SqliteRow) -> Result<Purchase> {
    Ok(Purchase {
        id: row.try_get("id")?,
        holder: row.try_get("holder")?,
        package: row.try_get("package")?,
        price_paid: row.try_get("price_paid")?,
        credits_total: row.try_get("credits_total")?,
        credits_remaining: row.try_get("credits_remaining")?,
        expires_at: opt_millis(row.try_get("expires_at")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}
