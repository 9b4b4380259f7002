use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::AccessService;
use crate::access::{AccessReceipt, Feature};
use crate::adapters::{NotificationSink, NotifyEvent, SqliteStore};
use crate::config::KnowledgeConfig;
use crate::domain::{new_id, KnowledgeEntry, KnowledgeSummary, NewKnowledgeEntry, VoteDirection};
use crate::error::{MarketError, Result};

/// A paid query: the entry content and how it was paid for
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeAnswer {
    pub entry: KnowledgeEntry,
    pub receipt: AccessReceipt,
    /// Amount credited to the contributor
    pub contributor_earned: i64,
}

/// Shared knowledge pool
pub struct KnowledgeService {
    store: Arc<SqliteStore>,
    access: Arc<AccessService>,
    notifier: NotificationSink,
    config: KnowledgeConfig,
}

impl KnowledgeService {
    pub fn new(
        store: Arc<SqliteStore>,
        access: Arc<AccessService>,
        notifier: NotificationSink,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            store,
            access,
            notifier,
            config,
        }
    }

    pub async fn create_entry(&self, contributor: &str, input: NewKnowledgeEntry) -> Result<KnowledgeEntry> {
        input.validate()?;
        let entry = self
            .store
            .insert_knowledge(&new_id("kn"), contributor, &input, Utc::now())
            .await?;
        info!(entry_id = %entry.id, contributor, category = %entry.category, "Knowledge entry created");
        Ok(entry)
    }

    /// Listings omit content; content is only returned by a paid query
    pub async fn list_entries(&self, category: Option<&str>, limit: i64) -> Result<Vec<KnowledgeSummary>> {
        let entries = self.store.list_knowledge(category, limit).await?;
        Ok(entries.into_iter().map(KnowledgeSummary::from).collect())
    }

    async fn get_entry(&self, entry_id: &str) -> Result<KnowledgeEntry> {
        self.store
            .get_knowledge(entry_id)
            .await?
            .ok_or_else(|| MarketError::not_found("knowledge entry", entry_id))
    }

    /// One non-retractable vote per voter; contributors cannot vote on their own entries
    pub async fn vote(
        &self,
        entry_id: &str,
        voter: &str,
        direction: VoteDirection,
    ) -> Result<KnowledgeEntry> {
        let entry = self.get_entry(entry_id).await?;
        if entry.contributor == voter {
            return Err(MarketError::Validation(
                "contributors cannot vote on their own entries".to_string(),
            ));
        }

        let delta = match direction {
            VoteDirection::Up => self.config.upvote_delta,
            VoteDirection::Down => self.config.downvote_delta,
        };
        let updated = self
            .store
            .vote_knowledge(entry_id, voter, direction, delta)
            .await?;

        if !entry.is_gold() && updated.is_gold() {
            info!(entry_id, score = updated.quality_score, "Knowledge entry reached GOLD");
            self.notifier.emit(NotifyEvent::KnowledgeGold {
                entry_id: updated.id.clone(),
                title: updated.title.clone(),
            });
        }
        Ok(updated)
    }

    /// Read an entry through the access gate. GOLD entries are premium.
    pub async fn query_entry(
        &self,
        entry_id: &str,
        caller: &str,
        accept_fee: bool,
    ) -> Result<KnowledgeAnswer> {
        let entry = self.get_entry(entry_id).await?;
        let receipt = self
            .access
            .consume(caller, Feature::KnowledgeQuery, entry.is_gold(), accept_fee, Some(entry_id))
            .await?;

        let share = (receipt.fee as i128 * self.config.contributor_share_bps as i128 / 10_000) as i64;
        let entry = self.store.record_knowledge_query(entry_id, share).await?;

        Ok(KnowledgeAnswer {
            entry,
            receipt,
            contributor_earned: share,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticBalances;
    use crate::config::AccessConfig;
    use crate::domain::EntryStatus;
    use crate::services::TokenBalances;

    const CONTRIBUTOR: &str = "0x6666666666666666666666666666666666666666";
    const READER: &str = "0x7777777777777777777777777777777777777777";
    const VOTER_A: &str = "0x8888888888888888888888888888888888888888";
    const VOTER_B: &str = "0x9999999999999999999999999999999999999999";
    const VOTER_C: &str = "0x5555555555555555555555555555555555555555";

    async fn service() -> KnowledgeService {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let balances = Arc::new(TokenBalances::new(Arc::new(StaticBalances::new()), 60));
        let access = Arc::new(AccessService::new(store.clone(), balances, AccessConfig::default()).unwrap());
        let config = KnowledgeConfig {
            upvote_delta: 45,
            ..KnowledgeConfig::default()
        };
        KnowledgeService::new(store, access, NotificationSink::disabled(), config)
    }

    fn entry() -> NewKnowledgeEntry {
        NewKnowledgeEntry {
            title: "Funding flips precede squeezes".into(),
            content: "When perp funding turns negative during an uptrend...".into(),
            category: "Derivatives".into(),
            tags: vec!["Funding".into(), "perps".into(), "funding".into()],
        }
    }

    #[tokio::test]
    async fn test_votes_promote_to_gold_once_per_voter() {
        let knowledge = service().await;
        let created = knowledge.create_entry(CONTRIBUTOR, entry()).await.unwrap();
        assert_eq!(created.tags, vec!["funding".to_string(), "perps".to_string()]);
        assert_eq!(created.category, "derivatives");

        assert!(matches!(
            knowledge.vote(&created.id, CONTRIBUTOR, VoteDirection::Up).await,
            Err(MarketError::Validation(_))
        ));

        let after_one = knowledge.vote(&created.id, VOTER_A, VoteDirection::Up).await.unwrap();
        assert_eq!(after_one.quality_score, 45);
        assert_eq!(after_one.status, EntryStatus::Pending);

        assert!(matches!(
            knowledge.vote(&created.id, VOTER_A, VoteDirection::Up).await,
            Err(MarketError::DuplicateVote(_))
        ));

        let after_two = knowledge.vote(&created.id, VOTER_B, VoteDirection::Up).await.unwrap();
        assert_eq!(after_two.quality_score, 90);
        assert_eq!(after_two.status, EntryStatus::Gold);
    }

    #[tokio::test]
    async fn test_paid_query_credits_contributor_share() {
        let knowledge = service().await;
        let created = knowledge.create_entry(CONTRIBUTOR, entry()).await.unwrap();

        assert!(matches!(
            knowledge.query_entry(&created.id, READER, false).await,
            Err(MarketError::QuotaExceeded(_))
        ));

        let answer = knowledge.query_entry(&created.id, READER, true).await.unwrap();
        assert_eq!(answer.receipt.fee, 10);
        assert_eq!(answer.contributor_earned, 7);
        assert_eq!(answer.entry.query_count, 1);
        assert_eq!(answer.entry.earnings, 7);
        assert!(answer.entry.content.starts_with("When perp funding"));
    }

    #[tokio::test]
    async fn test_gold_entry_costs_premium_fee_and_score_caps_at_100() {
        let knowledge = service().await;
        let created = knowledge.create_entry(CONTRIBUTOR, entry()).await.unwrap();
        knowledge.vote(&created.id, VOTER_A, VoteDirection::Up).await.unwrap();
        knowledge.vote(&created.id, VOTER_B, VoteDirection::Up).await.unwrap();
        let capped = knowledge.vote(&created.id, VOTER_C, VoteDirection::Up).await.unwrap();
        assert_eq!(capped.quality_score, 100);
        assert_eq!(capped.status, EntryStatus::Gold);

        let answer = knowledge.query_entry(&created.id, READER, true).await.unwrap();
        assert_eq!(answer.receipt.fee, 30);
        assert_eq!(answer.contributor_earned, 21);
        assert_eq!(answer.entry.earnings, 21);
    }

    #[tokio::test]
    async fn test_listing_hides_content_and_filters_category() {
        let knowledge = service().await;
        knowledge.create_entry(CONTRIBUTOR, entry()).await.unwrap();

        let listed = knowledge.list_entries(Some("derivatives"), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(knowledge.list_entries(Some("macro"), 10).await.unwrap().is_empty());
    }
}
