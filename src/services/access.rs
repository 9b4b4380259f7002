//! Tier lookups, gated consumption, staking and credit purchases

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::TokenBalances;
use crate::access::{
    period_start, remaining_credits, unstake_split, AccessReceipt, ChargeMethod, CreditPackage,
    Feature, PackageCatalog, Purchase, Stake, StakeStatus, TierQuote, TierTable, UnstakeSplit,
};
use crate::adapters::SqliteStore;
use crate::config::AccessConfig;
use crate::domain::new_id;
use crate::error::{MarketError, Result};
use crate::validation::validate_amount;

/// Remaining credits for a holder
#[derive(Debug, Clone, Serialize)]
pub struct CreditSummary {
    pub holder: String,
    pub remaining: i64,
    pub unlimited: bool,
    pub purchases: Vec<Purchase>,
}

/// Outcome of an unstake
#[derive(Debug, Clone, Serialize)]
pub struct Unstaked {
    pub stake: Stake,
    #[serde(flatten)]
    pub split: UnstakeSplit,
}

pub struct AccessService {
    store: Arc<SqliteStore>,
    balances: Arc<TokenBalances>,
    token_tiers: TierTable,
    stake_tiers: TierTable,
    catalog: PackageCatalog,
    config: AccessConfig,
}

impl AccessService {
    /// Fails with `InvalidTierConfiguration` if any table is misordered
    pub fn new(
        store: Arc<SqliteStore>,
        balances: Arc<TokenBalances>,
        config: AccessConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            balances,
            token_tiers: TierTable::new(config.token_tiers.clone())?,
            stake_tiers: TierTable::new(config.stake_tiers.clone())?,
            catalog: PackageCatalog::new(config.packages.clone())?,
            config,
        })
    }

    fn table_for(&self, feature: Feature) -> &TierTable {
        match feature {
            Feature::Scanner => &self.stake_tiers,
            Feature::KnowledgeQuery => &self.token_tiers,
        }
    }

    fn minimum_for(&self, feature: Feature) -> i64 {
        match feature {
            Feature::Scanner => self.config.scanner_min_stake,
            Feature::KnowledgeQuery => self.config.knowledge_min_balance,
        }
    }

    /// What a feature is tiered on: active stake or token holdings
    async fn holding_for(&self, address: &str, feature: Feature) -> Result<i64> {
        match feature {
            Feature::Scanner => self.store.active_stake_total(address).await,
            Feature::KnowledgeQuery => Ok(self.balances.balance(address).await),
        }
    }

    fn multiplier(&self, premium: bool) -> Option<i64> {
        premium.then_some(self.config.premium_multiplier)
    }

    /// Current quote for one action of `feature`
    pub async fn tier_for(&self, address: &str, feature: Feature, premium: bool) -> Result<TierQuote> {
        let now = Utc::now();
        let amount = self.holding_for(address, feature).await?;
        let used = self
            .store
            .free_uses_since(address, feature, period_start(now))
            .await?;
        Ok(self
            .table_for(feature)
            .quote(amount, used, self.multiplier(premium)))
    }

    /// Consume one gated action.
    ///
    /// Payment order: unlimited tier, free quota (not for premium items),
    /// prepaid credits oldest first, then the tier fee if the caller accepts
    /// it. Otherwise `QuotaExceeded`.
    pub async fn consume(
        &self,
        address: &str,
        feature: Feature,
        premium: bool,
        accept_fee: bool,
        reference: Option<&str>,
    ) -> Result<AccessReceipt> {
        let now = Utc::now();
        let amount = self.holding_for(address, feature).await?;

        let required = self.minimum_for(feature);
        if amount < required {
            return Err(MarketError::InsufficientBalance {
                required,
                held: amount,
            });
        }

        let table = self.table_for(feature);
        let level = table.tier_for(amount);
        let receipt = |charged_via, fee, purchase_id: Option<String>| AccessReceipt {
            feature,
            tier: level.name.clone(),
            charged_via,
            fee,
            purchase_id,
        };

        if level.unlimited {
            self.store
                .record_usage(address, feature, ChargeMethod::Unlimited, 0, None, reference, now)
                .await?;
            return Ok(receipt(ChargeMethod::Unlimited, 0, None));
        }

        let period = period_start(now);
        if !premium
            && level.free_quota > 0
            && self
                .store
                .try_use_free_quota(address, feature, level.free_quota, period, reference, now)
                .await?
        {
            return Ok(receipt(ChargeMethod::FreeQuota, 0, None));
        }

        if let Some(purchase_id) = self.store.consume_credit(address, now).await? {
            self.store
                .record_usage(
                    address,
                    feature,
                    ChargeMethod::Credit,
                    0,
                    Some(&purchase_id),
                    reference,
                    now,
                )
                .await?;
            return Ok(receipt(ChargeMethod::Credit, 0, Some(purchase_id)));
        }

        let used = self.store.free_uses_since(address, feature, period).await?;
        let quote = table.quote(amount, used, self.multiplier(premium));
        if quote.fee_per_action > 0 && !accept_fee {
            return Err(MarketError::QuotaExceeded(format!(
                "no free {} actions or credits left; the fee is {}",
                feature, quote.fee_per_action
            )));
        }

        self.store
            .record_usage(
                address,
                feature,
                ChargeMethod::Fee,
                quote.fee_per_action,
                None,
                reference,
                now,
            )
            .await?;
        Ok(receipt(ChargeMethod::Fee, quote.fee_per_action, None))
    }

    // ==================== Stakes ====================

    pub async fn stake(&self, address: &str, amount: i64) -> Result<Stake> {
        validate_amount(amount, "amount", None)?;
        let stake = self
            .store
            .insert_stake(&new_id("stk"), address, amount, Utc::now())
            .await?;
        info!(stake_id = %stake.id, holder = address, amount, "Stake created");
        Ok(stake)
    }

    /// Withdraw a stake, keeping the unstake fee
    pub async fn unstake(&self, address: &str, stake_id: &str) -> Result<Unstaked> {
        let stake = self
            .store
            .get_stake(stake_id)
            .await?
            .ok_or_else(|| MarketError::not_found("stake", stake_id))?;

        if stake.holder != address {
            return Err(MarketError::Eligibility(format!(
                "stake {} belongs to another holder",
                stake_id
            )));
        }
        if stake.status == StakeStatus::Withdrawn {
            return Err(MarketError::Conflict(format!(
                "stake {} is already withdrawn",
                stake_id
            )));
        }

        let split = unstake_split(stake.amount, self.config.unstake_fee_bps)?;
        let stake = self
            .store
            .withdraw_stake(stake_id, address, split, Utc::now())
            .await?;

        info!(
            stake_id,
            holder = address,
            returned = split.returned,
            fee = split.fee,
            "Stake withdrawn"
        );
        Ok(Unstaked { stake, split })
    }

    pub async fn list_stakes(&self, address: &str) -> Result<Vec<Stake>> {
        self.store.list_stakes(address).await
    }

    // ==================== Credits ====================

    pub fn packages(&self) -> &[CreditPackage] {
        self.catalog.packages()
    }

    /// Buy a package by name, or the largest package a payment covers.
    /// The holder's token tier discount applies to the price.
    pub async fn purchase(
        &self,
        address: &str,
        package: Option<&str>,
        payment: Option<i64>,
    ) -> Result<Purchase> {
        let package = match (package, payment) {
            (Some(name), _) => self
                .catalog
                .by_name(name)
                .ok_or_else(|| MarketError::not_found("package", name))?,
            (None, Some(amount)) => {
                validate_amount(amount, "payment", None)?;
                self.catalog.best_for_payment(amount).ok_or_else(|| {
                    MarketError::Validation(format!("payment {} buys no package", amount))
                })?
            }
            (None, None) => {
                return Err(MarketError::Validation(
                    "package or payment is required".to_string(),
                ))
            }
        };

        let now = Utc::now();
        let balance = self.balances.balance(address).await;
        let discount = self.token_tiers.tier_for(balance).discount_bps;
        let (credits, expires_at) = package.grant(now);

        let purchase = Purchase {
            id: new_id("pur"),
            holder: address.to_string(),
            package: package.name.clone(),
            price_paid: package.discounted_price(discount),
            credits_total: credits,
            credits_remaining: credits,
            expires_at,
            created_at: now,
        };
        self.store.insert_purchase(&purchase).await?;

        info!(
            purchase_id = %purchase.id,
            holder = address,
            package = %purchase.package,
            price_paid = purchase.price_paid,
            "Package purchased"
        );
        Ok(purchase)
    }

    pub async fn credits(&self, address: &str) -> Result<CreditSummary> {
        let now = Utc::now();
        let purchases = self.store.list_purchases(address).await?;
        Ok(CreditSummary {
            holder: address.to_string(),
            remaining: remaining_credits(&purchases, now),
            unlimited: purchases
                .iter()
                .any(|p| p.is_unlimited() && p.available(now) > 0),
            purchases,
        })
    }
}
