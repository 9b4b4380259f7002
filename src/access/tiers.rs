//! Ordered threshold tables and tier quotes.
//!
//! Token-holding tiers, stake tiers and the credit-package catalogue are all
//! the same shape: an ascending list of thresholds, evaluated from the top
//! down, where the first satisfied entry wins. [`ThresholdTable`] is that
//! shape; [`TierTable`] adds the fee/quota rules on top of it.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

/// An entry that can live in a [`ThresholdTable`]
pub trait Threshold {
    fn threshold(&self) -> i64;
    fn label(&self) -> &str;
}

/// Strictly ascending thresholds, evaluated highest-first
#[derive(Debug, Clone)]
pub struct ThresholdTable<T> {
    levels: Vec<T>,
}

impl<T: Threshold> ThresholdTable<T> {
    pub fn new(levels: Vec<T>) -> Result<Self> {
        if levels.is_empty() {
            return Err(MarketError::InvalidTierConfiguration(
                "table has no entries".to_string(),
            ));
        }
        if levels[0].threshold() < 0 {
            return Err(MarketError::InvalidTierConfiguration(format!(
                "{} has a negative threshold",
                levels[0].label()
            )));
        }
        for pair in levels.windows(2) {
            if pair[1].threshold() <= pair[0].threshold() {
                return Err(MarketError::InvalidTierConfiguration(format!(
                    "{} ({}) is not strictly above {} ({})",
                    pair[1].label(),
                    pair[1].threshold(),
                    pair[0].label(),
                    pair[0].threshold()
                )));
            }
        }
        Ok(Self { levels })
    }

    /// Index of the highest entry whose threshold `amount` reaches
    pub fn position(&self, amount: i64) -> Option<usize> {
        self.levels.iter().rposition(|l| amount >= l.threshold())
    }

    pub fn select(&self, amount: i64) -> Option<&T> {
        self.position(amount).map(|i| &self.levels[i])
    }

    pub fn find(&self, label: &str) -> Option<&T> {
        self.levels
            .iter()
            .find(|l| l.label().eq_ignore_ascii_case(label))
    }

    pub fn levels(&self) -> &[T] {
        &self.levels
    }
}

/// One access tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLevel {
    pub name: String,
    pub threshold: i64,
    #[serde(default)]
    pub fee: i64,
    /// Free actions per calendar month
    #[serde(default)]
    pub free_quota: u32,
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default)]
    pub discount_bps: u32,
}

impl TierLevel {
    pub fn limited(name: &str, threshold: i64, fee: i64, free_quota: u32, discount_bps: u32) -> Self {
        Self {
            name: name.to_string(),
            threshold,
            fee,
            free_quota,
            unlimited: false,
            discount_bps,
        }
    }

    pub fn unlimited(name: &str, threshold: i64) -> Self {
        Self {
            name: name.to_string(),
            threshold,
            fee: 0,
            free_quota: 0,
            unlimited: true,
            discount_bps: 10_000,
        }
    }
}

impl Threshold for TierLevel {
    fn threshold(&self) -> i64 {
        self.threshold
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// What one action costs a holder right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQuote {
    pub tier: String,
    pub fee_per_action: i64,
    /// None when the tier is unlimited
    pub free_quota_remaining: Option<u32>,
    pub discount_bps: u32,
    pub unlimited: bool,
}

impl TierQuote {
    /// Quota as a comparable number, unlimited ranking above everything
    pub fn quota_rank(&self) -> u64 {
        match self.free_quota_remaining {
            None => u64::MAX,
            Some(n) => n as u64,
        }
    }
}

/// Tier table with fee and quota rules
#[derive(Debug, Clone)]
pub struct TierTable {
    inner: ThresholdTable<TierLevel>,
}

impl TierTable {
    /// Builds a table, rejecting anything that would make a larger holding cost more
    pub fn new(levels: Vec<TierLevel>) -> Result<Self> {
        let inner = ThresholdTable::new(levels)?;
        let levels = inner.levels();

        if levels[0].threshold != 0 {
            return Err(MarketError::InvalidTierConfiguration(format!(
                "lowest tier {} must start at 0",
                levels[0].name
            )));
        }
        for pair in levels.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if lower.unlimited && !upper.unlimited {
                return Err(MarketError::InvalidTierConfiguration(format!(
                    "{} follows unlimited tier {}",
                    upper.name, lower.name
                )));
            }
            if upper.fee > lower.fee {
                return Err(MarketError::InvalidTierConfiguration(format!(
                    "{} charges more than {}",
                    upper.name, lower.name
                )));
            }
            if upper.free_quota < lower.free_quota && !upper.unlimited {
                return Err(MarketError::InvalidTierConfiguration(format!(
                    "{} grants less quota than {}",
                    upper.name, lower.name
                )));
            }
        }
        if levels.iter().any(|l| l.fee < 0 || l.discount_bps > 10_000) {
            return Err(MarketError::InvalidTierConfiguration(
                "fees must be non-negative and discounts at most 10000 bps".to_string(),
            ));
        }

        Ok(Self { inner })
    }

    pub fn levels(&self) -> &[TierLevel] {
        self.inner.levels()
    }

    pub fn tier_for(&self, amount: i64) -> &TierLevel {
        // threshold of the first level is 0, so clamping makes this total
        let idx = self.inner.position(amount.max(0)).unwrap_or(0);
        &self.inner.levels()[idx]
    }

    /// Fee of the cheapest-to-reach tier, used for premium pricing
    pub fn base_fee(&self) -> i64 {
        self.inner.levels()[0].fee
    }

    /// Quote one action for a holder of `amount` who has already used
    /// `used_this_period` actions this calendar month. `premium_multiplier`
    /// is set for flagged items.
    pub fn quote(
        &self,
        amount: i64,
        used_this_period: u32,
        premium_multiplier: Option<i64>,
    ) -> TierQuote {
        let levels = self.inner.levels();
        let idx = self.inner.position(amount.max(0)).unwrap_or(0);
        let level = &levels[idx];

        if level.unlimited {
            return TierQuote {
                tier: level.name.clone(),
                fee_per_action: 0,
                free_quota_remaining: None,
                discount_bps: level.discount_bps,
                unlimited: true,
            };
        }

        let remaining = level.free_quota.saturating_sub(used_this_period);

        let fee = match premium_multiplier {
            Some(multiplier) => self.base_fee().saturating_mul(multiplier.max(1)),
            None if level.free_quota == 0 => level.fee,
            None if remaining > 0 => 0,
            // quota spent: next-lower tier's fee for the rest of the period
            None if idx > 0 => levels[idx - 1].fee,
            None => level.fee,
        };

        TierQuote {
            tier: level.name.clone(),
            fee_per_action: fee,
            free_quota_remaining: Some(remaining),
            discount_bps: level.discount_bps,
            unlimited: false,
        }
    }
}

/// Start of the calendar month (UTC) containing `now`
pub fn period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}
