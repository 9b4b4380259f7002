//! Pay-per-credit packages and the purchase ledger rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::tiers::{Threshold, ThresholdTable};
use crate::error::{MarketError, Result};

/// Credit count standing in for "unlimited" so arithmetic stays finite
pub const UNLIMITED_CREDITS: i64 = 1_000_000_000;

/// A package in the catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPackage {
    pub name: String,
    /// Price in token units, before any tier discount
    pub price: i64,
    #[serde(default)]
    pub credits: i64,
    /// Length of an unlimited window, in days
    #[serde(default)]
    pub unlimited_days: Option<i64>,
}

impl CreditPackage {
    pub fn credits(name: &str, price: i64, credits: i64) -> Self {
        Self {
            name: name.to_string(),
            price,
            credits,
            unlimited_days: None,
        }
    }

    pub fn unlimited(name: &str, price: i64, days: i64) -> Self {
        Self {
            name: name.to_string(),
            price,
            credits: 0,
            unlimited_days: Some(days),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.unlimited_days.is_some()
    }

    /// Credits and expiry granted by buying this package at `now`
    pub fn grant(&self, now: DateTime<Utc>) -> (i64, Option<DateTime<Utc>>) {
        match self.unlimited_days {
            Some(days) => (UNLIMITED_CREDITS, Some(now + Duration::days(days))),
            None => (self.credits, None),
        }
    }

    /// Price after a discount in basis points, rounded down
    pub fn discounted_price(&self, discount_bps: u32) -> i64 {
        let discount_bps = discount_bps.min(10_000) as i128;
        let price = self.price as i128;
        (price - price * discount_bps / 10_000) as i64
    }
}

impl Threshold for CreditPackage {
    fn threshold(&self) -> i64 {
        self.price
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Package catalogue ordered by price
#[derive(Debug, Clone)]
pub struct PackageCatalog {
    inner: ThresholdTable<CreditPackage>,
}

impl PackageCatalog {
    pub fn new(packages: Vec<CreditPackage>) -> Result<Self> {
        for p in &packages {
            let grants_something = match p.unlimited_days {
                Some(days) => days > 0,
                None => p.credits > 0,
            };
            if !grants_something || p.price <= 0 {
                return Err(MarketError::InvalidTierConfiguration(format!(
                    "package {} must have a positive price and grant credits or days",
                    p.name
                )));
            }
        }
        Ok(Self {
            inner: ThresholdTable::new(packages)?,
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&CreditPackage> {
        self.inner.find(name)
    }

    /// Largest package a payment of `amount` covers
    pub fn best_for_payment(&self, amount: i64) -> Option<&CreditPackage> {
        self.inner.select(amount)
    }

    pub fn packages(&self) -> &[CreditPackage] {
        self.inner.levels()
    }
}

/// A purchased package and what is left of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub holder: String,
    pub package: String,
    pub price_paid: i64,
    pub credits_total: i64,
    pub credits_remaining: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Purchase {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_unlimited(&self) -> bool {
        self.credits_total >= UNLIMITED_CREDITS
    }

    /// Credits usable at `now`; an expired purchase has none
    pub fn available(&self, now: DateTime<Utc>) -> i64 {
        if self.is_expired(now) {
            0
        } else {
            self.credits_remaining.max(0)
        }
    }
}

/// Total usable credits across purchases, capped at the unlimited sentinel
pub fn remaining_credits(purchases: &[Purchase], now: DateTime<Utc>) -> i64 {
    purchases
        .iter()
        .map(|p| p.available(now))
        .fold(0i64, |acc, n| acc.saturating_add(n))
        .min(UNLIMITED_CREDITS)
}

/// Oldest purchase that still has usable credits
pub fn next_purchase_to_consume(purchases: &[Purchase], now: DateTime<Utc>) -> Option<&Purchase> {
    purchases
        .iter()
        .filter(|p| p.available(now) > 0)
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}
