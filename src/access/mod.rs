//! Access-tier and pricing engine.
//!
//! Pure functions only; the service layer supplies balances, stakes and
//! usage counts from the store and the chain.

pub mod credits;
pub mod stake;
pub mod tiers;

pub use credits::{
    next_purchase_to_consume, remaining_credits, CreditPackage, PackageCatalog, Purchase,
    UNLIMITED_CREDITS,
};
pub use stake::{unstake_split, Stake, StakeStatus, UnstakeSplit};
pub use tiers::{period_start, Threshold, ThresholdTable, TierLevel, TierQuote, TierTable};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gated features, each priced off one tier table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Feature {
    /// Signal scanner, tiered by active stake
    Scanner,
    /// Knowledge-pool queries, tiered by token holdings
    KnowledgeQuery,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Scanner => "SCANNER",
            Feature::KnowledgeQuery => "KNOWLEDGE_QUERY",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Feature {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "SCANNER" => Ok(Feature::Scanner),
            "KNOWLEDGE_QUERY" | "KNOWLEDGE" => Ok(Feature::KnowledgeQuery),
            _ => Err(format!("Unknown feature: {}", s)),
        }
    }
}

/// How a consumed action was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeMethod {
    Unlimited,
    FreeQuota,
    Credit,
    Fee,
}

impl ChargeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeMethod::Unlimited => "UNLIMITED",
            ChargeMethod::FreeQuota => "FREE_QUOTA",
            ChargeMethod::Credit => "CREDIT",
            ChargeMethod::Fee => "FEE",
        }
    }
}

/// Result of consuming one gated action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessReceipt {
    pub feature: Feature,
    pub tier: String,
    pub charged_via: ChargeMethod,
    pub fee: i64,
    pub purchase_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_parsing_is_lenient_about_case_and_dashes() {
        assert_eq!(Feature::try_from("scanner"), Ok(Feature::Scanner));
        assert_eq!(Feature::try_from("knowledge-query"), Ok(Feature::KnowledgeQuery));
        assert!(Feature::try_from("casino").is_err());
    }

    #[test]
    fn test_feature_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&Feature::KnowledgeQuery).unwrap();
        assert_eq!(json, "\"KNOWLEDGE_QUERY\"");
    }
}
