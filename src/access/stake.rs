use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MarketError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StakeStatus {
    Active,
    Withdrawn,
}

impl StakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakeStatus::Active => "ACTIVE",
            StakeStatus::Withdrawn => "WITHDRAWN",
        }
    }
}

impl fmt::Display for StakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for StakeStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(StakeStatus::Active),
            "WITHDRAWN" => Ok(StakeStatus::Withdrawn),
            _ => Err(format!("Invalid stake status: {}", s)),
        }
    }
}

/// Tokens locked by a holder to reach a stake tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub id: String,
    pub holder: String,
    pub amount: i64,
    pub status: StakeStatus,
    pub fee_paid: Option<i64>,
    pub returned: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

/// How an unstaked amount divides between the holder and the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeSplit {
    pub returned: i64,
    pub fee: i64,
}

/// Split `amount` into returned principal and a `fee_bps` fee.
/// The fee rounds down, and `returned + fee == amount` always.
pub fn unstake_split(amount: i64, fee_bps: i64) -> Result<UnstakeSplit> {
    if amount <= 0 {
        return Err(MarketError::Validation(format!(
            "stake amount must be positive: {}",
            amount
        )));
    }
    if !(0..10_000).contains(&fee_bps) {
        return Err(MarketError::Internal(format!(
            "unstake fee out of range: {} bps",
            fee_bps
        )));
    }

    let fee = ((amount as i128) * (fee_bps as i128) / 10_000) as i64;
    Ok(UnstakeSplit {
        returned: amount - fee,
        fee,
    })
}
