use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MarketError, Result};

/// Signal lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStatus {
    /// Accepting wagers, outcome unknown
    Active,
    /// Outcome fixed; there were no wagers to settle
    Resolved,
    /// Outcome fixed and every wager paid out
    Settled,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Active => "ACTIVE",
            SignalStatus::Resolved => "RESOLVED",
            SignalStatus::Settled => "SETTLED",
        }
    }

    /// Terminal status for a signal that had `wager_count` wagers
    pub fn terminal_for(wager_count: usize) -> SignalStatus {
        if wager_count == 0 {
            SignalStatus::Resolved
        } else {
            SignalStatus::Settled
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SignalStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(SignalStatus::Active),
            "RESOLVED" => Ok(SignalStatus::Resolved),
            "SETTLED" => Ok(SignalStatus::Settled),
            _ => Err(format!("Invalid signal status: {}", s)),
        }
    }
}

/// Realized outcome of a signal, and the side a wager backs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Hit,
    Miss,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Hit => "HIT",
            Outcome::Miss => "MISS",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Outcome {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "HIT" | "YES" => Ok(Outcome::Hit),
            "MISS" | "NO" => Ok(Outcome::Miss),
            _ => Err(format!("Invalid outcome: {}", s)),
        }
    }
}

/// Trade direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Direction {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Direction::Long),
            "SHORT" | "SELL" => Ok(Direction::Short),
            _ => Err(format!("Invalid direction: {}", s)),
        }
    }
}

/// State of the mirror market on the remote prediction-market service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketLink {
    /// Creation requested, no market id yet
    Pending,
    Linked,
    Failed,
    /// Remote service not configured
    Disabled,
}

impl MarketLink {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketLink::Pending => "PENDING",
            MarketLink::Linked => "LINKED",
            MarketLink::Failed => "FAILED",
            MarketLink::Disabled => "DISABLED",
        }
    }
}

impl TryFrom<&str> for MarketLink {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(MarketLink::Pending),
            "LINKED" => Ok(MarketLink::Linked),
            "FAILED" => Ok(MarketLink::Failed),
            "DISABLED" => Ok(MarketLink::Disabled),
            _ => Err(format!("Invalid market link state: {}", s)),
        }
    }
}

/// A provider's price-target prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub provider: String,
    pub asset: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub target_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub timeframe: String,
    pub deadline: DateTime<Utc>,
    /// Provider karma when the signal was posted; never updated
    pub karma_at_submit: i64,
    pub reasoning: String,
    pub status: SignalStatus,
    pub outcome: Option<Outcome>,
    pub result_price: Option<Decimal>,
    pub total_wagered: i64,
    pub upvotes: i64,
    pub market_id: Option<String>,
    pub market_link: MarketLink,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn is_active(&self) -> bool {
        self.status == SignalStatus::Active
    }

    /// Wagers are accepted while active and before the deadline
    pub fn accepts_wagers(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now < self.deadline
    }
}

/// Provider input for a new signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSignal {
    pub asset: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub target_price: Decimal,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub timeframe: String,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub reasoning: String,
}

pub const MAX_REASONING_LEN: usize = 2000;
pub const MAX_ASSET_LEN: usize = 24;

impl NewSignal {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        let asset = self.asset.trim();
        if asset.is_empty() || asset.len() > MAX_ASSET_LEN {
            return Err(MarketError::Validation(format!(
                "asset must be 1-{} characters",
                MAX_ASSET_LEN
            )));
        }
        if self.entry_price <= Decimal::ZERO {
            return Err(MarketError::Validation(format!(
                "entry_price must be positive: {}",
                self.entry_price
            )));
        }
        if self.target_price <= Decimal::ZERO {
            return Err(MarketError::Validation(format!(
                "target_price must be positive: {}",
                self.target_price
            )));
        }
        if self.target_price == self.entry_price {
            return Err(MarketError::Validation(
                "target_price must differ from entry_price".to_string(),
            ));
        }
        if let Some(stop) = self.stop_loss {
            if stop <= Decimal::ZERO {
                return Err(MarketError::Validation(format!(
                    "stop_loss must be positive: {}",
                    stop
                )));
            }
        }
        if self.deadline <= now {
            return Err(MarketError::Validation(format!(
                "deadline {} is not in the future",
                self.deadline
            )));
        }
        if self.reasoning.chars().count() > MAX_REASONING_LEN {
            return Err(MarketError::Validation(format!(
                "reasoning exceeds {} characters",
                MAX_REASONING_LEN
            )));
        }
        Ok(())
    }

    pub fn normalized_asset(&self) -> String {
        self.asset.trim().to_uppercase()
    }
}
