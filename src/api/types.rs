use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Direction, NewKnowledgeEntry, NewSignal, Outcome, Signal, Wager};
use crate::error::{MarketError, Result};

// ============================================================================
// Envelope
// ============================================================================

/// Success envelope shared by every route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

// ============================================================================
// Auth Types
// ============================================================================

/// Wallet signature embedded in a request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAuth {
    pub address: String,
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub address: String,
    pub message: String,
    pub signature: String,
}

/// Body for writes that carry nothing but optional credentials
#[derive(Debug, Default, Deserialize)]
pub struct AuthOnlyRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
}

// ============================================================================
// Signal Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SignalQuery {
    pub status: Option<String>,
    pub provider: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSignalRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    pub asset: String,
    /// LONG/SHORT (BUY/SELL accepted)
    pub direction: String,
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

impl CreateSignalRequest {
    pub fn to_new_signal(&self) -> Result<NewSignal> {
        let direction = Direction::try_from(self.direction.as_str()).map_err(MarketError::Validation)?;
        Ok(NewSignal {
            asset: self.asset.clone(),
            direction,
            entry_price: self.entry_price,
            target_price: self.target_price,
            stop_loss: self.stop_loss,
            timeframe: self.timeframe.clone(),
            deadline: self.deadline,
            reasoning: self.reasoning.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    /// HIT/MISS (YES/NO accepted)
    pub outcome: String,
    #[serde(default)]
    pub result_price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct UpvoteResponse {
    pub signal_id: String,
    pub upvotes: i64,
}

// ============================================================================
// Wager Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PlaceWagerRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    /// HIT/MISS (YES/NO accepted)
    pub side: String,
    pub stake: i64,
}

// ============================================================================
// Provider Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ============================================================================
// Access Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TierQuery {
    pub feature: String,
    #[serde(default)]
    pub premium: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    pub feature: String,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub accept_fee: bool,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub payment: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StakeRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    pub amount: i64,
}

// ============================================================================
// Knowledge Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct KnowledgeQuery {
    pub category: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateKnowledgeRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CreateKnowledgeRequest {
    pub fn to_new_entry(&self) -> NewKnowledgeEntry {
        NewKnowledgeEntry {
            title: self.title.clone(),
            content: self.content.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    /// UP or DOWN
    pub direction: String,
}

#[derive(Debug, Deserialize)]
pub struct QueryEntryRequest {
    #[serde(default)]
    pub auth: Option<SignedAuth>,
    #[serde(default)]
    pub accept_fee: bool,
}

// ============================================================================
// Market Callback Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MarketCallbackRequest {
    pub market_id: String,
    /// HIT/MISS (YES/NO accepted)
    pub outcome: String,
    #[serde(default)]
    pub result_price: Option<Decimal>,
}

// ============================================================================
// Health Check Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: bool,
    pub uptime_secs: i64,
    pub version: String,
}

// ============================================================================
// WebSocket Message Types
// ============================================================================

/// Events pushed to `/ws` subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    #[serde(rename = "signal_created")]
    SignalCreated(Signal),
    #[serde(rename = "signal_settled")]
    SignalSettled(Signal),
    #[serde(rename = "wager_placed")]
    WagerPlaced(Wager),
    #[serde(rename = "signal_upvoted")]
    SignalUpvoted { signal_id: String, upvotes: i64 },
}

/// Parse HIT/MISS (or YES/NO) into a validation error on failure
pub fn parse_outcome(s: &str) -> Result<Outcome> {
    Outcome::try_from(s).map_err(MarketError::Validation)
}
