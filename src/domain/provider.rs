use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A wallet that posts signals, bets or contributes knowledge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Lowercased wallet address
    pub address: String,
    pub karma: i64,
    pub wins: i64,
    pub losses: i64,
    pub signals_posted: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    pub fn resolved_signals(&self) -> i64 {
        self.wins + self.losses
    }

    pub fn win_rate(&self) -> Decimal {
        win_rate(self.wins, self.losses)
    }
}

/// wins / (wins + losses) × 100 to one decimal place; 0 with no history
pub fn win_rate(wins: i64, losses: i64) -> Decimal {
    let total = wins + losses;
    if total <= 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(wins) * Decimal::ONE_HUNDRED / Decimal::from(total)).round_dp(1)
}

/// Provider as shown on profiles and the leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub address: String,
    pub karma: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: Decimal,
    pub signals_posted: i64,
    pub active_signals: i64,
}

impl ProviderStats {
    pub fn new(provider: &Provider, active_signals: i64) -> Self {
        Self {
            address: provider.address.clone(),
            karma: provider.karma,
            wins: provider.wins,
            losses: provider.losses,
            win_rate: provider.win_rate(),
            signals_posted: provider.signals_posted,
            active_signals,
        }
    }
}
