use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Outcome;

/// Basis points in one whole probability
pub const BPS: i64 = 10_000;
/// Odds are clamped to [1%, 99%] so payouts stay bounded
pub const MIN_ODDS_BPS: i64 = 100;
pub const MAX_ODDS_BPS: i64 = 9_900;

/// Wager status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "PENDING",
            WagerStatus::Won => "WON",
            WagerStatus::Lost => "LOST",
        }
    }
}

impl TryFrom<&str> for WagerStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(WagerStatus::Pending),
            "WON" => Ok(WagerStatus::Won),
            "LOST" => Ok(WagerStatus::Lost),
            _ => Err(format!("Invalid wager status: {}", s)),
        }
    }
}

/// A stake on whether a signal resolves HIT or MISS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub id: String,
    pub signal_id: String,
    pub bettor: String,
    pub side: Outcome,
    pub stake: i64,
    /// Implied probability of `side` when the wager was placed
    pub odds_bps: i64,
    pub status: WagerStatus,
    pub payout: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Wager {
    /// Status and payout this wager settles to under `outcome`
    pub fn resolve(&self, outcome: Outcome) -> (WagerStatus, i64) {
        if self.side == outcome {
            (WagerStatus::Won, payout_for(self.stake, self.odds_bps))
        } else {
            (WagerStatus::Lost, 0)
        }
    }

    /// Realized profit; None while pending
    pub fn pnl(&self) -> Option<i64> {
        self.payout.map(|p| p - self.stake)
    }
}

/// Payout of a winning stake bought at `odds_bps`, rounded down.
/// A binary contract bought at probability p pays 1/p per unit staked.
pub fn payout_for(stake: i64, odds_bps: i64) -> i64 {
    let odds = odds_bps.clamp(MIN_ODDS_BPS, MAX_ODDS_BPS) as i128;
    let payout = (stake.max(0) as i128) * (BPS as i128) / odds;
    payout.min(i64::MAX as i128) as i64
}

/// Implied probability of a side from the current pools. Virtual liquidity
/// on both sides keeps an empty market at 50/50.
pub fn pool_odds_bps(side_pool: i64, other_pool: i64, virtual_liquidity: i64) -> i64 {
    let v = virtual_liquidity.max(1) as i128;
    let side = side_pool.max(0) as i128 + v;
    let total = side + other_pool.max(0) as i128 + v;
    ((side * BPS as i128 / total) as i64).clamp(MIN_ODDS_BPS, MAX_ODDS_BPS)
}

/// Convert a 0..1 contract price into clamped basis points
pub fn price_to_bps(price: Decimal) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;

    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return None;
    }
    (price * Decimal::from(BPS))
        .round()
        .to_i64()
        .map(|bps| bps.clamp(MIN_ODDS_BPS, MAX_ODDS_BPS))
}

/// A bettor's open exposure and realized results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub bettor: String,
    /// Sum of stakes still pending
    pub exposure: i64,
    pub open_wagers: i64,
    pub won: i64,
    pub lost: i64,
    pub total_staked: i64,
    pub total_payout: i64,
    pub realized_pnl: i64,
}

impl Portfolio {
    pub fn from_wagers(bettor: &str, wagers: &[Wager]) -> Self {
        let mut p = Portfolio {
            bettor: bettor.to_string(),
            ..Default::default()
        };
        for w in wagers {
            p.total_staked += w.stake;
            match w.status {
                WagerStatus::Pending => {
                    p.exposure += w.stake;
                    p.open_wagers += 1;
                }
                WagerStatus::Won => p.won += 1,
                WagerStatus::Lost => p.lost += 1,
            }
            if let Some(pnl) = w.pnl() {
                p.total_payout += w.payout.unwrap_or(0);
                p.realized_pnl += pnl;
            }
        }
        p
    }
}
