//! Remote prediction-market service
//!
//! Signals are mirrored into binary markets on a remote service. Only the
//! creation call and the orderbook read are used; resolution comes back via
//! the `/api/markets/callback` route.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PredictionMarketConfig;
use crate::domain::{Outcome, Signal};
use crate::error::{MarketError, Result};

/// Market creation request for one signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketRequest {
    /// Our signal id, echoed back in resolution callbacks
    pub external_id: String,
    pub question: String,
    pub asset: String,
    pub target_price: Decimal,
    pub closes_at: DateTime<Utc>,
}

impl MarketRequest {
    pub fn for_signal(signal: &Signal) -> Self {
        Self {
            external_id: signal.id.clone(),
            question: format!(
                "Will {} reach {} by {}?",
                signal.asset,
                signal.target_price,
                signal.deadline.format("%Y-%m-%d %H:%M UTC")
            ),
            asset: signal.asset.clone(),
            target_price: signal.target_price,
            closes_at: signal.deadline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Price of the YES (HIT) contract, 0..1
    pub price: Decimal,
    pub size: Decimal,
}

/// YES-side orderbook of a remote market
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderbook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl Orderbook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().map(|l| l.price).max()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().map(|l| l.price).min()
    }

    /// Midpoint of the book, or the one side that has quotes
    pub fn yes_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        }
    }

    /// Implied probability of `side`
    pub fn price_for(&self, side: Outcome) -> Option<Decimal> {
        self.yes_price().map(|yes| match side {
            Outcome::Hit => yes,
            Outcome::Miss => Decimal::ONE - yes,
        })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketGateway: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    /// Create a mirror market; returns the remote market id
    async fn create_market(&self, request: &MarketRequest) -> Result<String>;

    async fn get_orderbook(&self, market_id: &str) -> Result<Orderbook>;
}

#[derive(Debug, Deserialize)]
struct CreateMarketResponse {
    #[serde(alias = "market_id")]
    id: String,
}

/// REST client for the remote market service
#[derive(Clone)]
pub struct HttpMarketGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMarketGateway {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl MarketGateway for HttpMarketGateway {
    async fn create_market(&self, request: &MarketRequest) -> Result<String> {
        let url = format!("{}/markets", self.base_url);
        let resp = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(|e| MarketError::dependency("prediction_market", e))?;

        if !resp.status().is_success() {
            return Err(MarketError::dependency(
                "prediction_market",
                format!("create market returned HTTP {}", resp.status()),
            ));
        }

        let created: CreateMarketResponse = resp.json().await?;
        info!(signal_id = %request.external_id, market_id = %created.id, "Remote market created");
        Ok(created.id)
    }

    async fn get_orderbook(&self, market_id: &str) -> Result<Orderbook> {
        let url = format!("{}/markets/{}/orderbook", self.base_url, market_id);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| MarketError::dependency("prediction_market", e))?;

        if !resp.status().is_success() {
            return Err(MarketError::dependency(
                "prediction_market",
                format!("orderbook returned HTTP {}", resp.status()),
            ));
        }

        let book: Orderbook = resp.json().await?;
        debug!(market_id, bids = book.bids.len(), asks = book.asks.len(), "Fetched orderbook");
        Ok(book)
    }
}

/// Stand-in when no remote service is configured
#[derive(Debug, Clone, Default)]
pub struct DisabledMarketGateway;

#[async_trait]
impl MarketGateway for DisabledMarketGateway {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn create_market(&self, _request: &MarketRequest) -> Result<String> {
        Err(MarketError::dependency("prediction_market", "not configured"))
    }

    async fn get_orderbook(&self, _market_id: &str) -> Result<Orderbook> {
        Err(MarketError::dependency("prediction_market", "not configured"))
    }
}

/// Gateway for the configured service, or the disabled stand-in
pub fn gateway_from_config(config: &PredictionMarketConfig) -> Result<std::sync::Arc<dyn MarketGateway>> {
    Ok(match config.base_url {
        Some(ref url) => std::sync::Arc::new(HttpMarketGateway::new(
            url,
            config.api_key.clone(),
            config.timeout_ms,
        )?),
        None => std::sync::Arc::new(DisabledMarketGateway),
    })
}
