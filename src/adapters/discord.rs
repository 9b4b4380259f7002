//! Discord webhook notifications
//!
//! Posts marketplace events to a Discord channel. Delivery is best-effort:
//! the [`NotificationSink`] spawns every send and only logs failures.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{Direction, Outcome};
use crate::error::{MarketError, Result};

/// Something worth telling the outside world about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    SignalCreated {
        signal_id: String,
        provider: String,
        asset: String,
        direction: Direction,
        entry_price: Decimal,
        target_price: Decimal,
    },
    SignalSettled {
        signal_id: String,
        asset: String,
        outcome: Outcome,
        karma_delta: i64,
        wagers_settled: usize,
    },
    WagerPlaced {
        signal_id: String,
        side: Outcome,
        stake: i64,
        odds_bps: i64,
    },
    KnowledgeGold {
        entry_id: String,
        title: String,
    },
}

impl NotifyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyEvent::SignalCreated { .. } => "signal_created",
            NotifyEvent::SignalSettled { .. } => "signal_settled",
            NotifyEvent::WagerPlaced { .. } => "wager_placed",
            NotifyEvent::KnowledgeGold { .. } => "knowledge_gold",
        }
    }

    /// One-line chat rendering
    pub fn render(&self) -> String {
        match self {
            NotifyEvent::SignalCreated {
                provider,
                asset,
                direction,
                entry_price,
                target_price,
                ..
            } => format!(
                "📡 New {} {} signal by {}: entry {} → target {}",
                asset,
                direction,
                short_address(provider),
                entry_price,
                target_price
            ),
            NotifyEvent::SignalSettled {
                asset,
                outcome,
                karma_delta,
                wagers_settled,
                ..
            } => {
                let emoji = if *outcome == Outcome::Hit { "🎯" } else { "❌" };
                format!(
                    "{} {} signal settled {} (karma {:+}, {} wagers)",
                    emoji, asset, outcome, karma_delta, wagers_settled
                )
            }
            NotifyEvent::WagerPlaced {
                signal_id,
                side,
                stake,
                odds_bps,
            } => format!(
                "💰 {} on {} for {} @ {:.1}%",
                stake,
                side,
                signal_id,
                *odds_bps as f64 / 100.0
            ),
            NotifyEvent::KnowledgeGold { title, .. } => {
                format!("🏆 Knowledge entry reached GOLD: {}", title)
            }
        }
    }
}

fn short_address(address: &str) -> String {
    if address.len() > 10 {
        format!("{}…{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotifyEvent) -> Result<()>;
}

#[derive(Serialize)]
struct DiscordMessage {
    content: String,
}

/// Discord webhook client
#[derive(Clone)]
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, event: &NotifyEvent) -> Result<()> {
        let message = DiscordMessage {
            content: event.render(),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!(kind = event.kind(), "Discord notification sent");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(MarketError::dependency(
                "discord",
                format!("HTTP {}: {}", status, body),
            ))
        }
    }
}

/// Fire-and-forget front for a [`Notifier`]
#[derive(Clone, Default)]
pub struct NotificationSink {
    notifier: Option<Arc<dyn Notifier>>,
}

impl NotificationSink {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }

    /// Sink that drops every event
    pub fn disabled() -> Self {
        Self { notifier: None }
    }

    pub fn from_webhook(webhook_url: Option<&str>) -> Self {
        match webhook_url {
            Some(url) if !url.trim().is_empty() => {
                Self::new(Arc::new(DiscordNotifier::new(url.to_string())))
            }
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Send in the background; never blocks and never fails the caller
    pub fn emit(&self, event: NotifyEvent) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        // outside a runtime there is nothing to spawn onto
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(kind = event.kind(), error = %e, "Notification dropped");
            }
        });
    }
}
