//! Asynchronous, isolated event fan-out.
//!
//! Every listener callback runs on its own spawned task: one listener's
//! failure or slowness cannot block another listener or the matching path.
//! Errors returned by a listener are logged and swallowed.

use crate::broker::types::{AccountUpdate, OrderEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Receives terminal order events (fills and cancels).
#[async_trait]
pub trait OrderEventListener: Send + Sync {
    async fn on_order_event(&self, event: OrderEvent) -> anyhow::Result<()>;
}

/// Receives periodic and fill-driven account-equity updates.
#[async_trait]
pub trait AccountListener: Send + Sync {
    async fn on_account_update(&self, update: AccountUpdate) -> anyhow::Result<()>;
}

/// Registry and fan-out point for broker events.
#[derive(Default)]
pub struct EventDispatcher {
    order_listeners: RwLock<Vec<Arc<dyn OrderEventListener>>>,
    account_listeners: RwLock<Vec<Arc<dyn AccountListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_order_listener(&self, listener: Arc<dyn OrderEventListener>) {
        self.order_listeners.write().await.push(listener);
    }

    pub async fn register_account_listener(&self, listener: Arc<dyn AccountListener>) {
        self.account_listeners.write().await.push(listener);
    }

    /// Fan an order event out to all listeners, one task each.
    pub async fn publish_order_event(&self, event: OrderEvent) {
        let listeners = self.order_listeners.read().await.clone();
        for listener in listeners {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.on_order_event(event).await {
                    warn!(error = %e, "Order event listener failed");
                }
            });
        }
    }

    /// Fan an account update out to all listeners, one task each.
    pub async fn publish_account_update(&self, update: AccountUpdate) {
        let listeners = self.account_listeners.read().await.clone();
        for listener in listeners {
            let update = update.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.on_account_update(update).await {
                    warn!(error = %e, "Account listener failed");
                }
            });
        }
    }
}
