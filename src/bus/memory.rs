//! # In-process loopback bus.
//!
//! [`MemoryBus`] implements [`BusClient`] over per-subscription unbounded
//! channels. Each subscription gets its own delivery task, so callbacks run
//! on a bus-owned task and messages within one subscription are delivered
//! in publish order, mirroring the contract of a real bus client.
//!
//! Intended for tests, demos, and single-process deployments; it has no
//! durability and no cross-process reach.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::bus::{BusClient, BusError, Delivery, Headers, SubscriptionCallback};

use async_trait::async_trait;

/// One live subscription: the sending half of its delivery channel.
struct Subscription {
    tx: mpsc::UnboundedSender<Delivery>,
}

/// In-memory pub/sub transport.
///
/// Cheap to share via `Arc`; several hosts attached to the same instance
/// see each other's traffic, which is how the integration tests wire
/// multi-service scenarios.
#[derive(Default)]
pub struct MemoryBus {
    /// Subject -> live subscriptions.
    subscriptions: DashMap<String, Vec<Subscription>>,
    connected: AtomicBool,
    durable: AtomicBool,
}

impl MemoryBus {
    /// Creates a disconnected bus; `connect` flips it live.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a durable-stream context is currently attached.
    pub fn has_durable_context(&self) -> bool {
        self.durable.load(Ordering::Acquire)
    }

    fn fan_out(&self, subject: &str, headers: Option<Headers>, payload: Vec<u8>) {
        let Some(mut subs) = self.subscriptions.get_mut(subject) else {
            return;
        };
        subs.retain(|sub| {
            sub.tx
                .send(Delivery {
                    subject: subject.to_string(),
                    headers: headers.clone(),
                    payload: payload.clone(),
                })
                .is_ok()
        });
    }
}

#[async_trait]
impl BusClient for MemoryBus {
    async fn connect(&self, _url: &str) -> Result<(), BusError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.fan_out(subject, None, payload);
        Ok(())
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: Headers,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.fan_out(subject, Some(headers), payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        callback: SubscriptionCallback,
    ) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::Subscribe {
                subject: subject.to_string(),
                reason: "not connected".to_string(),
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        self.subscriptions
            .entry(subject.to_string())
            .or_default()
            .push(Subscription { tx });

        // Dedicated delivery task per subscription keeps per-subject order.
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                callback(delivery);
            }
        });

        Ok(())
    }

    async fn open_durable_context(&self) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        self.durable.store(true, Ordering::Release);
        Ok(())
    }

    async fn close_durable_context(&self) {
        self.durable.store(false, Ordering::Release);
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            // Dropping the senders ends every delivery task.
            self.subscriptions.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn publish_before_connect_is_rejected() {
        let bus = MemoryBus::new();
        let err = bus.publish("system.broadcast.t", vec![1]).await.unwrap_err();
        assert!(matches!(err, BusError::NotConnected));
    }

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let bus = MemoryBus::new();
        bus.connect("memory://local").await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        bus.subscribe(
            "system.broadcast.t",
            Arc::new(move |delivery: Delivery| {
                assert_eq!(delivery.payload, b"hi".to_vec());
                seen_cb.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        bus.publish("system.broadcast.t", b"hi".to_vec()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_drops_subscriptions() {
        let bus = MemoryBus::new();
        bus.connect("memory://local").await.unwrap();
        bus.subscribe("system.broadcast.t", Arc::new(|_| {})).await.unwrap();

        bus.close().await;
        bus.close().await;
        assert!(!bus.is_connected());
    }
}
