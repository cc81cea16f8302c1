//! Message bus transport.
//!
//! The broker is an opaque peer reached over HTTP: `POST` to publish,
//! long-poll `GET` to consume. Both directions sit behind traits; the
//! in-memory bus implements the same contract for tests and local runs.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long one consume poll parks on the broker.
const POLL_WAIT: Duration = Duration::from_secs(20);
/// Request timeout; must outlast the poll wait.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause before re-polling after a transport failure.
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bus returned HTTP {0}")]
    Http(u16),
}

/// Outbound half: returns once the broker acknowledged the message.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError>;
}

/// Inbound half: messages arrive on the returned channel until the
/// receiver is dropped.
#[async_trait]
pub trait BusConsumer: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Value>, BusError>;
}

/// HTTP client for the broker at `BUS_ENDPOINT`.
#[derive(Debug, Clone)]
pub struct HttpBusClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBusClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url: base_url.into(),
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}/messages", self.base_url, topic)
    }
}

#[async_trait]
impl BusPublisher for HttpBusClient {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let response = self
            .client
            .post(self.topic_url(topic))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BusError::Http(status.as_u16()));
        }
        debug!(topic, "message published");
        Ok(())
    }
}

#[async_trait]
impl BusConsumer for HttpBusClient {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Value>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = self.topic_url(topic);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                let poll = client
                    .get(&url)
                    .query(&[("wait", POLL_WAIT.as_secs())])
                    .send()
                    .await;

                let messages: Vec<Value> = match poll {
                    Ok(response) if response.status().is_success() => {
                        match response.json().await {
                            Ok(messages) => messages,
                            Err(e) => {
                                warn!(%topic, error = %e, "undecodable poll response");
                                tokio::time::sleep(RETRY_DELAY).await;
                                continue;
                            }
                        }
                    }
                    Ok(response) => {
                        warn!(%topic, status = %response.status(), "poll rejected");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                    Err(e) => {
                        warn!(%topic, error = %e, "poll failed");
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                };

                for message in messages {
                    if tx.send(message).is_err() {
                        // Receiver gone; subscription over
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// In-process bus with the same at-least-once contract, used by tests.
#[derive(Debug, Default)]
pub struct MemoryBus {
    topics: DashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl BusConsumer for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<Value>, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_bus_fan_out() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("prices").await.unwrap();
        let mut b = bus.subscribe("prices").await.unwrap();
        let mut other = bus.subscribe("events").await.unwrap();

        bus.publish("prices", json!({"n": 1})).await.unwrap();

        assert_eq!(a.recv().await.unwrap()["n"], 1);
        assert_eq!(b.recv().await.unwrap()["n"], 1);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_memory_bus_drops_closed_subscribers() {
        let bus = MemoryBus::new();
        let rx = bus.subscribe("prices").await.unwrap();
        drop(rx);

        // Publishing to a topic with only closed receivers still succeeds
        bus.publish("prices", json!({"n": 2})).await.unwrap();

        let mut fresh = bus.subscribe("prices").await.unwrap();
        bus.publish("prices", json!({"n": 3})).await.unwrap();
        assert_eq!(fresh.recv().await.unwrap()["n"], 3);
    }
}
