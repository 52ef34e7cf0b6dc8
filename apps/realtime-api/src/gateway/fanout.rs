//! Pub/sub transport between publishers and brokers.
//!
//! Channels are event names plus the `:reauthorize` control channel. Messages carry
//! no privacy decisions: a broker re-checks every candidate before delivery.
//!
//! [`LocalTransport`] is an in-process `tokio::sync::broadcast` hub for single-node
//! deployments and tests. [`RedisTransport`] spans processes.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::broadcast;

use crate::error::TransportError;

use super::events::{EventName, REAUTHORIZE_CHANNEL};

/// Capacity of the local broadcast channel. A listener that falls behind skips
/// messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// One message as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub channel: String,
    pub body: String,
}

/// Every channel a broker listens on.
pub fn channels() -> Vec<&'static str> {
    EventName::ALL
        .iter()
        .map(|name| name.channel())
        .chain(std::iter::once(REAUTHORIZE_CHANNEL))
        .collect()
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, channel: &str, body: String) -> Result<(), TransportError>;

    /// Listen on every broker channel. The stream ends when the underlying
    /// connection is lost; callers resubscribe.
    async fn subscribe(&self) -> Result<BoxStream<'static, TransportMessage>, TransportError>;
}

/// In-process transport. Cloneable; clones share the same hub.
#[derive(Clone)]
pub struct LocalTransport {
    sender: broadcast::Sender<Arc<TransportMessage>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(&self, channel: &str, body: String) -> Result<(), TransportError> {
        // send() returns Err if there are no listeners; nobody to deliver to.
        let _ = self.sender.send(Arc::new(TransportMessage {
            channel: channel.to_string(),
            body,
        }));
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, TransportMessage>, TransportError> {
        let rx = self.sender.subscribe();
        let messages = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((TransportMessage::clone(&message), rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "broker lagged behind local transport");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(messages.boxed())
    }
}

/// Redis pub/sub transport.
#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
}

impl RedisTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_connection_manager().await?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, body: String) -> Result<(), TransportError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(channel, body).await.map_err(|e| {
            tracing::error!(?e, channel, "redis publish failed");
            TransportError::from(e)
        })
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, TransportMessage>, TransportError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels() {
            pubsub.subscribe(channel).await?;
        }
        let messages = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(body) => Some(TransportMessage { channel, body }),
                Err(e) => {
                    tracing::warn!(?e, %channel, "dropping non-text redis message");
                    None
                }
            }
        });
        Ok(messages.boxed())
    }
}
