// In-process push transport on a tokio broadcast channel.
//
// A websocket gateway (or a test) subscribes and forwards each message to the
// sockets joined to `topic`. With nobody subscribed a push is simply dropped.

use crate::core::notifications::{NotificationError, PushTransport, Topic};
use async_trait::async_trait;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
}

pub struct BroadcastTransport {
    sender: broadcast::Sender<PushMessage>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl PushTransport for BroadcastTransport {
    async fn push(
        &self,
        topics: &[Topic],
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), NotificationError> {
        if self.sender.receiver_count() == 0 {
            tracing::debug!(event, "No push subscribers; event dropped");
            return Ok(());
        }

        for topic in topics {
            let message = PushMessage {
                topic: topic.to_string(),
                event: event.to_string(),
                payload: payload.clone(),
            };
            // Receivers may drop between the count check and the send.
            if self.sender.send(message).is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_one_message_per_topic() {
        let transport = BroadcastTransport::new(16);
        let mut rx = transport.subscribe();

        transport
            .push(
                &[Topic::User(1), Topic::User(2)],
                "notification:new",
                &serde_json::json!({ "title": "hi" }),
            )
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().topic, "user:1");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.topic, "user:2");
        assert_eq!(second.event, "notification:new");
    }

    #[tokio::test]
    async fn push_without_subscribers_is_not_an_error() {
        let transport = BroadcastTransport::new(4);
        let result = transport
            .push(&[Topic::Admins], "moderation:queue_changed", &serde_json::json!({}))
            .await;
        assert!(result.is_ok());
    }
}
