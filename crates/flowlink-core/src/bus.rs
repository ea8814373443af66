//! Completion bus abstraction and the completion wire message.
//!
//! The bus only offers pull semantics with at-least-once delivery, so
//! consumers must tolerate duplicates and poll for new messages.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Signal a node publishes once its real work has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMessage {
    /// Name of the node that completed.
    pub completed: String,
    /// Location hint for the node's output artifacts.
    pub artifacts: String,
}

impl CompletionMessage {
    pub fn new(completed: impl Into<String>, artifacts: impl Into<String>) -> Self {
        Self {
            completed: completed.into(),
            artifacts: artifacts.into(),
        }
    }

    /// JSON, then base64 per bus transport convention.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(encode_payload(&json))
    }

    pub fn decode(data: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(data.trim())
            .map_err(|e| Error::Decode(format!("invalid base64: {}", e)))?;
        let message: Self =
            serde_json::from_slice(&raw).map_err(|e| Error::Decode(e.to_string()))?;
        if message.completed.is_empty() {
            return Err(Error::Decode("message names no completed node".to_string()));
        }
        Ok(message)
    }
}

pub fn encode_payload(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

/// Decode a transport payload into text, for logging.
pub fn decode_payload(data: &str) -> Result<String> {
    let raw = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Decode(format!("invalid base64: {}", e)))?;
    String::from_utf8(raw).map_err(|e| Error::Decode(e.to_string()))
}

/// A message pulled from a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// ID to acknowledge this delivery with.
    pub ack_id: String,
    /// ID the bus assigned at publish time; stable across redeliveries.
    pub message_id: String,
    /// Transport-encoded payload.
    pub data: String,
}

/// Trait for completion bus backends.
#[async_trait]
pub trait CompletionBus: Send + Sync {
    /// Create a topic. Fails with `Error::Conflict` if it already exists.
    async fn create_topic(&self, topic: &str) -> Result<()>;

    /// Create a subscription bound to `topic`.
    ///
    /// Only messages published after the subscription exists are delivered
    /// to it.
    async fn create_subscription(&self, subscription: &str, topic: &str) -> Result<()>;

    /// Publish a transport-encoded payload, returning its message ID.
    async fn publish(&self, topic: &str, data: String) -> Result<String>;

    /// Pull up to `max_messages` pending messages. May return none.
    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>>;

    /// Acknowledge deliveries so they are not redelivered.
    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let msg = CompletionMessage::new("build", "artifacts://b/wf/build");
        let encoded = msg.encode().unwrap();

        let json = decode_payload(&encoded).unwrap();
        assert_eq!(
            json,
            r#"{"completed":"build","artifacts":"artifacts://b/wf/build"}"#
        );
        assert_eq!(CompletionMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            CompletionMessage::decode("not base64!"),
            Err(Error::Decode(_))
        ));

        let not_json = encode_payload(b"completed build");
        assert!(matches!(
            CompletionMessage::decode(&not_json),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_decode_requires_completed_name() {
        let empty = encode_payload(br#"{"completed":"","artifacts":""}"#);
        assert!(matches!(
            CompletionMessage::decode(&empty),
            Err(Error::Decode(_))
        ));
    }
}
