//! In-process completion bus.

use async_trait::async_trait;
use flowlink_core::bus::{CompletionBus, ReceivedMessage};
use flowlink_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    data: String,
}

#[derive(Debug)]
struct Outstanding {
    message: StoredMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct Subscription {
    queue: VecDeque<StoredMessage>,
    outstanding: HashMap<String, Outstanding>,
}

#[derive(Debug, Default)]
struct BusState {
    /// Topic name to bound subscription names.
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, Subscription>,
    next_id: u64,
}

impl BusState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// Pub/sub bus held in memory.
///
/// Each published message is copied to every subscription bound to the
/// topic. Pulled messages that are not acknowledged before the ack deadline
/// are delivered again, so consumers see at-least-once delivery.
pub struct MemoryBus {
    state: Mutex<BusState>,
    ack_deadline: Duration,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_ack_deadline(Duration::from_secs(10))
    }

    pub fn with_ack_deadline(ack_deadline: Duration) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            ack_deadline,
        }
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|s| s.topics.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn subscription_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .map(|s| s.subscriptions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BusState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("bus state poisoned".to_string()))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBus for MemoryBus {
    async fn create_topic(&self, topic: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.topics.contains_key(topic) {
            return Err(Error::Conflict(format!("topic {} already exists", topic)));
        }
        state.topics.insert(topic.to_string(), Vec::new());
        debug!(topic, "Created topic");
        Ok(())
    }

    async fn create_subscription(&self, subscription: &str, topic: &str) -> Result<()> {
        let mut state = self.lock()?;
        if state.subscriptions.contains_key(subscription) {
            return Err(Error::Conflict(format!(
                "subscription {} already exists",
                subscription
            )));
        }
        let bound = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| Error::NotFound(format!("topic {}", topic)))?;
        bound.push(subscription.to_string());
        state
            .subscriptions
            .insert(subscription.to_string(), Subscription::default());
        debug!(subscription, topic, "Created subscription");
        Ok(())
    }

    async fn publish(&self, topic: &str, data: String) -> Result<String> {
        let mut state = self.lock()?;
        let message_id = state.next_id("msg");
        let bound = state
            .topics
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("topic {}", topic)))?;

        for name in &bound {
            if let Some(sub) = state.subscriptions.get_mut(name) {
                sub.queue.push_back(StoredMessage {
                    message_id: message_id.clone(),
                    data: data.clone(),
                });
            }
        }
        debug!(topic, message_id = %message_id, subscribers = bound.len(), "Published message");
        Ok(message_id)
    }

    async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let sub = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::NotFound(format!("subscription {}", subscription)))?;

        let now = Instant::now();
        let expired: Vec<String> = sub
            .outstanding
            .iter()
            .filter(|(_, o)| o.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();
        for ack_id in expired {
            if let Some(o) = sub.outstanding.remove(&ack_id) {
                sub.queue.push_front(o.message);
            }
        }

        let mut received = Vec::new();
        while received.len() < max_messages {
            let Some(message) = sub.queue.pop_front() else {
                break;
            };
            state.next_id += 1;
            let ack_id = format!("ack-{}", state.next_id);
            received.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message_id: message.message_id.clone(),
                data: message.data.clone(),
            });
            sub.outstanding.insert(
                ack_id,
                Outstanding {
                    message,
                    deadline: now + self.ack_deadline,
                },
            );
        }
        Ok(received)
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        let mut state = self.lock()?;
        let sub = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::NotFound(format!("subscription {}", subscription)))?;
        for ack_id in ack_ids {
            sub.outstanding.remove(ack_id);
        }
        Ok(())
    }
}
