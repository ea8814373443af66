//! In-memory doubles for step tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use flowlink_core::artifact::{ArtifactStore, BucketPolicy, ObjectInfo, ObjectStream};
use flowlink_core::bus::{CompletionBus, CompletionMessage, ReceivedMessage, encode_payload};
use flowlink_core::{Error, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bus that hands out pre-scripted pull batches.
#[derive(Default)]
pub struct ScriptedBus {
    pub topics: Mutex<Vec<String>>,
    pub subscriptions: Mutex<HashMap<String, String>>,
    pub batches: Mutex<VecDeque<Vec<ReceivedMessage>>>,
    pub acked: Mutex<Vec<String>>,
    pub published: Mutex<Vec<(String, String)>>,
    pub pulls: AtomicUsize,
    pub fail_publish: bool,
    pub fail_pull: bool,
}

impl ScriptedBus {
    pub fn push_batch(&self, messages: Vec<ReceivedMessage>) {
        self.batches.lock().unwrap().push_back(messages);
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

pub fn completion(ack_id: &str, node: &str) -> ReceivedMessage {
    ReceivedMessage {
        ack_id: ack_id.to_string(),
        message_id: format!("msg-{}", ack_id),
        data: CompletionMessage::new(node, format!("artifacts://bucket/wf/{}", node))
            .encode()
            .unwrap(),
    }
}

pub fn raw(ack_id: &str, payload: &[u8]) -> ReceivedMessage {
    ReceivedMessage {
        ack_id: ack_id.to_string(),
        message_id: format!("msg-{}", ack_id),
        data: encode_payload(payload),
    }
}

#[async_trait]
impl CompletionBus for ScriptedBus {
    async fn create_topic(&self, topic: &str) -> Result<()> {
        let mut topics = self.topics.lock().unwrap();
        if topics.iter().any(|t| t == topic) {
            return Err(Error::Conflict(topic.to_string()));
        }
        topics.push(topic.to_string());
        Ok(())
    }

    async fn create_subscription(&self, subscription: &str, topic: &str) -> Result<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.to_string(), topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, data: String) -> Result<String> {
        if self.fail_publish {
            return Err(Error::Internal("publish unavailable".to_string()));
        }
        let mut published = self.published.lock().unwrap();
        published.push((topic.to_string(), data));
        Ok(format!("msg-{}", published.len()))
    }

    async fn pull(&self, _subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pull {
            return Err(Error::Internal("pull unavailable".to_string()));
        }
        let batch = self.batches.lock().unwrap().pop_front().unwrap_or_default();
        assert!(batch.len() <= max_messages);
        Ok(batch)
    }

    async fn acknowledge(&self, _subscription: &str, ack_ids: &[String]) -> Result<()> {
        self.acked.lock().unwrap().extend(ack_ids.iter().cloned());
        Ok(())
    }
}

/// Artifact store backed by a map, counting reads.
#[derive(Default)]
pub struct MapStore {
    pub objects: Mutex<BTreeMap<(String, String), Bytes>>,
    pub reads: AtomicUsize,
    pub fail_reads_of: Option<String>,
}

impl MapStore {
    pub fn insert(&self, bucket: &str, key: &str, data: &str) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            Bytes::from(data.to_string()),
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MapStore {
    async fn create_bucket(&self, _bucket: &str, _owner_project: &str) -> Result<()> {
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<ObjectStream> {
        let objects: Vec<Result<ObjectInfo>> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), data)| {
                Ok(ObjectInfo {
                    key: k.clone(),
                    size: data.len() as u64,
                    updated_at: Utc::now(),
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(objects)))
    }

    async fn read_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads_of.as_deref() == Some(key) {
            return Err(Error::Internal(format!("read of {} failed", key)));
        }
        self.get(bucket, key)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn write_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn bucket_policy(&self, _bucket: &str) -> Result<BucketPolicy> {
        Ok(BucketPolicy::default())
    }
}
