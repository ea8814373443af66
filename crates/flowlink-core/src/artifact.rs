//! Artifact storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Role that marks the owner of a bucket.
pub const BUCKET_OWNER_ROLE: &str = "roles/storage.legacyBucketOwner";

/// Policy member naming the owners of a project.
pub fn project_owner(project_id: &str) -> String {
    format!("projectOwner:{}", project_id)
}

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Full key within the bucket.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// When the object was last written.
    pub updated_at: DateTime<Utc>,
}

/// One role granted to a set of members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub role: String,
    pub members: Vec<String>,
}

/// Access policy of a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketPolicy {
    pub bindings: Vec<PolicyBinding>,
}

impl BucketPolicy {
    /// Policy for a bucket created by `project_id`.
    pub fn owned_by(project_id: &str) -> Self {
        Self {
            bindings: vec![PolicyBinding {
                role: BUCKET_OWNER_ROLE.to_string(),
                members: vec![project_owner(project_id)],
            }],
        }
    }

    pub fn has_role(&self, member: &str, role: &str) -> bool {
        self.bindings
            .iter()
            .any(|b| b.role == role && b.members.iter().any(|m| m == member))
    }

    pub fn is_owned_by(&self, project_id: &str) -> bool {
        self.has_role(&project_owner(project_id), BUCKET_OWNER_ROLE)
    }
}

/// Stream of objects returned by a listing.
pub type ObjectStream = BoxStream<'static, Result<ObjectInfo>>;

/// Trait for artifact storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create a bucket owned by `owner_project`.
    ///
    /// Fails with `Error::Conflict` if the bucket already exists, whoever
    /// owns it.
    async fn create_bucket(&self, bucket: &str, owner_project: &str) -> Result<()>;

    /// List objects whose key starts with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<ObjectStream>;

    /// Read an object's contents.
    async fn read_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Write an object, replacing any existing one.
    async fn write_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()>;

    /// Fetch the bucket's access policy.
    async fn bucket_policy(&self, bucket: &str) -> Result<BucketPolicy>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_by() {
        let policy = BucketPolicy::owned_by("proj");
        assert!(policy.is_owned_by("proj"));
        assert!(!policy.is_owned_by("other"));
        assert!(policy.has_role("projectOwner:proj", BUCKET_OWNER_ROLE));
        assert!(!policy.has_role("projectOwner:proj", "roles/storage.objectViewer"));
    }

    #[test]
    fn test_empty_policy_has_no_owner() {
        assert!(!BucketPolicy::default().is_owned_by("proj"));
    }
}
