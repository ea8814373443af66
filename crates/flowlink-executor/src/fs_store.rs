//! Filesystem-backed artifact store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flowlink_core::artifact::{ArtifactStore, BucketPolicy, ObjectInfo, ObjectStream};
use flowlink_core::{Error, Result};
use futures::stream;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// Artifact store rooted at a local directory.
///
/// Each bucket is the directory `{root}/{bucket}` and each object the file
/// `{root}/{bucket}/{key}`. The bucket's policy sits next to it in
/// `{root}/{bucket}.policy.json`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket.starts_with('.') {
            return Err(Error::InvalidInput(format!("invalid bucket name {:?}", bucket)));
        }
        Ok(self.root.join(bucket))
    }

    fn policy_path(&self, bucket: &str) -> Result<PathBuf> {
        self.bucket_dir(bucket)?;
        Ok(self.root.join(format!("{}.policy.json", bucket)))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::InvalidInput(format!("invalid object key {:?}", key)));
        }
        Ok(self.bucket_dir(bucket)?.join(relative))
    }

    async fn existing_bucket(&self, bucket: &str) -> Result<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if !fs::try_exists(&dir).await? {
            return Err(Error::NotFound(format!("bucket {}", bucket)));
        }
        Ok(dir)
    }
}

fn not_found(e: std::io::Error, what: String) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(what)
    } else {
        Error::Io(e)
    }
}

fn list_dir(dir: &Path, prefix: &str) -> Result<Vec<ObjectInfo>> {
    let mut objects = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Internal(format!("could not walk bucket: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let key = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Internal(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !key.starts_with(prefix) {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| Error::Internal(format!("could not stat {}: {}", key, e)))?;
        let updated_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        objects.push(ObjectInfo {
            key,
            size: metadata.len(),
            updated_at,
        });
    }
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn create_bucket(&self, bucket: &str, owner_project: &str) -> Result<()> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&self.root).await?;
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Conflict(format!("bucket {} already exists", bucket)));
            }
            Err(e) => return Err(Error::Io(e)),
        }

        let policy = serde_json::to_vec_pretty(&BucketPolicy::owned_by(owner_project))
            .map_err(|e| Error::Internal(e.to_string()))?;
        fs::write(self.policy_path(bucket)?, policy).await?;
        debug!(bucket, owner = owner_project, "Created bucket");
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<ObjectStream> {
        let dir = self.existing_bucket(bucket).await?;
        let prefix = prefix.to_string();
        let objects = tokio::task::spawn_blocking(move || list_dir(&dir, &prefix))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        Ok(Box::pin(stream::iter(objects.into_iter().map(Ok))))
    }

    async fn read_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let path = self.object_path(bucket, key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| not_found(e, format!("object {}/{}", bucket, key)))?;
        Ok(Bytes::from(data))
    }

    async fn write_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        self.existing_bucket(bucket).await?;
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        Ok(())
    }

    async fn bucket_policy(&self, bucket: &str) -> Result<BucketPolicy> {
        self.existing_bucket(bucket).await?;
        let path = self.policy_path(bucket)?;
        match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| Error::Internal(format!("corrupt policy for {}: {}", bucket, e))),
            // A bucket without a policy file has no bindings.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BucketPolicy::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
