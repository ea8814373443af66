//! Artifact relay from a completed dependency into a node's input area.

use flowlink_core::artifact::ArtifactStore;
use flowlink_core::workflow::Dependency;
use flowlink_core::{ArtifactLocation, Error, Result};
use futures::StreamExt;
use futures::future::try_join_all;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::StepLog;

/// Copies a dependency's output objects into local input directories.
pub struct ArtifactRelay {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactRelay {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Copy every object under `<prefix>/<dependency>/` into
    /// `<input_dir>/<local name>/`, keeping paths relative to the
    /// dependency's prefix.
    ///
    /// Objects are downloaded concurrently; the first failed transfer fails
    /// the whole relay. Returns the number of objects copied.
    pub async fn relay(
        &self,
        prefix: &ArtifactLocation,
        dependency: &Dependency,
        input_dir: &Path,
        log: &StepLog,
    ) -> Result<usize> {
        let source = prefix.join(&dependency.name);
        let source_prefix = source.dir_prefix();
        let target_dir = input_dir.join(dependency.local_name());

        let mut objects = self
            .store
            .list_objects(&source.bucket, &source_prefix)
            .await
            .map_err(|e| Error::Relay(format!("could not list {}: {}", source, e)))?;

        let mut transfers = Vec::new();
        while let Some(object) = objects.next().await {
            let object =
                object.map_err(|e| Error::Relay(format!("could not list {}: {}", source, e)))?;
            let relative = object
                .key
                .strip_prefix(&source_prefix)
                .unwrap_or(&object.key)
                .to_string();
            // Zero-byte directory markers carry no content.
            if relative.is_empty() || relative.ends_with('/') {
                debug!(key = %object.key, "Skipping directory marker");
                continue;
            }
            let local_path = local_path(&target_dir, &relative)?;
            transfers.push(self.transfer(&source.bucket, object.key, local_path, log));
        }

        let copied = try_join_all(transfers).await?.len();
        info!(
            dependency = %dependency.name,
            objects = copied,
            target = %target_dir.display(),
            "Relayed artifacts"
        );
        Ok(copied)
    }

    async fn transfer(
        &self,
        bucket: &str,
        key: String,
        local_path: PathBuf,
        log: &StepLog,
    ) -> Result<()> {
        let data = self
            .store
            .read_object(bucket, &key)
            .await
            .map_err(|e| Error::Relay(format!("could not read object {:?}: {}", key, e)))?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Relay(format!(
                    "could not create directory for artifact {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        tokio::fs::write(&local_path, &data).await.map_err(|e| {
            Error::Relay(format!(
                "could not download artifact {}: {}",
                local_path.display(),
                e
            ))
        })?;

        debug!(key = %key, path = %local_path.display(), bytes = data.len(), "Downloaded artifact");
        log.emit(format!("Downloaded {} to {}", key, local_path.display()));
        Ok(())
    }
}

/// Join an object's relative key onto `target_dir`, refusing keys that
/// would escape it.
fn local_path(target_dir: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(Error::Relay(format!(
            "refusing artifact path {:?}",
            relative.display().to_string()
        )));
    }
    Ok(target_dir.join(relative))
}
