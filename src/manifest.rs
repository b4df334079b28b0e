//! Manifest System: content-addressed execution tokens preventing
//! duplicate dispatch across pulses and processes.

use crate::fsutil;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const MANIFEST_ID_LEN: usize = 12;
const CLAIM_WINDOW: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Created,
    Claimed,
    Complete,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_id: String,
    pub intent_id: String,
    pub created_at: DateTime<Utc>,
    pub content: serde_json::Value,
    pub status: ManifestStatus,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Manages execution manifests to prevent duplicate dispatch.
pub struct ManifestSystem {
    manifest_dir: PathBuf,
    claimed: DashMap<String, Instant>,
}

impl ManifestSystem {
    pub fn new(root: &Path) -> Self {
        Self {
            manifest_dir: root.join("outgoing").join("coordinator"),
            claimed: DashMap::new(),
        }
    }

    fn path_for(&self, manifest_id: &str) -> PathBuf {
        self.manifest_dir.join(format!("{manifest_id}.json"))
    }

    /// Canonicalize `content` (sorted keys), hash with SHA-256, take the
    /// first 12 hex chars as the manifest id. Identical content always
    /// produces the same id.
    pub async fn create_manifest(&self, intent_id: &str, content: serde_json::Value) -> String {
        let canonical = canonicalize(&content);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hex::encode(hasher.finalize());
        let manifest_id = digest[..MANIFEST_ID_LEN].to_string();

        let manifest = Manifest {
            manifest_id: manifest_id.clone(),
            intent_id: intent_id.to_string(),
            created_at: Utc::now(),
            content,
            status: ManifestStatus::Created,
            claimed_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            error: None,
        };

        if fsutil::write_json_atomic(&self.path_for(&manifest_id), &manifest)
            .await
            .is_err()
        {
            tracing::warn!(manifest_id, "failed to write manifest file");
        }

        manifest_id
    }

    /// First-writer-wins within a 300s claim window, layered on the
    /// content-hash identity for cross-process idempotence.
    pub async fn claim_manifest(&self, manifest_id: &str) -> bool {
        let path = self.path_for(manifest_id);
        if tokio::fs::metadata(&path).await.is_err() {
            return false;
        }

        if let Some(claimed_at) = self.claimed.get(manifest_id) {
            if claimed_at.elapsed() < CLAIM_WINDOW {
                return false;
            }
        }
        self.claimed.insert(manifest_id.to_string(), Instant::now());

        if let Some(mut manifest) = self.read_manifest(&path).await {
            manifest.status = ManifestStatus::Claimed;
            manifest.claimed_at = Some(Utc::now());
            let _ = fsutil::write_json_atomic(&path, &manifest).await;
        }

        true
    }

    pub async fn mark_complete(&self, manifest_id: &str, result: serde_json::Value) {
        let path = self.path_for(manifest_id);
        if let Some(mut manifest) = self.read_manifest(&path).await {
            manifest.status = ManifestStatus::Complete;
            manifest.completed_at = Some(Utc::now());
            manifest.result = Some(result);
            let _ = fsutil::write_json_atomic(&path, &manifest).await;
        }
    }

    pub async fn mark_failed(&self, manifest_id: &str, error: String) {
        let path = self.path_for(manifest_id);
        if let Some(mut manifest) = self.read_manifest(&path).await {
            manifest.status = ManifestStatus::Failed;
            manifest.failed_at = Some(Utc::now());
            manifest.error = Some(error);
            let _ = fsutil::write_json_atomic(&path, &manifest).await;
        }
    }

    pub async fn get_manifest(&self, manifest_id: &str) -> Option<Manifest> {
        self.read_manifest(&self.path_for(manifest_id)).await
    }

    async fn read_manifest(&self, path: &Path) -> Option<Manifest> {
        let contents = tokio::fs::read_to_string(path).await.ok()?;
        serde_json::from_str(&contents).ok()
    }
}

/// Recursively sort object keys so identical content always serializes
/// identically regardless of insertion order.
fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted = serde_json::Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    sorted.insert(key.clone(), sort(&map[key]));
                }
                serde_json::Value::Object(sorted)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    sort(value).to_string()
}
