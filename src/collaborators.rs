//! External collaborator interfaces.
//!
//! The intent artifact store and the evidence stream are owned by other
//! systems; the Coordinator only consumes two narrow gate operations and
//! one append operation. Both are represented as injected trait objects
//! (mirroring a dependency-injection pattern used elsewhere in this
//! codebase) so production code can wire filesystem-backed defaults while
//! tests wire deterministic mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of loading and checking an intent artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactGateError {
    /// No artifact exists for this intent id.
    NoArtifact,
    /// An artifact exists but has not been clarified.
    Unclarified,
    /// The artifact could not be loaded (I/O or parse failure).
    ArtifactError,
}

/// Gate consulted by the Intent Pipeline before accepting a new intent.
#[async_trait]
pub trait IntentArtifactGate: Send + Sync {
    /// Returns `Ok(())` if the intent artifact exists and is clarified,
    /// otherwise the specific rejection reason.
    async fn require_clarified(&self, intent_id: &str) -> Result<(), ArtifactGateError>;
}

/// A typed evidence event the Coordinator emits on rejection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceEvent {
    pub event_type: String,
    pub node_role: String,
    pub summary: String,
    pub payload: serde_json::Value,
    pub tags: Vec<String>,
    pub session_id: String,
}

/// Sink for typed evidence events.
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    async fn append_event(&self, event: EvidenceEvent);
}

/// Filesystem-backed `IntentArtifactGate`: treats
/// `<root>/state/intent_artifacts/<intent_id>.json` containing
/// `{"clarified": bool}` as the artifact.
pub struct FsIntentArtifactGate {
    artifacts_dir: PathBuf,
}

impl FsIntentArtifactGate {
    pub fn new(root: &std::path::Path) -> Self {
        Self {
            artifacts_dir: root.join("state").join("intent_artifacts"),
        }
    }
}

#[async_trait]
impl IntentArtifactGate for FsIntentArtifactGate {
    async fn require_clarified(&self, intent_id: &str) -> Result<(), ArtifactGateError> {
        let path = self.artifacts_dir.join(format!("{intent_id}.json"));
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactGateError::NoArtifact)
            }
            Err(_) => return Err(ArtifactGateError::ArtifactError),
        };

        let artifact: serde_json::Value =
            serde_json::from_str(&contents).map_err(|_| ArtifactGateError::ArtifactError)?;

        match artifact.get("clarified").and_then(|v| v.as_bool()) {
            Some(true) => Ok(()),
            _ => Err(ArtifactGateError::Unclarified),
        }
    }
}

/// Filesystem-backed `EvidenceSink`: appends one NDJSON line per event to
/// `outgoing/bridge/evidence.jsonl`.
pub struct FsEvidenceSink {
    evidence_log: PathBuf,
}

impl FsEvidenceSink {
    pub fn new(root: &std::path::Path) -> Self {
        Self {
            evidence_log: root.join("outgoing").join("bridge").join("evidence.jsonl"),
        }
    }
}

#[async_trait]
impl EvidenceSink for FsEvidenceSink {
    async fn append_event(&self, event: EvidenceEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(l) => l,
            Err(_) => return,
        };
        let _ = crate::fsutil::append_line(&self.evidence_log, &line).await;
    }
}
