//! Shared helpers for integration tests: a tempdir-backed root and
//! deterministic collaborator stand-ins.

use async_trait::async_trait;
use station_calyx::collaborators::{ArtifactGateError, EvidenceEvent, EvidenceSink, IntentArtifactGate};
use station_calyx::coordinator::Coordinator;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Gate that accepts every intent without consulting the filesystem.
pub struct AlwaysClarified;

#[async_trait]
impl IntentArtifactGate for AlwaysClarified {
    async fn require_clarified(&self, _intent_id: &str) -> Result<(), ArtifactGateError> {
        Ok(())
    }
}

/// Gate that rejects every intent with a fixed reason.
pub struct AlwaysRejects(pub ArtifactGateError);

#[async_trait]
impl IntentArtifactGate for AlwaysRejects {
    async fn require_clarified(&self, _intent_id: &str) -> Result<(), ArtifactGateError> {
        Err(self.0)
    }
}

/// Evidence sink that records every event for later assertions.
#[derive(Default)]
pub struct RecordingEvidenceSink {
    events: Mutex<Vec<EvidenceEvent>>,
}

#[async_trait]
impl EvidenceSink for RecordingEvidenceSink {
    async fn append_event(&self, event: EvidenceEvent) {
        self.events.lock().await.push(event);
    }
}

impl RecordingEvidenceSink {
    pub async fn events(&self) -> Vec<EvidenceEvent> {
        self.events.lock().await.clone()
    }
}

/// A coordinator wired against a fresh temp directory, with an
/// always-clarifying gate and a recording evidence sink. The returned
/// `TempDir` must be kept alive for the coordinator's lifetime.
pub async fn coordinator_with_temp_root() -> (Coordinator, TempDir, Arc<RecordingEvidenceSink>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let evidence = Arc::new(RecordingEvidenceSink::default());
    let coordinator = Coordinator::load(dir.path(), Arc::new(AlwaysClarified), evidence.clone())
        .await
        .expect("load coordinator against fresh root");
    (coordinator, dir, evidence)
}
