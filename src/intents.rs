//! Intent Pipeline: the ordered set of pending intents, with artifact
//! gating, deduplication, aging, and priority scoring.

use crate::collaborators::{ArtifactGateError, EvidenceEvent, EvidenceSink, IntentArtifactGate};
use crate::fsutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Autonomy level an intent requires for the Coordinator to act on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    Suggest,
    Guide,
    Execute,
}

impl AutonomyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyMode::Suggest => "suggest",
            AutonomyMode::Guide => "guide",
            AutonomyMode::Execute => "execute",
        }
    }
}

impl Default for AutonomyMode {
    fn default() -> Self {
        AutonomyMode::Suggest
    }
}

/// Risk scoring attached to an intent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Risk {
    #[serde(default = "default_risk_value")]
    pub impact: i64,
    #[serde(default = "default_risk_value")]
    pub likelihood: i64,
    #[serde(default = "default_risk_score")]
    pub score: i64,
}

fn default_risk_value() -> i64 {
    1
}
fn default_risk_score() -> i64 {
    2
}

impl Default for Risk {
    fn default() -> Self {
        Self {
            impact: 1,
            likelihood: 1,
            score: 2,
        }
    }
}

/// Intent (i1): a declarative statement of something the operator or an
/// internal policy wants done.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub origin: String,
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub desired_outcome: String,
    #[serde(default = "default_priority_hint")]
    pub priority_hint: i64,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub autonomy_required: AutonomyMode,
    #[serde(default)]
    pub risk: Risk,
    #[serde(default)]
    pub similar_to: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_priority_hint() -> i64 {
    50
}
fn default_version() -> String {
    "i1".to_string()
}

const MAX_FRESHNESS_BOOST: f64 = 20.0;

impl Intent {
    /// priority = priority_hint + 10*impact + 5*likelihood + freshness_boost
    pub fn priority(&self, now: DateTime<Utc>) -> f64 {
        self.priority_hint as f64
            + 10.0 * self.risk.impact as f64
            + 5.0 * self.risk.likelihood as f64
            + self.freshness_boost(now)
    }

    fn freshness_boost(&self, now: DateTime<Utc>) -> f64 {
        match self.expiry {
            Some(expiry) if expiry > now => {
                let hours_until_expiry = (expiry - now).num_seconds() as f64 / 3600.0;
                (hours_until_expiry * 2.0).min(MAX_FRESHNESS_BOOST)
            }
            _ => 0.0,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if expiry < now)
    }
}

/// In-memory, file-backed queue of pending intents.
pub struct IntentPipeline {
    intents_file: PathBuf,
    intents: RwLock<Vec<Intent>>,
    artifact_gate: Arc<dyn IntentArtifactGate>,
    evidence: Arc<dyn EvidenceSink>,
}

impl IntentPipeline {
    pub async fn load(
        root: &Path,
        artifact_gate: Arc<dyn IntentArtifactGate>,
        evidence: Arc<dyn EvidenceSink>,
    ) -> Result<Self, IntentError> {
        let intents_file = root.join("state").join("coordinator_intents.jsonl");
        let intents = Self::load_from_disk(&intents_file).await?;
        Ok(Self {
            intents_file,
            intents: RwLock::new(intents),
            artifact_gate,
            evidence,
        })
    }

    async fn load_from_disk(path: &Path) -> Result<Vec<Intent>, IntentError> {
        let contents = match fsutil::read_to_string_opt(path).await? {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };

        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Intent>(line).ok())
            .collect())
    }

    async fn persist(&self, intents: &[Intent]) -> Result<(), IntentError> {
        let mut buf = String::new();
        for intent in intents {
            buf.push_str(&serde_json::to_string(intent)?);
            buf.push('\n');
        }
        fsutil::write_bytes_atomic(&self.intents_file, buf.as_bytes()).await?;
        Ok(())
    }

    /// Gate on a clarified intent artifact, then dedup by
    /// `(description, required_capabilities)`. Returns true on accept.
    pub async fn add_intent(&self, intent: Intent) -> bool {
        if let Err(gate_error) = self.artifact_gate.require_clarified(&intent.id).await {
            self.emit_rejection(&intent, gate_error).await;
            return false;
        }

        let mut intents = self.intents.write().await;
        let is_duplicate = intents.iter().any(|existing| {
            existing.description == intent.description
                && existing.required_capabilities == intent.required_capabilities
        });
        if is_duplicate {
            return false;
        }

        intents.push(intent);
        if self.persist(&intents).await.is_err() {
            tracing::warn!("failed to persist intent pipeline after add");
        }
        true
    }

    async fn emit_rejection(&self, intent: &Intent, gate_error: ArtifactGateError) {
        let (event_type, summary, tags) = match gate_error {
            ArtifactGateError::NoArtifact => (
                "INTENT_REJECTED_NO_ARTIFACT",
                format!("Intent {} rejected: no artifact", intent.id),
                vec!["intent", "rejection", "no_artifact"],
            ),
            ArtifactGateError::Unclarified => (
                "INTENT_REJECTED_UNCLARIFIED",
                format!("Intent {} rejected: unclarified", intent.id),
                vec!["intent", "rejection", "clarification_required"],
            ),
            ArtifactGateError::ArtifactError => (
                "INTENT_REJECTED_ARTIFACT_ERROR",
                format!("Intent {} rejected: artifact error", intent.id),
                vec!["intent", "rejection", "artifact_error"],
            ),
        };

        self.evidence
            .append_event(EvidenceEvent {
                event_type: event_type.to_string(),
                node_role: "intent_pipeline".to_string(),
                summary,
                payload: serde_json::json!({"intent_id": intent.id}),
                tags: tags.into_iter().map(String::from).collect(),
                session_id: intent.id.clone(),
            })
            .await;
    }

    /// Top `limit` intents by descending priority, ties broken by
    /// insertion order (stable sort).
    pub async fn get_prioritized(&self, limit: usize) -> Vec<Intent> {
        let now = Utc::now();
        let intents = self.intents.read().await;
        let mut scored: Vec<(f64, Intent)> = intents
            .iter()
            .map(|i| (i.priority(now), i.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, i)| i).collect()
    }

    pub async fn remove_intent(&self, intent_id: &str) {
        let mut intents = self.intents.write().await;
        intents.retain(|i| i.id != intent_id);
        if self.persist(&intents).await.is_err() {
            tracing::warn!(intent_id, "failed to persist intent pipeline after removal");
        }
    }

    pub async fn get_intent(&self, intent_id: &str) -> Option<Intent> {
        self.intents
            .read()
            .await
            .iter()
            .find(|i| i.id == intent_id)
            .cloned()
    }

    /// Remove expired intents, returning the count removed.
    pub async fn expire_intents(&self) -> usize {
        let now = Utc::now();
        let mut intents = self.intents.write().await;
        let before = intents.len();
        intents.retain(|i| !i.is_expired(now));
        let removed = before - intents.len();
        if removed > 0 && self.persist(&intents).await.is_err() {
            tracing::warn!("failed to persist intent pipeline after expiry");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.intents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<Intent> {
        self.intents.read().await.clone()
    }
}
