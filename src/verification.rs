//! Verification Loop: bounded confidence learning plus an append-only
//! execution history.

use crate::fsutil;
use crate::intents::Intent;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const DEFAULT_CONFIDENCE: f64 = 0.8;
const SUCCESS_DELTA: f64 = 0.02;
const FAILURE_DELTA: f64 = 0.05;
const CONFIDENCE_FLOOR: f64 = 0.3;
const CONFIDENCE_CEILING: f64 = 1.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct HistoryEntry {
    timestamp: chrono::DateTime<Utc>,
    intent_id: String,
    intent_description: String,
    result: serde_json::Value,
    success: bool,
}

/// Outcome of verifying one execution: whether it counted as a success
/// and the capability's updated confidence.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationOutcome {
    pub success: bool,
    pub confidence: f64,
    pub capability: String,
}

/// Tracks per-capability confidence and an append-only execution history.
pub struct VerificationLoop {
    confidence_file: PathBuf,
    history_file: PathBuf,
    confidence: RwLock<HashMap<String, f64>>,
}

impl VerificationLoop {
    pub async fn load(root: &Path) -> Result<Self, VerificationError> {
        let confidence_file = root.join("state").join("coordinator_confidence.json");
        let confidence = match fsutil::read_to_string_opt(&confidence_file).await? {
            Some(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            None => HashMap::new(),
        };
        Ok(Self {
            confidence_file,
            history_file: root.join("state").join("coordinator_history.jsonl"),
            confidence: RwLock::new(confidence),
        })
    }

    pub async fn get_confidence(&self, capability: &str) -> f64 {
        self.confidence
            .read()
            .await
            .get(capability)
            .copied()
            .unwrap_or(DEFAULT_CONFIDENCE)
    }

    pub async fn get_all_confidence(&self) -> HashMap<String, f64> {
        self.confidence.read().await.clone()
    }

    /// Bounded additive confidence update, then an append to the history
    /// log. `result.status == "done"` is the sole success criterion.
    pub async fn verify_execution(&self, intent: &Intent, result: &serde_json::Value) -> VerificationOutcome {
        let success = result.get("status").and_then(|v| v.as_str()) == Some("done");
        let capability = intent
            .required_capabilities
            .first()
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        let new_confidence = {
            let mut confidence = self.confidence.write().await;
            let current = confidence.get(&capability).copied().unwrap_or(DEFAULT_CONFIDENCE);
            let updated = if success {
                (current + SUCCESS_DELTA).min(CONFIDENCE_CEILING)
            } else {
                (current - FAILURE_DELTA).max(CONFIDENCE_FLOOR)
            };
            confidence.insert(capability.clone(), updated);
            updated
        };

        if let Err(e) = self.persist_confidence().await {
            tracing::warn!(error = %e, "failed to persist confidence map");
        }
        if let Err(e) = self.append_history(intent, result, success).await {
            tracing::warn!(error = %e, "failed to append execution history");
        }

        VerificationOutcome {
            success,
            confidence: new_confidence,
            capability,
        }
    }

    async fn persist_confidence(&self) -> Result<(), VerificationError> {
        let confidence = self.confidence.read().await;
        fsutil::write_json_atomic(&self.confidence_file, &*confidence).await?;
        Ok(())
    }

    async fn append_history(
        &self,
        intent: &Intent,
        result: &serde_json::Value,
        success: bool,
    ) -> Result<(), VerificationError> {
        let entry = HistoryEntry {
            timestamp: Utc::now(),
            intent_id: intent.id.clone(),
            intent_description: intent.description.clone(),
            result: result.clone(),
            success,
        };
        let line = serde_json::to_string(&entry)?;
        fsutil::append_line(&self.history_file, &line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intents::{AutonomyMode, Risk};
    use tempfile::tempdir;

    fn sample_intent(capability: &str) -> Intent {
        Intent {
            id: "i-1".to_string(),
            origin: "test".to_string(),
            description: "rotate logs".to_string(),
            required_capabilities: vec![capability.to_string()],
            desired_outcome: String::new(),
            priority_hint: 50,
            expiry: None,
            autonomy_required: AutonomyMode::Execute,
            risk: Risk::default(),
            similar_to: Vec::new(),
            version: "i1".to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_capability_defaults_to_eighty_percent() {
        let dir = tempdir().unwrap();
        let verification = VerificationLoop::load(dir.path()).await.unwrap();
        assert_eq!(verification.get_confidence("log_rotation").await, DEFAULT_CONFIDENCE);
    }

    #[tokio::test]
    async fn success_raises_confidence_by_fixed_delta() {
        let dir = tempdir().unwrap();
        let verification = VerificationLoop::load(dir.path()).await.unwrap();
        let intent = sample_intent("log_rotation");
        let outcome = verification
            .verify_execution(&intent, &serde_json::json!({"status": "done"}))
            .await;
        assert!(outcome.success);
        assert!((outcome.confidence - (DEFAULT_CONFIDENCE + SUCCESS_DELTA)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failure_lowers_confidence_by_fixed_delta() {
        let dir = tempdir().unwrap();
        let verification = VerificationLoop::load(dir.path()).await.unwrap();
        let intent = sample_intent("log_rotation");
        let outcome = verification
            .verify_execution(&intent, &serde_json::json!({"status": "error"}))
            .await;
        assert!(!outcome.success);
        assert!((outcome.confidence - (DEFAULT_CONFIDENCE - FAILURE_DELTA)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn confidence_never_drops_below_floor() {
        let dir = tempdir().unwrap();
        let verification = VerificationLoop::load(dir.path()).await.unwrap();
        let intent = sample_intent("log_rotation");
        for _ in 0..20 {
            verification
                .verify_execution(&intent, &serde_json::json!({"status": "error"}))
                .await;
        }
        assert_eq!(verification.get_confidence("log_rotation").await, CONFIDENCE_FLOOR);
    }

    #[tokio::test]
    async fn confidence_never_exceeds_ceiling() {
        let dir = tempdir().unwrap();
        let verification = VerificationLoop::load(dir.path()).await.unwrap();
        let intent = sample_intent("log_rotation");
        for _ in 0..20 {
            verification
                .verify_execution(&intent, &serde_json::json!({"status": "done"}))
                .await;
        }
        assert_eq!(verification.get_confidence("log_rotation").await, CONFIDENCE_CEILING);
    }

    #[tokio::test]
    async fn history_is_appended_as_ndjson() {
        let dir = tempdir().unwrap();
        let verification = VerificationLoop::load(dir.path()).await.unwrap();
        let intent = sample_intent("log_rotation");
        verification
            .verify_execution(&intent, &serde_json::json!({"status": "done"}))
            .await;
        verification
            .verify_execution(&intent, &serde_json::json!({"status": "error"}))
            .await;

        let contents = tokio::fs::read_to_string(dir.path().join("state/coordinator_history.jsonl"))
            .await
            .unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn confidence_survives_reload() {
        let dir = tempdir().unwrap();
        {
            let verification = VerificationLoop::load(dir.path()).await.unwrap();
            let intent = sample_intent("log_rotation");
            verification
                .verify_execution(&intent, &serde_json::json!({"status": "done"}))
                .await;
        }
        let reloaded = VerificationLoop::load(dir.path()).await.unwrap();
        assert!((reloaded.get_confidence("log_rotation").await - (DEFAULT_CONFIDENCE + SUCCESS_DELTA)).abs() < 1e-9);
    }
}
