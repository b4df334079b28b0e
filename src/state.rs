//! State Core: single source of truth for the shared world model.

use crate::fsutil;
use crate::intents::AutonomyMode;
use crate::telemetry::EventEnvelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const OVERSEER_SOURCE: &str = "cbo_overseer";
const METRICS_SOURCE: &str = "agent_scheduler";
const CONSECUTIVE_FAILURE_VIOLATION_THRESHOLD: i64 = 3;

/// The persisted world model. Rewritten in full after every event batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemState {
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub resource_headroom: serde_json::Value,
    #[serde(default)]
    pub gates: serde_json::Value,
    #[serde(default)]
    pub agent_status: serde_json::Value,
    #[serde(default)]
    pub tes_summary: serde_json::Value,
    #[serde(default)]
    pub failure_streaks: HashMap<String, i64>,
    #[serde(default)]
    pub autonomy_mode: AutonomyMode,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            resource_headroom: serde_json::json!({}),
            gates: serde_json::json!({}),
            agent_status: serde_json::json!({}),
            tes_summary: serde_json::json!({}),
            failure_streaks: HashMap::new(),
            autonomy_mode: AutonomyMode::Suggest,
        }
    }
}

/// Outcome of a guardrail check.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardrailReport {
    pub violations: Vec<String>,
    pub ok: bool,
}

pub struct StateCore {
    state_file: PathBuf,
    state: RwLock<SystemState>,
}

impl StateCore {
    pub async fn load(root: &Path) -> Result<Self, StateError> {
        let state_file = root.join("state").join("coordinator_state.json");
        let state = match fsutil::read_to_string_opt(&state_file).await? {
            Some(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            None => SystemState::default(),
        };
        Ok(Self {
            state_file,
            state: RwLock::new(state),
        })
    }

    async fn save(&self) -> Result<(), StateError> {
        let mut state = self.state.write().await;
        state.last_updated = Utc::now().max(state.last_updated);
        fsutil::write_json_atomic(&self.state_file, &*state).await?;
        Ok(())
    }

    /// Apply each envelope in order; overseer events overwrite gates,
    /// resource headroom, and agent status; metric events update failure
    /// streaks. Rewrites state to disk after the batch.
    pub async fn update_from_events(&self, events: &[EventEnvelope]) {
        {
            let mut state = self.state.write().await;
            for event in events {
                match event.source.as_str() {
                    OVERSEER_SOURCE => Self::apply_overseer_event(&mut state, &event.payload),
                    METRICS_SOURCE => Self::apply_metrics_event(&mut state, &event.payload),
                    _ => {}
                }
            }
        }
        if self.save().await.is_err() {
            tracing::warn!("failed to persist coordinator state after update");
        }
    }

    fn apply_overseer_event(state: &mut SystemState, payload: &serde_json::Value) {
        if let Some(gates) = payload.get("gates") {
            state.gates = gates.clone();
        }
        if let Some(capacity) = payload.get("capacity") {
            state.resource_headroom = capacity.clone();
        }
        if let Some(locks) = payload.get("locks") {
            state.agent_status = locks.clone();
        }
    }

    fn apply_metrics_event(state: &mut SystemState, payload: &serde_json::Value) {
        let status = payload.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
        if status != "done" {
            let mode = payload
                .get("autonomy_mode")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            let key = format!("failure_{mode}");
            *state.failure_streaks.entry(key).or_insert(0) += 1;
        } else {
            for count in state.failure_streaks.values_mut() {
                *count = 0;
            }
        }
    }

    /// Pure function over current state: a violation string for each false
    /// resource-OK flag, plus a consecutive-failure violation.
    pub async fn check_guardrails(&self) -> GuardrailReport {
        let state = self.state.read().await;
        let mut violations = Vec::new();

        let headroom = &state.resource_headroom;
        if headroom.get("cpu_ok").and_then(|v| v.as_bool()) == Some(false) {
            violations.push("CPU headroom critical".to_string());
        }
        if headroom.get("mem_ok").and_then(|v| v.as_bool()) == Some(false) {
            violations.push("RAM headroom critical".to_string());
        }
        if headroom.get("gpu_ok").and_then(|v| v.as_bool()) == Some(false) {
            violations.push("GPU headroom critical".to_string());
        }

        if state
            .failure_streaks
            .values()
            .any(|&count| count >= CONSECUTIVE_FAILURE_VIOLATION_THRESHOLD)
        {
            violations.push("Too many consecutive failures".to_string());
        }

        let ok = violations.is_empty();
        GuardrailReport { violations, ok }
    }

    pub async fn get_autonomy_mode(&self) -> AutonomyMode {
        self.state.read().await.autonomy_mode
    }

    pub async fn set_autonomy_mode(&self, mode: AutonomyMode) {
        {
            let mut state = self.state.write().await;
            state.autonomy_mode = mode;
        }
        if self.save().await.is_err() {
            tracing::warn!("failed to persist coordinator state after autonomy mode change");
        }
    }

    pub async fn get_resource_headroom(&self) -> serde_json::Value {
        self.state.read().await.resource_headroom.clone()
    }

    pub async fn snapshot(&self) -> SystemState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::EventCategory;
    use tempfile::tempdir;

    fn overseer_event(gates_ok: bool) -> EventEnvelope {
        EventEnvelope {
            timestamp: Utc::now(),
            source: OVERSEER_SOURCE.to_string(),
            category: EventCategory::Status,
            payload: serde_json::json!({
                "gates": {"ok": gates_ok},
                "capacity": {"cpu_ok": gates_ok, "mem_ok": true, "gpu_ok": true},
                "locks": {},
            }),
            confidence: 1.0,
            version: "e1".to_string(),
        }
    }

    fn metrics_event(status: &str, mode: &str) -> EventEnvelope {
        EventEnvelope {
            timestamp: Utc::now(),
            source: METRICS_SOURCE.to_string(),
            category: EventCategory::Metric,
            payload: serde_json::json!({"status": status, "autonomy_mode": mode}),
            confidence: 0.9,
            version: "e1".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_state_defaults_to_suggest_mode() {
        let dir = tempdir().unwrap();
        let state = StateCore::load(dir.path()).await.unwrap();
        assert_eq!(state.get_autonomy_mode().await, AutonomyMode::Suggest);
    }

    #[tokio::test]
    async fn corrupt_state_file_yields_default() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join("state");
        tokio::fs::create_dir_all(&state_dir).await.unwrap();
        tokio::fs::write(state_dir.join("coordinator_state.json"), "not json")
            .await
            .unwrap();

        let state = StateCore::load(dir.path()).await.unwrap();
        assert_eq!(state.get_autonomy_mode().await, AutonomyMode::Suggest);
    }

    #[tokio::test]
    async fn overseer_event_updates_resource_headroom() {
        let dir = tempdir().unwrap();
        let state = StateCore::load(dir.path()).await.unwrap();
        state.update_from_events(&[overseer_event(false)]).await;
        let guardrails = state.check_guardrails().await;
        assert!(!guardrails.ok);
        assert!(guardrails.violations.iter().any(|v| v.contains("CPU")));
    }

    #[tokio::test]
    async fn consecutive_failures_trigger_guardrail_violation() {
        let dir = tempdir().unwrap();
        let state = StateCore::load(dir.path()).await.unwrap();
        for _ in 0..3 {
            state.update_from_events(&[metrics_event("error", "execute")]).await;
        }
        let guardrails = state.check_guardrails().await;
        assert!(guardrails
            .violations
            .iter()
            .any(|v| v.contains("consecutive failures")));
    }

    #[tokio::test]
    async fn success_resets_failure_streaks() {
        let dir = tempdir().unwrap();
        let state = StateCore::load(dir.path()).await.unwrap();
        for _ in 0..3 {
            state.update_from_events(&[metrics_event("error", "execute")]).await;
        }
        state.update_from_events(&[metrics_event("done", "execute")]).await;
        let guardrails = state.check_guardrails().await;
        assert!(guardrails.ok);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempdir().unwrap();
        {
            let state = StateCore::load(dir.path()).await.unwrap();
            state.set_autonomy_mode(AutonomyMode::Execute).await;
        }
        let reloaded = StateCore::load(dir.path()).await.unwrap();
        assert_eq!(reloaded.get_autonomy_mode().await, AutonomyMode::Execute);
    }
}
