//! Escalation Manager: stall detection and human-decision handoffs.

use crate::fsutil;
use crate::intents::Intent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const STALL_THRESHOLD_SECS: u64 = 900;

/// An in-flight execution observed as stalled.
#[derive(Clone, Debug)]
pub struct StallEntry {
    pub intent_id: String,
    pub elapsed_minutes: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Intent,
    pub reason: String,
    pub severity: String,
    pub action_required: String,
    pub resolved: bool,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Tracks in-flight executions and raises human-decision escalations for
/// ones that outrun the stall threshold.
pub struct EscalationManager {
    outgoing_dir: PathBuf,
    execution_trackers: DashMap<String, Instant>,
}

impl EscalationManager {
    pub fn new(root: &Path) -> Self {
        Self {
            outgoing_dir: root.join("outgoing").join("escalations"),
            execution_trackers: DashMap::new(),
        }
    }

    pub fn track_execution(&self, intent_id: &str) {
        self.execution_trackers
            .insert(intent_id.to_string(), Instant::now());
    }

    /// Backdates a tracker's start time so stall detection can be
    /// exercised deterministically without a real 900s wait.
    #[doc(hidden)]
    pub fn track_execution_started_ago(&self, intent_id: &str, elapsed: std::time::Duration) {
        let started = Instant::now()
            .checked_sub(elapsed)
            .unwrap_or_else(Instant::now);
        self.execution_trackers.insert(intent_id.to_string(), started);
    }

    pub fn clear_execution(&self, intent_id: &str) {
        self.execution_trackers.remove(intent_id);
    }

    /// Entries with elapsed wall time over the stall threshold.
    pub fn check_stalls(&self) -> Vec<StallEntry> {
        self.execution_trackers
            .iter()
            .filter_map(|entry| {
                let elapsed = entry.value().elapsed();
                if elapsed.as_secs() > STALL_THRESHOLD_SECS {
                    Some(StallEntry {
                        intent_id: entry.key().clone(),
                        elapsed_minutes: elapsed.as_secs_f64() / 60.0,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Writes `esc-<epoch>.json` and returns the escalation id.
    pub async fn escalate(&self, intent: &Intent, reason: &str) -> Result<String, EscalationError> {
        let now = Utc::now();
        let escalation_id = format!("esc-{}", now.timestamp());
        let record = EscalationRecord {
            id: escalation_id.clone(),
            timestamp: now,
            intent: intent.clone(),
            reason: reason.to_string(),
            severity: "medium".to_string(),
            action_required: "human_decision".to_string(),
            resolved: false,
            resolution: None,
            resolved_at: None,
        };

        let path = self.outgoing_dir.join(format!("{escalation_id}.json"));
        fsutil::write_json_atomic(&path, &record).await?;
        Ok(escalation_id)
    }

    pub async fn resolve_escalation(
        &self,
        escalation_id: &str,
        decision: &str,
    ) -> Result<(), EscalationError> {
        let path = self.outgoing_dir.join(format!("{escalation_id}.json"));
        let contents = tokio::fs::read_to_string(&path).await?;
        let mut record: EscalationRecord = serde_json::from_str(&contents)?;
        record.resolved = true;
        record.resolution = Some(decision.to_string());
        record.resolved_at = Some(Utc::now());
        fsutil::write_json_atomic(&path, &record).await?;
        Ok(())
    }

    /// All unresolved escalation records under the outgoing directory.
    pub async fn get_active_escalations(&self) -> Vec<EscalationRecord> {
        let mut active = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.outgoing_dir).await {
            Ok(e) => e,
            Err(_) => return active,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("esc-") || !name.ends_with(".json") {
                continue;
            }
            if let Ok(contents) = tokio::fs::read_to_string(entry.path()).await {
                if let Ok(record) = serde_json::from_str::<EscalationRecord>(&contents) {
                    if !record.resolved {
                        active.push(record);
                    }
                }
            }
        }
        active
    }
}
