//! Coordinator: the executive layer wiring telemetry, state, intents,
//! execution, verification, and escalation into one pulse cycle.

use crate::collaborators::{EvidenceSink, IntentArtifactGate};
use crate::config::CoordinatorConfig;
use crate::domains::DomainRegistry;
use crate::error::Result;
use crate::escalation::EscalationManager;
use crate::execution::{self, ExecutionOutcome};
use crate::fsutil;
use crate::intents::{AutonomyMode, Intent, IntentPipeline, Risk};
use crate::manifest::ManifestSystem;
use crate::state::{GuardrailReport, StateCore};
use crate::telemetry::TelemetryIntake;
use crate::verification::VerificationLoop;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// One intent's execution outcome, tagged for the pulse report.
#[derive(Clone, Debug, Serialize)]
pub struct PulseExecution {
    pub intent_id: String,
    pub result: ExecutionOutcome,
}

/// Everything a single `pulse()` observed and did.
#[derive(Clone, Debug, Serialize)]
pub struct PulseReport {
    pub timestamp: chrono::DateTime<Utc>,
    pub events_ingested: usize,
    pub guardrails: GuardrailReport,
    pub intents_expired: usize,
    pub intents_queued: usize,
    pub intents_prioritized: usize,
    pub resource_headroom: serde_json::Value,
    pub autonomy_mode: AutonomyMode,
    pub top_intents: Vec<Intent>,
    pub executions: Vec<PulseExecution>,
    pub stalls: Vec<String>,
    pub active_escalations: usize,
}

/// Current Coordinator status, as surfaced to the CLI `status` command.
#[derive(Clone, Debug, Serialize)]
pub struct CoordinatorStatus {
    pub state: crate::state::SystemState,
    pub intents_count: usize,
    pub confidence: HashMap<String, f64>,
    pub autonomy_mode: AutonomyMode,
}

/// Orchestrates the 7-step pulse cycle over a filesystem-mediated root.
pub struct Coordinator {
    root: PathBuf,
    config: CoordinatorConfig,
    telemetry: TelemetryIntake,
    state: StateCore,
    intents: IntentPipeline,
    verification: VerificationLoop,
    manifests: ManifestSystem,
    escalation: EscalationManager,
    domains: DomainRegistry,
}

impl Coordinator {
    pub async fn load(
        root: &Path,
        artifact_gate: Arc<dyn IntentArtifactGate>,
        evidence: Arc<dyn EvidenceSink>,
    ) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            config: CoordinatorConfig::default().with_root_dir(root.to_path_buf()),
            telemetry: TelemetryIntake::new(root),
            state: StateCore::load(root).await?,
            intents: IntentPipeline::load(root, artifact_gate, evidence).await?,
            verification: VerificationLoop::load(root).await?,
            manifests: ManifestSystem::new(root),
            escalation: EscalationManager::new(root),
            domains: DomainRegistry::new(root),
        })
    }

    /// Overrides the tunables loaded by `load`'s default configuration
    /// (telemetry window, stall threshold, pulse limits) while keeping the
    /// same filesystem root and collaborators.
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    fn bridge_dir(&self) -> PathBuf {
        self.root.join("outgoing").join("bridge")
    }

    /// Execute one coordinator pulse: reflect, guard, expire, prioritize,
    /// detect stalls, execute up to two intents, then audit.
    pub async fn pulse(&self) -> PulseReport {
        let events = self.telemetry.ingest_recent(self.config.telemetry_window).await;
        let events_ingested = events.len();
        self.state.update_from_events(&events).await;

        let guardrails = self.state.check_guardrails().await;
        let intents_expired = self.intents.expire_intents().await;
        let prioritized = self.intents.get_prioritized(self.config.prioritized_limit).await;
        let intents_queued = self.intents.len().await;

        let stalls = self.escalation.check_stalls();
        for stall in &stalls {
            if let Some(intent) = self.intents.get_intent(&stall.intent_id).await {
                let reason = format!("Execution stalled for {:.1} minutes", stall.elapsed_minutes);
                match self.escalation.escalate(&intent, &reason).await {
                    Ok(escalation_id) => {
                        warn!(escalation_id, intent_id = %stall.intent_id, "escalation created for stalled intent");
                    }
                    Err(e) => warn!(error = %e, "failed to write escalation record"),
                }
            }
        }

        let mut executions = Vec::new();
        let autonomy_mode = self.state.get_autonomy_mode().await;
        if matches!(autonomy_mode, AutonomyMode::Guide | AutonomyMode::Execute) {
            let state_snapshot = self.state.snapshot().await;
            for intent in prioritized.iter().take(self.config.max_executions_per_pulse) {
                let can_exec = execution::can_execute(intent, &state_snapshot, &self.domains);
                self.append_debug(&format!(
                    "considering intent={} autonomy={:?} can_execute={can_exec}",
                    intent.id, intent.autonomy_required
                ))
                .await;

                if !can_exec {
                    continue;
                }

                let span = tracing::info_span!("execute_intent", intent_id = %intent.id);
                let result = execution::execute_intent(
                    intent,
                    &state_snapshot,
                    &self.domains,
                    &self.manifests,
                    &self.escalation,
                    |result| async move {
                        let outcome = self.verification.verify_execution(intent, &result).await;
                        (outcome.success, outcome.confidence)
                    },
                )
                .instrument(span)
                .await;

                if result.status_str() != "skipped" {
                    self.intents.remove_intent(&intent.id).await;
                    self.append_debug(&format!(
                        "removed intent={} after status={}",
                        intent.id,
                        result.status_str()
                    ))
                    .await;
                }
                self.append_debug(&format!(
                    "executed intent={} result_status={}",
                    intent.id,
                    result.status_str()
                ))
                .await;

                executions.push(PulseExecution {
                    intent_id: intent.id.clone(),
                    result,
                });
            }
        }

        let active_escalations = self.escalation.get_active_escalations().await.len();

        let report = PulseReport {
            timestamp: Utc::now(),
            events_ingested,
            guardrails,
            intents_expired,
            intents_queued,
            intents_prioritized: prioritized.len(),
            resource_headroom: self.state.get_resource_headroom().await,
            autonomy_mode,
            top_intents: prioritized.into_iter().take(3).collect(),
            executions,
            stalls: stalls
                .iter()
                .map(|s| format!("{} ({:.1}m)", s.intent_id, s.elapsed_minutes))
                .collect(),
            active_escalations,
        };

        self.write_report(&report).await;
        self.write_audit_summary(&report).await;
        self.write_dialog_log(&report).await;

        info!(
            events_ingested = report.events_ingested,
            executions = report.executions.len(),
            "pulse complete"
        );
        report
    }

    async fn append_debug(&self, line: &str) {
        let path = self.bridge_dir().join("coord_debug.log");
        let full_line = format!("{} DEBUG> {line}", Utc::now().to_rfc3339());
        if let Err(e) = fsutil::append_line(&path, &full_line).await {
            warn!(error = %e, "failed to write coordinator debug trace");
        }
    }

    async fn write_report(&self, report: &PulseReport) {
        let path = self.bridge_dir().join("last_pulse_report.json");
        if let Err(e) = fsutil::write_json_atomic(&path, report).await {
            warn!(error = %e, "failed to write last_pulse_report.json");
        }
    }

    async fn write_audit_summary(&self, report: &PulseReport) {
        let summary = serde_json::json!({
            "timestamp": report.timestamp,
            "executions": report.executions.iter().map(|e| serde_json::json!({
                "intent_id": e.intent_id,
                "status": e.result.status_str(),
                "manifest_id": e.result.manifest_id(),
                "domain": e.result.domain_name(),
            })).collect::<Vec<_>>(),
        });
        let path = self.bridge_dir().join("execution_audit_summary.json");
        if let Err(e) = fsutil::write_json_atomic(&path, &summary).await {
            warn!(error = %e, "failed to write execution_audit_summary.json");
        }
    }

    async fn write_dialog_log(&self, report: &PulseReport) {
        if report.executions.is_empty() {
            return;
        }
        let ts = Utc::now().to_rfc3339();
        let path = self.bridge_dir().join("dialog.log");
        for execution in &report.executions {
            let mut line = format!(
                "{ts} COORD> intent={} status={}",
                execution.intent_id,
                execution.result.status_str()
            );
            if let Some(manifest_id) = execution.result.manifest_id() {
                line.push_str(&format!(" manifest={manifest_id}"));
            }
            if let Some(domain) = execution.result.domain_name() {
                line.push_str(&format!(" domain={domain}"));
            }
            if let Some(error) = execution.result.error_message() {
                line.push_str(&format!(" error={error}"));
            }
            if let Err(e) = fsutil::append_line(&path, &line).await {
                warn!(error = %e, "failed to write coordinator execution audit");
                break;
            }
        }
    }

    /// Create a new intent with an epoch-derived id, per the filesystem
    /// contract other tools expect (`i-<unix seconds>`).
    pub async fn add_intent(
        &self,
        description: String,
        origin: String,
        required_capabilities: Vec<String>,
        desired_outcome: String,
        priority_hint: i64,
        autonomy_required: AutonomyMode,
    ) -> Option<String> {
        let intent_id = format!("i-{}", Utc::now().timestamp());
        let intent = Intent {
            id: intent_id.clone(),
            origin,
            description,
            required_capabilities,
            desired_outcome,
            priority_hint,
            expiry: None,
            autonomy_required,
            risk: Risk::default(),
            similar_to: Vec::new(),
            version: "i1".to_string(),
        };

        if self.intents.add_intent(intent).await {
            Some(intent_id)
        } else {
            None
        }
    }

    pub async fn set_autonomy_mode(&self, mode: AutonomyMode) {
        self.state.set_autonomy_mode(mode).await;
    }

    pub async fn get_status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            state: self.state.snapshot().await,
            intents_count: self.intents.len().await,
            confidence: self.verification.get_all_confidence().await,
            autonomy_mode: self.state.get_autonomy_mode().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ArtifactGateError, EvidenceEvent};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct AlwaysClarified;
    #[async_trait]
    impl IntentArtifactGate for AlwaysClarified {
        async fn require_clarified(&self, _intent_id: &str) -> std::result::Result<(), ArtifactGateError> {
            Ok(())
        }
    }

    struct NullSink;
    #[async_trait]
    impl EvidenceSink for NullSink {
        async fn append_event(&self, _event: EvidenceEvent) {}
    }

    async fn build_coordinator(root: &Path) -> Coordinator {
        Coordinator::load(root, Arc::new(AlwaysClarified), Arc::new(NullSink))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn pulse_on_empty_root_produces_clean_report() {
        let dir = tempdir().unwrap();
        let coordinator = build_coordinator(dir.path()).await;
        let report = coordinator.pulse().await;
        assert_eq!(report.events_ingested, 0);
        assert!(report.guardrails.ok);
        assert!(report.executions.is_empty());
    }

    #[tokio::test]
    async fn add_intent_generates_epoch_id_and_enqueues() {
        let dir = tempdir().unwrap();
        let coordinator = build_coordinator(dir.path()).await;
        let id = coordinator
            .add_intent(
                "rotate logs".to_string(),
                "operator".to_string(),
                vec!["log_rotation".to_string()],
                "clean logs dir".to_string(),
                50,
                AutonomyMode::Suggest,
            )
            .await;
        assert!(id.is_some());
        assert!(id.unwrap().starts_with("i-"));

        let status = coordinator.get_status().await;
        assert_eq!(status.intents_count, 1);
    }

    #[tokio::test]
    async fn suggest_mode_never_executes_even_when_matching() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();
        let coordinator = build_coordinator(dir.path()).await;
        coordinator
            .add_intent(
                "validate".to_string(),
                "operator".to_string(),
                vec!["schema_validation".to_string()],
                String::new(),
                50,
                AutonomyMode::Suggest,
            )
            .await;

        let report = coordinator.pulse().await;
        assert!(report.executions.is_empty());
        assert_eq!(report.intents_queued, 1);
    }

    #[tokio::test]
    async fn execute_mode_runs_matching_intent_and_dequeues_it() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();
        let coordinator = build_coordinator(dir.path()).await;
        coordinator
            .add_intent(
                "validate".to_string(),
                "operator".to_string(),
                vec!["schema_validation".to_string()],
                String::new(),
                50,
                AutonomyMode::Execute,
            )
            .await;
        coordinator.state.set_autonomy_mode(AutonomyMode::Execute).await;

        let report = coordinator.pulse().await;
        assert_eq!(report.executions.len(), 1);
        assert_eq!(report.executions[0].result.status_str(), "done");
        assert_eq!(report.intents_queued, 0);
    }
}
