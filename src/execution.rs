//! Execution Engine: matches an intent's required capabilities to a
//! domain, wraps the attempt in a claimed manifest, and reports a
//! uniform outcome.

use crate::domains::DomainRegistry;
use crate::escalation::EscalationManager;
use crate::intents::Intent;
use crate::manifest::ManifestSystem;
use crate::state::SystemState;
use serde::Serialize;

/// Outcome of attempting to execute one intent during a pulse.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum ExecutionOutcome {
    Done {
        manifest_id: String,
        domain: String,
        result: serde_json::Value,
        confidence: f64,
    },
    Failed {
        manifest_id: String,
        domain: String,
        result: serde_json::Value,
        rollback: serde_json::Value,
    },
    Error {
        manifest_id: String,
        error: String,
    },
    Skipped {
        reason: String,
    },
}

impl ExecutionOutcome {
    pub fn status_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Done { .. } => "done",
            ExecutionOutcome::Failed { .. } => "failed",
            ExecutionOutcome::Error { .. } => "error",
            ExecutionOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn manifest_id(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Done { manifest_id, .. } => Some(manifest_id),
            ExecutionOutcome::Failed { manifest_id, .. } => Some(manifest_id),
            ExecutionOutcome::Error { manifest_id, .. } => Some(manifest_id),
            ExecutionOutcome::Skipped { .. } => None,
        }
    }

    pub fn domain_name(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Done { domain, .. } => Some(domain),
            ExecutionOutcome::Failed { domain, .. } => Some(domain),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// First domain across an intent's required capabilities whose
/// `can_execute` currently returns true.
pub fn matching_capability<'a>(
    intent: &'a Intent,
    state: &SystemState,
    registry: &DomainRegistry,
) -> Option<&'a str> {
    intent
        .required_capabilities
        .iter()
        .map(|c| c.as_str())
        .find(|capability| registry.can_execute(capability, state))
}

/// Whether any of the intent's required capabilities currently has a
/// domain able to run it.
pub fn can_execute(intent: &Intent, state: &SystemState, registry: &DomainRegistry) -> bool {
    matching_capability(intent, state, registry).is_some()
}

/// Executes one intent: claims a manifest, dispatches to the matching
/// domain, verifies the result, and rolls back on verification failure.
/// `verify_and_learn` wraps confidence-learning so the engine stays
/// decoupled from the Verification Loop's persistence.
pub async fn execute_intent<F, Fut>(
    intent: &Intent,
    state: &SystemState,
    registry: &DomainRegistry,
    manifests: &ManifestSystem,
    escalation: &EscalationManager,
    verify_and_learn: F,
) -> ExecutionOutcome
where
    F: FnOnce(serde_json::Value) -> Fut,
    Fut: std::future::Future<Output = (bool, f64)>,
{
    let Some(capability) = matching_capability(intent, state, registry) else {
        return ExecutionOutcome::Skipped {
            reason: "No matching autonomous domain".to_string(),
        };
    };
    let capability = capability.to_string();

    let content = serde_json::json!({
        "intent_id": intent.id,
        "capability": capability,
        "description": intent.description,
    });
    let manifest_id = manifests.create_manifest(&intent.id, content).await;

    if !manifests.claim_manifest(&manifest_id).await {
        return ExecutionOutcome::Skipped {
            reason: "Manifest already claimed by another process".to_string(),
        };
    }

    escalation.track_execution(&intent.id);

    let domain = registry
        .get(&capability)
        .expect("capability resolved by matching_capability must exist in the registry");

    let result = domain.execute().await;
    let (success, confidence) = verify_and_learn(result.clone()).await;

    let outcome = if success {
        manifests.mark_complete(&manifest_id, result.clone()).await;
        ExecutionOutcome::Done {
            manifest_id,
            domain: capability,
            result,
            confidence,
        }
    } else {
        let rollback = domain.rollback(&result).await;
        let error = result
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string();
        manifests.mark_failed(&manifest_id, error).await;
        ExecutionOutcome::Failed {
            manifest_id,
            domain: capability,
            result,
            rollback,
        }
    };

    escalation.clear_execution(&intent.id);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{LOG_ROTATION, SCHEMA_VALIDATION};
    use crate::intents::{AutonomyMode, Risk};
    use tempfile::tempdir;

    fn sample_intent(capabilities: Vec<&str>) -> Intent {
        Intent {
            id: "i-1".to_string(),
            origin: "test".to_string(),
            description: "validate schemas".to_string(),
            required_capabilities: capabilities.into_iter().map(String::from).collect(),
            desired_outcome: "clean logs".to_string(),
            priority_hint: 50,
            expiry: None,
            autonomy_required: AutonomyMode::Execute,
            risk: Risk::default(),
            similar_to: Vec::new(),
            version: "i1".to_string(),
        }
    }

    #[tokio::test]
    async fn no_matching_capability_is_skipped() {
        let dir = tempdir().unwrap();
        let registry = DomainRegistry::new(dir.path());
        let manifests = ManifestSystem::new(dir.path());
        let escalation = EscalationManager::new(dir.path());
        let intent = sample_intent(vec![LOG_ROTATION]);
        let state = SystemState::default();

        let outcome = execute_intent(&intent, &state, &registry, &manifests, &escalation, |_| async {
            (true, 0.8)
        })
        .await;

        assert_eq!(outcome.status_str(), "skipped");
    }

    #[tokio::test]
    async fn schema_validation_succeeds_when_no_malformed_files() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("logs")).await.unwrap();
        let registry = DomainRegistry::new(dir.path());
        let manifests = ManifestSystem::new(dir.path());
        let escalation = EscalationManager::new(dir.path());
        let intent = sample_intent(vec![SCHEMA_VALIDATION]);
        let state = SystemState::default();

        let outcome = execute_intent(&intent, &state, &registry, &manifests, &escalation, |result| async move {
            let success = result.get("status").and_then(|v| v.as_str()) == Some("done");
            (success, if success { 0.82 } else { 0.75 })
        })
        .await;

        assert_eq!(outcome.status_str(), "done");
        assert!(escalation.check_stalls().is_empty());
    }

    #[tokio::test]
    async fn verification_failure_triggers_rollback_and_mark_failed() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();
        tokio::fs::write(logs.join("bad.json"), b"not json").await.unwrap();

        let registry = DomainRegistry::new(dir.path());
        let manifests = ManifestSystem::new(dir.path());
        let escalation = EscalationManager::new(dir.path());
        let intent = sample_intent(vec![SCHEMA_VALIDATION]);
        let state = SystemState::default();

        let outcome = execute_intent(&intent, &state, &registry, &manifests, &escalation, |_| async {
            (false, 0.75)
        })
        .await;

        match outcome {
            ExecutionOutcome::Failed { .. } => {}
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
