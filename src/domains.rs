//! Autonomous domains: the concrete, bounded operations the Execution
//! Engine is allowed to dispatch to.

use crate::fsutil;
use crate::state::SystemState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const LOG_ROTATION: &str = "log_rotation";
pub const METRICS_SUMMARY: &str = "metrics_summary";
pub const SCHEMA_VALIDATION: &str = "schema_validation";
pub const AUTO_RESTART: &str = "auto_restart";
pub const MEMORY_EMBEDDINGS: &str = "memory_embeddings";

/// A bounded, reversible operation the Coordinator may execute on behalf
/// of an intent whose capabilities include this domain's name.
#[async_trait]
pub trait Domain: Send + Sync {
    fn can_execute(&self, state: &SystemState) -> bool;
    async fn execute(&self) -> serde_json::Value;
    fn verify_success(&self, result: &serde_json::Value) -> bool {
        result.get("status").and_then(|v| v.as_str()) == Some("done")
    }
    async fn rollback(&self, result: &serde_json::Value) -> serde_json::Value;
}

fn done(extra: serde_json::Value) -> serde_json::Value {
    let mut obj = serde_json::json!({"status": "done"});
    if let (Some(obj_map), Some(extra_map)) = (obj.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_map {
            obj_map.insert(k.clone(), v.clone());
        }
    }
    obj
}

fn error_result(message: String) -> serde_json::Value {
    serde_json::json!({"status": "error", "error": message})
}

const LOG_ROTATION_THRESHOLD: usize = 20;
const LOG_ROTATION_AGE_DAYS: u64 = 7;

pub struct LogRotationDomain {
    logs_dir: PathBuf,
}

impl LogRotationDomain {
    pub fn new(root: &Path) -> Self {
        Self {
            logs_dir: root.join("logs"),
        }
    }

    async fn log_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.logs_dir).await {
            Ok(e) => e,
            Err(_) => return files,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                files.push(path);
            }
        }
        files
    }
}

#[async_trait]
impl Domain for LogRotationDomain {
    fn can_execute(&self, _state: &SystemState) -> bool {
        // can_execute is sync; approximate with a blocking read_dir since
        // log counts rarely matter mid-tick. Executed only from within an
        // async context by callers, so this is acceptable for a local
        // filesystem check.
        std::fs::read_dir(&self.logs_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("log"))
                    .count()
                    > LOG_ROTATION_THRESHOLD
            })
            .unwrap_or(false)
    }

    async fn execute(&self) -> serde_json::Value {
        let archive_dir = self.logs_dir.join("archive");
        if let Err(e) = tokio::fs::create_dir_all(&archive_dir).await {
            return error_result(e.to_string());
        }

        let cutoff = SystemTime::now() - Duration::from_secs(LOG_ROTATION_AGE_DAYS * 86_400);
        let mut rotated = 0u64;
        for file in self.log_files().await {
            let metadata = match tokio::fs::metadata(&file).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = match metadata.modified() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if modified < cutoff {
                if let Some(name) = file.file_name() {
                    if tokio::fs::rename(&file, archive_dir.join(name)).await.is_ok() {
                        rotated += 1;
                    }
                }
            }
        }

        done(serde_json::json!({
            "rotated_files": rotated,
            "message": format!("Rotated {rotated} log files"),
        }))
    }

    fn verify_success(&self, result: &serde_json::Value) -> bool {
        result.get("status").and_then(|v| v.as_str()) == Some("done")
            && result.get("rotated_files").and_then(|v| v.as_u64()).unwrap_or(0) > 0
    }

    async fn rollback(&self, _result: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({"status": "noop", "message": "log rotation is not reversible in place"})
    }
}

const METRICS_SUMMARY_STALE_SECS: u64 = 3600;
const METRICS_TES_WINDOW: usize = 20;

pub struct MetricsSummaryDomain {
    metrics_csv: PathBuf,
    summary_file: PathBuf,
}

impl MetricsSummaryDomain {
    pub fn new(root: &Path) -> Self {
        Self {
            metrics_csv: root.join("logs").join("agent_metrics.csv"),
            summary_file: root.join("outgoing").join("metrics_summary.json"),
        }
    }

    fn tes_column(headers: &csv::StringRecord, row: &csv::StringRecord) -> Option<f64> {
        headers
            .iter()
            .position(|h| h == "tes")
            .and_then(|i| row.get(i))
            .and_then(|v| v.parse::<f64>().ok())
    }
}

#[async_trait]
impl Domain for MetricsSummaryDomain {
    fn can_execute(&self, _state: &SystemState) -> bool {
        match std::fs::metadata(&self.summary_file) {
            Err(_) => true,
            Ok(metadata) => match metadata.modified() {
                Ok(modified) => modified
                    .elapsed()
                    .map(|age| age.as_secs() > METRICS_SUMMARY_STALE_SECS)
                    .unwrap_or(true),
                Err(_) => true,
            },
        }
    }

    async fn execute(&self) -> serde_json::Value {
        let contents = match tokio::fs::read_to_string(&self.metrics_csv).await {
            Ok(c) => c,
            Err(e) => return error_result(e.to_string()),
        };

        let mut reader = csv::Reader::from_reader(contents.as_bytes());
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(e) => return error_result(e.to_string()),
        };

        let tes_values: Vec<f64> = reader
            .records()
            .filter_map(Result::ok)
            .filter_map(|row| Self::tes_column(&headers, &row))
            .collect();

        let window: Vec<f64> = tes_values
            .iter()
            .rev()
            .take(METRICS_TES_WINDOW)
            .copied()
            .collect();

        if window.is_empty() {
            return error_result("no metrics rows available".to_string());
        }

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let max = window.iter().cloned().fold(f64::MIN, f64::max);
        let min = window.iter().cloned().fold(f64::MAX, f64::min);

        let summary = serde_json::json!({"mean_tes": mean, "max_tes": max, "min_tes": min});
        if fsutil::write_json_atomic(&self.summary_file, &summary)
            .await
            .is_err()
        {
            return error_result("failed to write metrics summary".to_string());
        }

        done(serde_json::json!({"summary": summary}))
    }

    fn verify_success(&self, result: &serde_json::Value) -> bool {
        result.get("status").and_then(|v| v.as_str()) == Some("done")
            && self.summary_file.exists()
    }

    async fn rollback(&self, _result: &serde_json::Value) -> serde_json::Value {
        let _ = tokio::fs::remove_file(&self.summary_file).await;
        serde_json::json!({"status": "rolled_back"})
    }
}

const SCHEMA_JSON_SAMPLE: usize = 10;
const SCHEMA_JSONL_SAMPLE: usize = 5;

pub struct SchemaValidationDomain {
    logs_dir: PathBuf,
}

impl SchemaValidationDomain {
    pub fn new(root: &Path) -> Self {
        Self {
            logs_dir: root.join("logs"),
        }
    }

    async fn newest_files(&self, extension: &str, limit: usize) -> Vec<PathBuf> {
        let mut entries = match tokio::fs::read_dir(&self.logs_dir).await {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            if let Ok(metadata) = entry.metadata().await {
                if let Ok(modified) = metadata.modified() {
                    files.push((modified, path));
                }
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        files.into_iter().take(limit).map(|(_, p)| p).collect()
    }
}

#[async_trait]
impl Domain for SchemaValidationDomain {
    fn can_execute(&self, _state: &SystemState) -> bool {
        true
    }

    async fn execute(&self) -> serde_json::Value {
        let mut errors = Vec::new();
        let mut validated = 0u64;

        for file in self.newest_files("json", SCHEMA_JSON_SAMPLE).await {
            validated += 1;
            if let Ok(contents) = tokio::fs::read_to_string(&file).await {
                if let Err(e) = serde_json::from_str::<serde_json::Value>(&contents) {
                    errors.push(serde_json::json!({"file": file.display().to_string(), "error": e.to_string()}));
                }
            }
        }

        for file in self.newest_files("jsonl", SCHEMA_JSONL_SAMPLE).await {
            validated += 1;
            if let Ok(contents) = tokio::fs::read_to_string(&file).await {
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    if let Err(e) = serde_json::from_str::<serde_json::Value>(line) {
                        errors.push(serde_json::json!({"file": file.display().to_string(), "error": e.to_string()}));
                        break;
                    }
                }
            }
        }

        let status = if errors.is_empty() { "done" } else { "error" };
        serde_json::json!({"status": status, "validated": validated, "errors": errors})
    }

    fn verify_success(&self, result: &serde_json::Value) -> bool {
        result.get("status").and_then(|v| v.as_str()) == Some("done")
            && result
                .get("errors")
                .and_then(|v| v.as_array())
                .map(|a| a.is_empty())
                .unwrap_or(false)
    }

    async fn rollback(&self, _result: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({"status": "open_repair_intent"})
    }
}

const PROBE_LOCKS: [&str; 5] = ["svf.lock", "triage.lock", "sysint.lock", "cp6.lock", "cp7.lock"];
const STALE_PROBE_SECS: u64 = 900;

pub struct AutoRestartDomain {
    outgoing_dir: PathBuf,
}

impl AutoRestartDomain {
    pub fn new(root: &Path) -> Self {
        Self {
            outgoing_dir: root.join("outgoing"),
        }
    }
}

#[async_trait]
impl Domain for AutoRestartDomain {
    fn can_execute(&self, _state: &SystemState) -> bool {
        true
    }

    async fn execute(&self) -> serde_json::Value {
        let mut stale = Vec::new();
        for lock in PROBE_LOCKS {
            let path = self.outgoing_dir.join(lock);
            // A probe lock that doesn't exist yet hasn't failed to check in —
            // it just hasn't run. Only an existing, aged lock is stale.
            let is_stale = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified
                    .elapsed()
                    .map(|age| age.as_secs() > STALE_PROBE_SECS)
                    .unwrap_or(false),
                Err(_) => false,
            };
            if is_stale {
                stale.push(lock.to_string());
            }
        }

        done(serde_json::json!({
            "checked": PROBE_LOCKS.len(),
            "stale_probes": stale.len(),
            "actions": stale,
        }))
    }

    fn verify_success(&self, result: &serde_json::Value) -> bool {
        result.get("status").and_then(|v| v.as_str()) == Some("done")
            && result.get("stale_probes").and_then(|v| v.as_u64()) == Some(0)
    }

    async fn rollback(&self, _result: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({"status": "quarantined", "message": "probes flagged for manual review"})
    }
}

pub struct MemoryEmbeddingsDomain {
    marker_file: PathBuf,
}

impl MemoryEmbeddingsDomain {
    pub fn new(root: &Path) -> Self {
        Self {
            marker_file: root.join("outgoing").join("embeddings_rebuild.lock"),
        }
    }
}

#[async_trait]
impl Domain for MemoryEmbeddingsDomain {
    fn can_execute(&self, state: &SystemState) -> bool {
        let headroom = &state.resource_headroom;
        headroom.get("cpu_ok").and_then(|v| v.as_bool()) == Some(true)
            && headroom.get("mem_ok").and_then(|v| v.as_bool()) == Some(true)
    }

    async fn execute(&self) -> serde_json::Value {
        if self.marker_file.exists() {
            return serde_json::json!({"status": "skipped", "message": "rebuild already in progress"});
        }
        if let Err(e) = tokio::fs::write(&self.marker_file, b"").await {
            return error_result(e.to_string());
        }
        done(serde_json::json!({"message": "Embeddings rebuild initiated"}))
    }

    async fn rollback(&self, _result: &serde_json::Value) -> serde_json::Value {
        let _ = tokio::fs::remove_file(&self.marker_file).await;
        serde_json::json!({"status": "rolled_back"})
    }
}

/// Lookup table of capability name to domain implementation.
pub struct DomainRegistry {
    domains: HashMap<String, Box<dyn Domain>>,
}

impl DomainRegistry {
    pub fn new(root: &Path) -> Self {
        let mut domains: HashMap<String, Box<dyn Domain>> = HashMap::new();
        domains.insert(LOG_ROTATION.to_string(), Box::new(LogRotationDomain::new(root)));
        domains.insert(
            METRICS_SUMMARY.to_string(),
            Box::new(MetricsSummaryDomain::new(root)),
        );
        domains.insert(
            SCHEMA_VALIDATION.to_string(),
            Box::new(SchemaValidationDomain::new(root)),
        );
        domains.insert(AUTO_RESTART.to_string(), Box::new(AutoRestartDomain::new(root)));
        domains.insert(
            MEMORY_EMBEDDINGS.to_string(),
            Box::new(MemoryEmbeddingsDomain::new(root)),
        );
        Self { domains }
    }

    pub fn get(&self, capability: &str) -> Option<&dyn Domain> {
        self.domains.get(capability).map(|d| d.as_ref())
    }

    pub fn can_execute(&self, capability: &str, state: &SystemState) -> bool {
        self.get(capability)
            .map(|domain| domain.can_execute(state))
            .unwrap_or(false)
    }
}
