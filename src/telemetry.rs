//! Telemetry Intake: converts heterogeneous on-disk artifacts into a
//! uniform stream of event envelopes for the State Core to consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Category of an ingested event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Status,
    Metric,
    Alert,
    Completion,
}

/// Event envelope (e1): the normalized unit Telemetry Intake hands to the
/// State Core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub category: EventCategory,
    pub payload: serde_json::Value,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_confidence() -> f64 {
    1.0
}

fn default_version() -> String {
    "e1".to_string()
}

const OVERSEER_SOURCE: &str = "cbo_overseer";
const METRICS_SOURCE: &str = "agent_scheduler";
const METRICS_TAIL_ROWS: usize = 5;

/// Reads heartbeat and metrics artifacts under a root directory and
/// normalizes them into event envelopes.
pub struct TelemetryIntake {
    overseer_lock: PathBuf,
    metrics_csv: PathBuf,
}

impl TelemetryIntake {
    pub fn new(root: &Path) -> Self {
        Self {
            overseer_lock: root.join("outgoing").join("cbo.lock"),
            metrics_csv: root.join("logs").join("agent_metrics.csv"),
        }
    }

    /// Ingest events no older than `max_age_seconds`, measured against the
    /// overseer heartbeat file's mtime. Never fails: unreadable or
    /// malformed sources simply contribute no events.
    pub async fn ingest_recent(&self, max_age_seconds: u64) -> Vec<EventEnvelope> {
        let mut events = Vec::new();

        if let Some(event) = self.read_overseer_heartbeat(max_age_seconds).await {
            events.push(event);
        }

        events.extend(self.read_metrics_tail().await);

        events
    }

    async fn read_overseer_heartbeat(&self, max_age_seconds: u64) -> Option<EventEnvelope> {
        let metadata = tokio::fs::metadata(&self.overseer_lock).await.ok()?;
        let mtime = metadata.modified().ok()?;
        let age = SystemTime::now().duration_since(mtime).ok()?;
        if age > Duration::from_secs(max_age_seconds) {
            return None;
        }

        let contents = tokio::fs::read_to_string(&self.overseer_lock).await.ok()?;
        let hb: serde_json::Value = serde_json::from_str(&contents).ok()?;

        Some(EventEnvelope {
            timestamp: DateTime::<Utc>::from(mtime),
            source: OVERSEER_SOURCE.to_string(),
            category: EventCategory::Status,
            payload: serde_json::json!({
                "metrics": hb.get("metrics").cloned().unwrap_or_default(),
                "gates": hb.get("gates").cloned().unwrap_or_default(),
                "locks": hb.get("locks").cloned().unwrap_or_default(),
                "capacity": hb.get("capacity").cloned().unwrap_or_default(),
            }),
            confidence: 1.0,
            version: default_version(),
        })
    }

    async fn read_metrics_tail(&self) -> Vec<EventEnvelope> {
        let contents = match tokio::fs::read_to_string(&self.metrics_csv).await {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut reader = csv::Reader::from_reader(contents.as_bytes());
        let headers = match reader.headers() {
            Ok(h) => h.clone(),
            Err(_) => return Vec::new(),
        };

        let rows: Vec<csv::StringRecord> = reader.records().filter_map(|r| r.ok()).collect();
        let tail_start = rows.len().saturating_sub(METRICS_TAIL_ROWS);

        rows[tail_start..]
            .iter()
            .filter_map(|row| Self::parse_metrics_row(&headers, row))
            .collect()
    }

    fn parse_metrics_row(
        headers: &csv::StringRecord,
        row: &csv::StringRecord,
    ) -> Option<EventEnvelope> {
        let get = |key: &str| -> Option<&str> {
            headers
                .iter()
                .position(|h| h == key)
                .and_then(|i| row.get(i))
        };

        let tes: f64 = get("tes").unwrap_or("0").parse().ok()?;
        let duration_s: f64 = get("duration_s").unwrap_or("0").parse().ok()?;
        let changed_files: i64 = get("changed_files").unwrap_or("0").parse().ok()?;
        let status = get("status").unwrap_or("unknown").to_string();
        let autonomy_mode = get("autonomy_mode").unwrap_or("safe").to_string();
        let iso_ts = get("iso_ts")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(EventEnvelope {
            timestamp: iso_ts,
            source: METRICS_SOURCE.to_string(),
            category: EventCategory::Metric,
            payload: serde_json::json!({
                "tes": tes,
                "duration_s": duration_s,
                "status": status,
                "changed_files": changed_files,
                "autonomy_mode": autonomy_mode,
            }),
            confidence: 0.9,
            version: default_version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_sources_yield_no_events() {
        let dir = tempdir().unwrap();
        let intake = TelemetryIntake::new(dir.path());
        let events = intake.ingest_recent(300).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn stale_overseer_heartbeat_is_skipped() {
        let dir = tempdir().unwrap();
        let outgoing = dir.path().join("outgoing");
        tokio::fs::create_dir_all(&outgoing).await.unwrap();
        let lock_path = outgoing.join("cbo.lock");
        tokio::fs::write(&lock_path, "{}").await.unwrap();

        // max_age_seconds=0 means anything with nonzero age is stale.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let intake = TelemetryIntake::new(dir.path());
        let events = intake.ingest_recent(0).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn fresh_overseer_heartbeat_is_ingested() {
        let dir = tempdir().unwrap();
        let outgoing = dir.path().join("outgoing");
        tokio::fs::create_dir_all(&outgoing).await.unwrap();
        let lock_path = outgoing.join("cbo.lock");
        tokio::fs::write(
            &lock_path,
            serde_json::json!({
                "ts": 0,
                "gates": {"ok": true},
                "capacity": {"cpu_ok": true},
            })
            .to_string(),
        )
        .await
        .unwrap();

        let intake = TelemetryIntake::new(dir.path());
        let events = intake.ingest_recent(300).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, OVERSEER_SOURCE);
        assert_eq!(events[0].category, EventCategory::Status);
    }

    #[tokio::test]
    async fn metrics_tail_bounded_to_five_rows() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();
        let mut csv = String::from("iso_ts,tes,duration_s,status,changed_files,autonomy_mode\n");
        for i in 0..8 {
            csv.push_str(&format!(
                "2024-01-01T00:00:0{}Z,0.{},1.0,done,1,execute\n",
                i, i
            ));
        }
        tokio::fs::write(logs.join("agent_metrics.csv"), csv)
            .await
            .unwrap();

        let intake = TelemetryIntake::new(dir.path());
        let events = intake.ingest_recent(300).await;
        assert_eq!(events.len(), METRICS_TAIL_ROWS);
        assert!(events.iter().all(|e| e.category == EventCategory::Metric));
    }

    #[tokio::test]
    async fn metrics_fewer_than_tail_processes_all() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();
        let csv = "iso_ts,tes,duration_s,status,changed_files,autonomy_mode\n\
                   2024-01-01T00:00:00Z,0.5,1.0,done,1,execute\n";
        tokio::fs::write(logs.join("agent_metrics.csv"), csv)
            .await
            .unwrap();

        let intake = TelemetryIntake::new(dir.path());
        let events = intake.ingest_recent(300).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_silently() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();
        let csv = "iso_ts,tes,duration_s,status,changed_files,autonomy_mode\n\
                   2024-01-01T00:00:00Z,not-a-number,1.0,done,1,execute\n";
        tokio::fs::write(logs.join("agent_metrics.csv"), csv)
            .await
            .unwrap();

        let intake = TelemetryIntake::new(dir.path());
        let events = intake.ingest_recent(300).await;
        assert!(events.is_empty());
    }
}
