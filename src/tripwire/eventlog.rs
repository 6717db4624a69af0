//! HS-015: Provenance log.
//!
//! One JSONL file per pipeline. Every record carries the id of the run that
//! wrote it, so `status` can fold the log back into per-run summaries.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// RFC 3339 UTC timestamp, second precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Short random run id (`r-` plus 12 hex digits).
pub fn new_run_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("r-{}", &hex[..12])
}

/// Derive the event log path for a pipeline.
pub fn event_log_path(state_dir: &Path, pipeline: &str) -> PathBuf {
    state_dir.join(pipeline).join("events.jsonl")
}

/// Event writer for one run of one pipeline.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    run: String,
    enabled: bool,
}

impl RunLog {
    /// Start a new run. A disabled log accepts events and drops them.
    pub fn open(state_dir: &Path, pipeline: &str, enabled: bool) -> Self {
        Self {
            path: event_log_path(state_dir, pipeline),
            run: new_run_id(),
            enabled,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run
    }

    /// Append one event stamped with this run and the current time.
    pub fn record(&self, event: ProvenanceEvent) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }

        let line = serde_json::to_string(&TimestampedEvent {
            ts: Utc::now(),
            run: self.run.clone(),
            event,
        })
        .map_err(|e| format!("cannot serialize event: {}", e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| format!("cannot open event log {}: {}", self.path.display(), e))?;
        writeln!(file, "{}", line)
            .map_err(|e| format!("cannot write {}: {}", self.path.display(), e))?;
        debug!(run = %self.run, path = %self.path.display(), "event recorded");
        Ok(())
    }
}

/// Read the last `limit` events of a pipeline, oldest first.
pub fn read_events(
    state_dir: &Path,
    pipeline: &str,
    limit: usize,
) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(state_dir, pipeline);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("cannot read {}: {}", path.display(), e)),
    };

    let mut tail: VecDeque<(usize, String)> = VecDeque::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        if line.trim().is_empty() || limit == 0 {
            continue;
        }
        if tail.len() == limit {
            tail.pop_front();
        }
        tail.push_back((i + 1, line));
    }

    tail.into_iter()
        .map(|(n, line)| {
            serde_json::from_str(&line)
                .map_err(|e| format!("{}:{}: invalid event: {}", path.display(), n, e))
        })
        .collect()
}

/// One run folded out of the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    /// Steps that converged, in order
    pub converged: Vec<String>,
    /// `(step, error)` of the failure that stopped the run
    pub failed: Option<(String, String)>,
    /// Steps a drift check found missing
    pub drifted: Vec<String>,
}

impl RunSummary {
    /// One-line rendering for `status`.
    pub fn headline(&self) -> String {
        let mut line = format!(
            "{} {}: {} converged",
            self.run,
            self.started.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.converged.len()
        );
        if !self.drifted.is_empty() {
            line.push_str(&format!(", {} drifted", self.drifted.len()));
        }
        match (&self.failed, self.finished) {
            (Some((step, error)), _) => line.push_str(&format!(", FAILED at {} ({})", step, error)),
            (None, None) if self.drifted.is_empty() => line.push_str(" (incomplete)"),
            _ => {}
        }
        line
    }
}

/// Group events by run, in order of each run's first event.
pub fn summarize_runs(events: &[TimestampedEvent]) -> Vec<RunSummary> {
    let mut runs: IndexMap<&str, RunSummary> = IndexMap::new();
    for e in events {
        let summary = runs.entry(e.run.as_str()).or_insert_with(|| RunSummary {
            run: e.run.clone(),
            started: e.ts,
            finished: None,
            converged: Vec::new(),
            failed: None,
            drifted: Vec::new(),
        });
        match &e.event {
            ProvenanceEvent::StepConverged { step, .. } => summary.converged.push(step.clone()),
            ProvenanceEvent::StepFailed { step, error, .. } => {
                summary.failed = Some((step.clone(), error.clone()))
            }
            ProvenanceEvent::DriftDetected { step, .. } => summary.drifted.push(step.clone()),
            ProvenanceEvent::RunCompleted { .. } => summary.finished = Some(e.ts),
            ProvenanceEvent::RunStarted { .. } | ProvenanceEvent::StepStarted { .. } => {}
        }
    }
    runs.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converged(step: &str) -> ProvenanceEvent {
        ProvenanceEvent::StepConverged {
            pipeline: "retail".to_string(),
            step: step.to_string(),
            duration_seconds: 0.1,
            hash: "blake3:xxx".to_string(),
        }
    }

    #[test]
    fn test_hs015_timestamp_is_rfc3339() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_hs015_run_ids_are_distinct() {
        let a = new_run_id();
        let b = new_run_id();
        assert!(a.starts_with("r-"));
        assert_eq!(a.len(), 14);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hs015_event_log_path() {
        let p = event_log_path(Path::new("/state"), "retail");
        assert_eq!(p, PathBuf::from("/state/retail/events.jsonl"));
    }

    #[test]
    fn test_hs015_record_stamps_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::open(dir.path(), "retail", true);
        log.record(ProvenanceEvent::RunStarted {
            pipeline: "retail".to_string(),
            handson_version: "0.3.0".to_string(),
        })
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("retail/events.jsonl")).unwrap();
        assert!(content.contains("\"event\":\"run_started\""));
        assert!(content.contains(&format!("\"run\":\"{}\"", log.run_id())));
    }

    #[test]
    fn test_hs015_disabled_log_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::open(dir.path(), "retail", false);
        log.record(converged("db")).unwrap();
        assert!(!event_log_path(dir.path(), "retail").exists());
    }

    #[test]
    fn test_hs015_read_last_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::open(dir.path(), "retail", true);
        for i in 0..5 {
            log.record(converged(&format!("s{}", i))).unwrap();
        }
        let events = read_events(dir.path(), "retail", 2).unwrap();
        assert_eq!(events.len(), 2);
        match &events[1].event {
            ProvenanceEvent::StepConverged { step, .. } => assert_eq!(step, "s4"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(read_events(dir.path(), "retail", 0).unwrap().is_empty());
        assert!(read_events(dir.path(), "ghost", 10).unwrap().is_empty());
    }

    #[test]
    fn test_hs015_corrupt_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::open(dir.path(), "retail", true);
        log.record(converged("db")).unwrap();
        let path = event_log_path(dir.path(), "retail");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        let err = read_events(dir.path(), "retail", 10).unwrap_err();
        assert!(err.contains("events.jsonl:2: invalid event"), "{}", err);
    }

    #[test]
    fn test_hs015_step_failed_keeps_message() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::open(dir.path(), "retail", true);
        log.record(ProvenanceEvent::StepFailed {
            pipeline: "retail".to_string(),
            step: "stage".to_string(),
            error: "object not found: Schema 'DB.SCH' does not exist or not authorized.".to_string(),
        })
        .unwrap();
        let events = read_events(dir.path(), "retail", 10).unwrap();
        match &events[0].event {
            ProvenanceEvent::StepFailed { error, .. } => {
                assert!(error.ends_with("does not exist or not authorized."))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_hs015_summarize_runs() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLog::open(dir.path(), "retail", true);
        first.record(converged("db")).unwrap();
        first.record(converged("schema")).unwrap();
        first
            .record(ProvenanceEvent::RunCompleted {
                pipeline: "retail".to_string(),
                steps_converged: 2,
                steps_unchanged: 0,
                steps_failed: 0,
                total_seconds: 0.5,
            })
            .unwrap();
        let second = RunLog::open(dir.path(), "retail", true);
        second
            .record(ProvenanceEvent::StepFailed {
                pipeline: "retail".to_string(),
                step: "stage".to_string(),
                error: "denied".to_string(),
            })
            .unwrap();

        let runs = summarize_runs(&read_events(dir.path(), "retail", usize::MAX).unwrap());
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run, first.run_id());
        assert_eq!(runs[0].converged, vec!["db", "schema"]);
        assert!(runs[0].finished.is_some());
        assert!(runs[0].headline().ends_with(": 2 converged"));
        assert_eq!(runs[1].failed, Some(("stage".to_string(), "denied".to_string())));
        assert!(runs[1].headline().ends_with("FAILED at stage (denied)"));
    }
}
