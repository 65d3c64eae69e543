//! Miner metrics extraction for farm workers
//!
//! Provides the structured side of a refresh:
//! - `MinerMetrics`, a fixed record where every metric is individually optional
//! - `Snapshot`, the per-worker record kept by the coordinator
//! - `MetricsExtractor`, the seam between raw command output and the record
//! - `MochimoExtractor`, the line grammar for `top`, `ps faux` and the miner log

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::debug;

use crate::execution::CommandOutput;

/// Section of a refresh that could not be interpreted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{section}: {message}")]
pub struct ParseError {
    pub section: &'static str,
    pub message: String,
}

impl ParseError {
    fn new(section: &'static str, message: impl Into<String>) -> Self {
        Self {
            section,
            message: message.into(),
        }
    }
}

/// Named metrics of one worker, each absent unless the output reported it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<String>>,
    /// Supervisor script (`gomochi`) alive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listening: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solving: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solved: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u32>,
}

/// Result of one extraction: the record plus the sections that failed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub metrics: MinerMetrics,
    pub errors: Vec<ParseError>,
}

/// Latest known state of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub worker_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(rename = "timestamp", with = "time::serde::timestamp")]
    pub captured_at: OffsetDateTime,
    pub datetime: String,
    #[serde(flatten)]
    pub metrics: MinerMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Snapshot {
    /// "Never refreshed" snapshot: captured at the epoch, always stale
    pub fn stale(worker_id: &str) -> Self {
        Self::captured(worker_id, OffsetDateTime::UNIX_EPOCH, MinerMetrics::default())
    }

    pub fn captured(worker_id: &str, captured_at: OffsetDateTime, metrics: MinerMetrics) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            host: None,
            user: None,
            captured_at,
            datetime: format_datetime(captured_at),
            metrics,
            error: None,
        }
    }

    /// Builds a snapshot from an extraction, turning section failures into the error tag
    pub fn from_extraction(worker_id: &str, captured_at: OffsetDateTime, extraction: Extraction) -> Self {
        let mut snapshot = Self::captured(worker_id, captured_at, extraction.metrics);
        if !extraction.errors.is_empty() {
            let tags: Vec<String> = extraction.errors.iter().map(ToString::to_string).collect();
            snapshot.error = Some(tags.join("; "));
        }
        snapshot
    }

    pub fn with_origin(mut self, host: &str, user: &str) -> Self {
        self.host = Some(host.to_string());
        self.user = Some(user.to_string());
        self
    }

    /// Age of the snapshot at `now` (zero if captured in the future)
    pub fn age(&self, now: OffsetDateTime) -> std::time::Duration {
        let age = now - self.captured_at;
        if age.is_negative() {
            std::time::Duration::ZERO
        } else {
            age.unsigned_abs()
        }
    }
}

fn format_datetime(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    at.format(&format).unwrap_or_default()
}

/// Raw output of the status query of one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStatus {
    /// `top -bcn1`
    pub top: CommandOutput,
    /// process listing filtered on the miner name
    pub processes: CommandOutput,
}

/// Version of the line grammar an extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrammarVersion {
    /// procps `top`, `ps faux`, Mochimo 2.x log lines
    V1,
}

/// Turns raw command output into a metrics record
///
/// Must be pure and tolerate missing or partial sections: anything it cannot read stays
/// absent and is reported in `Extraction::errors`.
pub trait MetricsExtractor: Send + Sync {
    fn grammar(&self) -> GrammarVersion;

    fn extract(&self, status: &RawStatus, log: Option<&CommandOutput>) -> Extraction;

    /// Process ids found in a process listing
    fn process_ids(&self, listing: &str) -> Result<Vec<u32>, ParseError>;
}

/// Line grammar for Mochimo miners
#[derive(Debug, Clone, Copy)]
pub struct MochimoExtractor {
    grammar: GrammarVersion,
}

impl MochimoExtractor {
    pub fn new() -> Self {
        Self {
            grammar: GrammarVersion::V1,
        }
    }

    fn parse_cpu(&self, top: &str) -> Result<Option<f64>, ParseError> {
        let Some(line) = top.lines().find(|l| l.contains("Cpu(s):")) else {
            return Ok(None);
        };
        let Some((_, fields)) = line.split_once("Cpu(s):") else {
            return Ok(None);
        };

        let mut load = 0.0;
        for field in fields.split(',') {
            if field.contains("id") {
                continue;
            }
            let value = field
                .trim()
                .split(|c: char| c == '%' || c == ' ')
                .next()
                .unwrap_or_default();
            load += value
                .parse::<f64>()
                .map_err(|_| ParseError::new("cpu", format!("unreadable field '{}'", field.trim())))?;
        }

        Ok(Some((load * 100.0).round() / 100.0))
    }

    fn parse_processes(&self, listing: &str) -> Vec<String> {
        let mut processes: Vec<String> = listing
            .lines()
            .filter(|l| !l.contains(" grep "))
            .filter_map(|l| {
                if l.contains("gomochi") {
                    Some("gomochi".to_string())
                } else {
                    l.split_once("mochimo ").map(|(_, name)| name.trim().to_string())
                }
            })
            .collect();
        processes.sort();
        processes
    }

    fn apply_log(&self, log: &str, metrics: &mut MinerMetrics) -> Vec<ParseError> {
        let mut errors = Vec::new();

        for line in log.lines() {
            let line = line.split_whitespace().collect::<Vec<_>>().join(" ");

            if line.contains("Haiku/second:") {
                let tokens: Vec<&str> = line.split(' ').collect();
                for pair in tokens.chunks_exact(2) {
                    let key = pair[0].trim_end_matches(':');
                    let value = pair[1];
                    let parsed = match key {
                        "Haiku/second" => value.parse().map(|v| metrics.hps = Some(v)).is_ok(),
                        "Solved" => value.parse().map(|v| metrics.solved = Some(v)).is_ok(),
                        "Difficulty" => value.parse().map(|v| metrics.difficulty = Some(v)).is_ok(),
                        _ => true,
                    };
                    if !parsed {
                        errors.push(ParseError::new("log", format!("unreadable {} '{}'", key, value)));
                    }
                }
            } else if let Some((_, rest)) = line.split_once(": 0x") {
                if let Some(block) = rest.split_whitespace().next() {
                    metrics.block = Some(format!("0x{}", block));
                }
            }
        }

        errors
    }
}

impl Default for MochimoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsExtractor for MochimoExtractor {
    fn grammar(&self) -> GrammarVersion {
        self.grammar
    }

    fn extract(&self, status: &RawStatus, log: Option<&CommandOutput>) -> Extraction {
        let mut extraction = Extraction::default();
        let metrics = &mut extraction.metrics;

        if status.top.has_error() {
            extraction.errors.push(ParseError::new("cpu", status.top.stderr.trim()));
        } else {
            match self.parse_cpu(&status.top.stdout) {
                Ok(cpu) => metrics.cpu = cpu,
                Err(e) => extraction.errors.push(e),
            }
        }

        if status.processes.has_error() {
            extraction
                .errors
                .push(ParseError::new("processes", status.processes.stderr.trim()));
        } else {
            let processes = self.parse_processes(&status.processes.stdout);
            metrics.running = Some(processes.iter().any(|p| p == "gomochi"));
            metrics.listening = Some(processes.iter().any(|p| p != "gomochi" && p.contains("listen")));
            metrics.solving = Some(processes.iter().any(|p| p != "gomochi" && p.contains("solving")));
            metrics.processes = Some(processes);
        }

        if let Some(log) = log {
            if log.has_error() {
                extraction.errors.push(ParseError::new("log", log.stderr.trim()));
            } else {
                let errors = self.apply_log(&log.stdout, &mut extraction.metrics);
                extraction.errors.extend(errors);
            }
        }

        debug!("Extracted metrics with {} section error(s)", extraction.errors.len());
        extraction
    }

    fn process_ids(&self, listing: &str) -> Result<Vec<u32>, ParseError> {
        listing
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.contains(" grep "))
            .map(|l| {
                let column = l.split_whitespace().nth(1).unwrap_or_default();
                column
                    .parse::<u32>()
                    .map_err(|_| ParseError::new("processes", format!("no pid in '{}'", l.trim())))
            })
            .collect()
    }
}
