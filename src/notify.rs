//! Producer side of the cross-process notification channel.
//!
//! The engine is the sole writer of two files under the data directory:
//! `events.jsonl`, one JSON line per completed action, and `status.json`,
//! a periodically rewritten account snapshot. A separate notification
//! process tails the former and reads the latter; this crate never reads
//! them back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::CopyEvent;

const EVENTS_FILE: &str = "events.jsonl";
const STATUS_FILE: &str = "status.json";

/// Snapshot of both accounts for the external status consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub source_equity: Decimal,
    pub destination_equity: Decimal,
    pub source_open_positions: usize,
    pub destination_open_positions: usize,
    pub mapped_keys: usize,
    pub last_exec_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct Notifier {
    events_path: PathBuf,
    status_path: PathBuf,
}

impl Notifier {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            events_path: data_dir.join(EVENTS_FILE),
            status_path: data_dir.join(STATUS_FILE),
        }
    }

    /// Append one event as a single JSON line.
    pub fn emit(&self, event: &CopyEvent) -> Result<()> {
        if let Some(parent) = self.events_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let line = serde_json::to_string(event).context("serializing event")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .with_context(|| format!("opening event log {}", self.events_path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("appending to event log {}", self.events_path.display()))?;
        Ok(())
    }

    /// Rewrite the status snapshot atomically (temp file + rename), so the
    /// consumer never observes a half-written document.
    pub fn write_status(&self, report: &StatusReport) -> Result<()> {
        if let Some(parent) = self.status_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let tmp = self.status_path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(report).context("serializing status report")?;
        fs::write(&tmp, raw)
            .with_context(|| format!("writing temp status file {}", tmp.display()))?;
        fs::rename(&tmp, &self.status_path)
            .with_context(|| format!("replacing status file {}", self.status_path.display()))?;
        Ok(())
    }
}
