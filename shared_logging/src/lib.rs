#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the practice-engine crates.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Log severity, ordered so sinks can filter below a threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operational events.
    Info,
    /// Degraded but recoverable conditions.
    Warn,
    /// Failures requiring attention.
    Error,
}

/// One structured log event, serialized as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Component that produced the event (e.g. `sessions.manager`).
    pub source: String,
    /// Severity.
    pub level: LogLevel,
    /// Dotted event name (e.g. `practice.session.completed`).
    pub name: String,
    /// Structured payload fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl LogEvent {
    /// Builds an event stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, level: LogLevel, name: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            level,
            name: name.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Attaches a payload; non-object payloads are stored under a `value` key.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        match payload {
            serde_json::Value::Object(map) => self.fields = map,
            other => {
                self.fields.insert("value".to_owned(), other);
            }
        }
        self
    }
}

/// Append-only JSON-lines logger with a minimum-level filter.
#[derive(Debug)]
pub struct JsonlLogger {
    path: PathBuf,
    min_level: LogLevel,
    writer: Mutex<File>,
}

impl JsonlLogger {
    /// Creates or opens a logger at the given path, recording `Info` and up.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_min_level(path, LogLevel::Info)
    }

    /// Creates or opens a logger that drops events below `min_level`.
    pub fn with_min_level(path: impl AsRef<Path>, min_level: LogLevel) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            min_level,
            writer: Mutex::new(file),
        })
    }

    /// Appends the event as one JSON line; events below the threshold are dropped.
    pub fn log(&self, event: &LogEvent) -> Result<()> {
        if event.level < self.min_level {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, event)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
