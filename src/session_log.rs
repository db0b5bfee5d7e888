//! Per-manuscript generation session logs.
//!
//! Every manuscript run owns one append-only JSON document recording each
//! model exchange: prompt, response, timing, and token usage. The document
//! lives at `{log_dir}/{safe_title}_{timestamp}_{session_id}.json`, and a
//! `sessions.json` index in the same directory lists all sessions. The
//! lifecycle is start → N appends → finalize, where finalize adds a summary
//! (entry total, step-type histogram, completion time).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from session log management.
#[derive(Debug, Error, Diagnostic)]
pub enum SessionLogError {
    #[error("no active generation session")]
    #[diagnostic(
        code(fableforge::session_log::no_active_session),
        help("Call start_session before appending entries.")
    )]
    NoActiveSession,

    #[error("session log I/O failed at {path}: {source}")]
    #[diagnostic(code(fableforge::session_log::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session log serialization failed: {0}")]
    #[diagnostic(code(fableforge::session_log::serde))]
    Serde(#[from] serde_json::Error),
}

/// Token accounting for one exchange.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One recorded model exchange.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub step_type: String,
    pub step_name: String,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub model_info: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl LogEntry {
    #[must_use]
    pub fn new(step_type: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            step_type: step_type.into(),
            step_name: step_name.into(),
            prompt: String::new(),
            response: String::new(),
            model_info: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            duration_ms: None,
            token_usage: TokenUsage::default(),
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, prompt: &str, response: &str) -> Self {
        self.prompt = prompt.to_string();
        self.response = response.to_string();
        self
    }

    #[must_use]
    pub fn with_model_info(mut self, model_info: serde_json::Value) -> Self {
        self.model_info = model_info;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Record token usage; missing counts fall back to a whitespace-token
    /// estimate of the exchange.
    #[must_use]
    pub fn with_token_usage(
        mut self,
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
    ) -> Self {
        let prompt_tokens =
            prompt_tokens.unwrap_or_else(|| self.prompt.split_whitespace().count() as u64);
        let completion_tokens =
            completion_tokens.unwrap_or_else(|| self.response.split_whitespace().count() as u64);
        self.token_usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        };
        self
    }
}

/// Terminal status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

/// Header block of a session document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub log_file: PathBuf,
    pub status: SessionStatus,
}

/// Summary appended by `finalize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub status: SessionStatus,
    pub total_entries: usize,
    pub entries_by_step_type: FxHashMap<String, usize>,
    pub completed_at: DateTime<Utc>,
}

/// Complete on-disk session document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session_info: SessionInfo,
    pub entries: Vec<LogEntry>,
    pub summary: Option<SessionSummary>,
}

/// Row in the `sessions.json` index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub log_file: PathBuf,
    pub status: SessionStatus,
    pub total_entries: usize,
    pub last_update: DateTime<Utc>,
}

struct ActiveSession {
    document: SessionDocument,
    path: PathBuf,
}

/// Append-only logger with one active session at a time.
pub struct GenerationLogger {
    base_dir: PathBuf,
    active: Mutex<Option<ActiveSession>>,
}

impl GenerationLogger {
    /// A logger writing under `base_dir` (created on first use).
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            active: Mutex::new(None),
        }
    }

    /// Open a session for a manuscript. Returns the short session id.
    pub fn start_session(&self, title: &str) -> Result<String, SessionLogError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|source| SessionLogError::Io {
            path: self.base_dir.clone(),
            source,
        })?;

        let session_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let started_at = Utc::now();
        let filename = format!(
            "{}_{}_{}.json",
            sanitize_title(title),
            started_at.format("%Y%m%d_%H%M%S"),
            session_id
        );
        let path = self.base_dir.join(filename);

        let document = SessionDocument {
            session_info: SessionInfo {
                session_id: session_id.clone(),
                title: title.to_string(),
                started_at,
                log_file: path.clone(),
                status: SessionStatus::Active,
            },
            entries: Vec::new(),
            summary: None,
        };

        write_json(&path, &document)?;
        self.update_index(&document)?;
        *self.active.lock() = Some(ActiveSession { document, path });

        tracing::info!(session_id = %session_id, title, "generation session started");
        Ok(session_id)
    }

    /// Append one exchange to the active session and persist the document.
    pub fn append(&self, entry: LogEntry) -> Result<(), SessionLogError> {
        let mut guard = self.active.lock();
        let session = guard.as_mut().ok_or(SessionLogError::NoActiveSession)?;
        tracing::debug!(
            step_type = %entry.step_type,
            step_name = %entry.step_name,
            prompt_chars = entry.prompt.len(),
            response_chars = entry.response.len(),
            "session log append"
        );
        session.document.entries.push(entry);
        write_json(&session.path, &session.document)?;
        self.update_index(&session.document)
    }

    /// Close the active session, writing its summary and updating the index.
    pub fn finalize(&self, status: SessionStatus) -> Result<SessionSummary, SessionLogError> {
        let mut guard = self.active.lock();
        let mut session = guard.take().ok_or(SessionLogError::NoActiveSession)?;

        let mut by_type: FxHashMap<String, usize> = FxHashMap::default();
        for entry in &session.document.entries {
            *by_type.entry(entry.step_type.clone()).or_insert(0) += 1;
        }
        let summary = SessionSummary {
            status,
            total_entries: session.document.entries.len(),
            entries_by_step_type: by_type,
            completed_at: Utc::now(),
        };
        session.document.session_info.status = status;
        session.document.summary = Some(summary.clone());
        write_json(&session.path, &session.document)?;
        self.update_index(&session.document)?;

        tracing::info!(
            session_id = %session.document.session_info.session_id,
            ?status,
            total_entries = summary.total_entries,
            "generation session finalized"
        );
        Ok(summary)
    }

    /// Load a session document by id via the index.
    pub fn load_session(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionDocument>, SessionLogError> {
        let index = self.load_index()?;
        let Some(row) = index.iter().find(|r| r.session_id == session_id) else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(&row.log_file).map_err(|source| SessionLogError::Io {
            path: row.log_file.clone(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// All rows of `sessions.json`, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionIndexEntry>, SessionLogError> {
        let mut index = self.load_index()?;
        index.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(index)
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("sessions.json")
    }

    fn load_index(&self) -> Result<Vec<SessionIndexEntry>, SessionLogError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|source| SessionLogError::Io { path, source })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn update_index(&self, document: &SessionDocument) -> Result<(), SessionLogError> {
        let mut index = self.load_index()?;
        let row = SessionIndexEntry {
            session_id: document.session_info.session_id.clone(),
            title: document.session_info.title.clone(),
            started_at: document.session_info.started_at,
            log_file: document.session_info.log_file.clone(),
            status: document.session_info.status,
            total_entries: document.entries.len(),
            last_update: Utc::now(),
        };
        match index
            .iter_mut()
            .find(|r| r.session_id == row.session_id)
        {
            Some(existing) => *existing = row,
            None => index.push(row),
        }
        write_json(&self.index_path(), &index)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SessionLogError> {
    let raw = serde_json::to_string_pretty(value)?;
    std::fs::write(path, raw).map_err(|source| SessionLogError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Filename-safe version of a manuscript title: alphanumerics kept, runs of
/// anything else collapsed to a single underscore, capped at 40 glyphs.
fn sanitize_title(title: &str) -> String {
    let mut out = String::new();
    let mut last_was_sep = false;
    for ch in title.chars().take(80) {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep && !out.is_empty() {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    let capped: String = out.chars().take(40).collect();
    if capped.is_empty() {
        "untitled".to_string()
    } else {
        capped
    }
}
