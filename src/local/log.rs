//! Local append-only transparency log.
//!
//! Entries are kept in memory and, when the log is opened from a directory,
//! appended one JSON object per line to `entries.jsonl`. Existing lines are
//! never rewritten.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use attest_protocol::certificate::{decode_signing_key, encode_signing_key};
use attest_protocol::{LogEntry, LogKey, SignedEnvelope};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::Context;
use crate::tlog::{LogError, TransparencyLog};

/// Key file inside a log directory.
pub const LOG_KEY_FILE: &str = "log.json";

/// Entry file inside a log directory.
pub const LOG_ENTRIES_FILE: &str = "entries.jsonl";

/// Default request body limit, matching a typical HTTP front end.
pub const DEFAULT_LOG_REQUEST_LIMIT: usize = 32 * 1024 * 1024;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Serialize, Deserialize)]
struct LogState {
    key: String,
    request_limit: usize,
}

/// Transparency log held in memory or in a directory.
pub struct LocalLog {
    key: SigningKey,
    entries: Mutex<Vec<LogEntry>>,
    entries_path: Option<PathBuf>,
    request_limit: usize,
    clock: Clock,
}

impl LocalLog {
    /// In-memory log with a fresh key.
    pub fn new() -> Self {
        Self {
            key: SigningKey::generate(&mut rand::thread_rng()),
            entries: Mutex::new(Vec::new()),
            entries_path: None,
            request_limit: DEFAULT_LOG_REQUEST_LIMIT,
            clock: Arc::new(|| Utc::now().timestamp()),
        }
    }

    /// Load the log stored in `dir`, creating it on first use.
    pub fn open(dir: &Path) -> Result<Self, LogError> {
        fs::create_dir_all(dir)?;
        let key_path = dir.join(LOG_KEY_FILE);

        let state = if key_path.exists() {
            serde_json::from_str::<LogState>(&fs::read_to_string(&key_path)?)?
        } else {
            let state = LogState {
                key: encode_signing_key(&SigningKey::generate(&mut rand::thread_rng())),
                request_limit: DEFAULT_LOG_REQUEST_LIMIT,
            };
            let temp_path = dir.join(format!(".{}.tmp", LOG_KEY_FILE));
            fs::write(&temp_path, serde_json::to_string_pretty(&state)?)?;
            fs::rename(&temp_path, &key_path)?;
            info!(path = %key_path.display(), "created local transparency log");
            state
        };

        let entries_path = dir.join(LOG_ENTRIES_FILE);
        let entries = Self::read_entries(&entries_path)?;

        Ok(Self {
            key: decode_signing_key(&state.key)?,
            entries: Mutex::new(entries),
            entries_path: Some(entries_path),
            request_limit: state.request_limit,
            clock: Arc::new(|| Utc::now().timestamp()),
        })
    }

    fn read_entries(path: &Path) -> Result<Vec<LogEntry>, LogError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                entries.push(serde_json::from_str(&line)?);
            }
        }
        Ok(entries)
    }

    pub fn with_request_limit(mut self, limit: usize) -> Self {
        self.request_limit = limit;
        self
    }

    /// Largest serialized envelope `record` accepts.
    pub fn request_limit(&self) -> usize {
        self.request_limit
    }

    /// Replace the integration clock (unix seconds).
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn log_key(&self) -> LogKey {
        LogKey::from_key(&self.key.verifying_key())
    }

    /// Number of entries recorded so far.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Default for LocalLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TransparencyLog for LocalLog {
    fn record(&self, ctx: &Context, envelope: &SignedEnvelope) -> Result<LogEntry, LogError> {
        ctx.check()?;

        let size = serde_json::to_vec(envelope)?.len();
        if size > self.request_limit {
            return Err(LogError::RequestTooLarge {
                size,
                limit: self.request_limit,
            });
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| LogError::Unavailable("log lock poisoned".to_string()))?;

        // Another process may have appended since this log was opened.
        if let Some(path) = &self.entries_path {
            *entries = Self::read_entries(path)?;
        }

        let entry = LogEntry {
            uuid: uuid::Uuid::new_v4().to_string(),
            log_id: String::new(),
            log_index: entries.len() as u64,
            integrated_time: (self.clock)(),
            body_hash: envelope.log_body_hash()?,
            signed_entry_timestamp: String::new(),
        }
        .seal(&self.key)?;

        if let Some(path) = &self.entries_path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        }
        entries.push(entry.clone());

        debug!(
            log_index = entry.log_index,
            integrated_time = entry.integrated_time,
            "recorded log entry"
        );
        Ok(entry)
    }

    fn public_keys(&self, ctx: &Context) -> Result<Vec<LogKey>, LogError> {
        ctx.check()?;
        Ok(vec![self.log_key()])
    }
}
