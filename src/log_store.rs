use crate::model::LogEntry;
use chrono::{Local, NaiveDate};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("log file {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("log file {path} is not a JSON array of entries: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        let _guard = self.lock();
        if self.path.exists() {
            return Ok(());
        }
        self.write_raw(&[])
    }

    pub fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut raw = self.read_raw()?;
        raw.push(serde_json::to_value(entry)?);
        self.write_raw(&raw)
    }

    pub fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        let raw = self.read_raw()?;
        let total = raw.len();
        let entries: Vec<LogEntry> = raw
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        if entries.len() != total {
            warn!(
                path = %self.path.display(),
                skipped = total - entries.len(),
                "skipped unreadable log records"
            );
        }
        Ok(entries)
    }

    /// Entries whose local calendar date equals `date`, oldest first. Failures yield an empty list.
    pub fn query(&self, date: NaiveDate) -> Vec<LogEntry> {
        let mut entries = match self.entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "failed to read event log");
                return Vec::new();
            }
        };
        entries.retain(|e| e.timestamp.with_timezone(&Local).date_naive() == date);
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_raw(&self) -> Result<Vec<serde_json::Value>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn write_raw(&self, raw: &[serde_json::Value]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let encoded = serde_json::to_vec_pretty(raw)?;
        let tmp = self.path.with_extension("json.tmp");
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|source| {
            if let Err(err) = fs::remove_file(&tmp) {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        path = %tmp.display(),
                        error = %err,
                        "could not remove temporary log file"
                    );
                }
            }
            self.io_error(source)
        })
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
