//! File-backed host runtime: a JSON state file and an NDJSON output pipe.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitlab_export::{Entity, Pipe, PipeError, State, StateError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// [`State`] persisted as one JSON object per integration instance.
///
/// Every mutation rewrites the whole file through a temporary sibling, so a
/// crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileState {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

impl FileState {
    /// Open the state file, creating its directory. A missing file is empty state.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened state");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn update<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, StoredValue>) -> R,
    ) -> Result<R, StateError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StateError::Backend("state lock poisoned".to_string()))?;
        let result = f(&mut entries);
        let now = Utc::now();
        entries.retain(|_, v| v.is_live(now));
        self.persist(&entries)?;
        Ok(result)
    }

    fn persist(&self, entries: &BTreeMap<String, StoredValue>) -> Result<(), StateError> {
        let backend = |e: io::Error| StateError::Backend(format!("{}: {e}", self.path.display()));
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| StateError::Backend(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(backend)?;
        file.write_all(&json).map_err(backend)?;
        file.sync_all().map_err(backend)?;
        fs::rename(&tmp, &self.path).map_err(backend)
    }

    fn insert(&self, key: &str, value: String, expires_at: Option<DateTime<Utc>>) -> Result<(), StateError> {
        self.update(|entries| {
            entries.insert(key.to_string(), StoredValue { value, expires_at });
        })
    }
}

#[async_trait]
impl State for FileState {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StateError::Backend("state lock poisoned".to_string()))?;
        Ok(entries
            .get(key)
            .filter(|v| v.is_live(Utc::now()))
            .map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StateError> {
        self.insert(key, value, None)
    }

    async fn set_with_expires(
        &self,
        key: &str,
        value: String,
        expires: Duration,
    ) -> Result<(), StateError> {
        let ttl = chrono::Duration::from_std(expires)
            .map_err(|e| StateError::Backend(format!("invalid expiry for {key}: {e}")))?;
        self.insert(key, value, Some(Utc::now() + ttl))
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// [`Pipe`] writing one JSON object per line, tagged with its `model`.
pub struct NdjsonPipe {
    inner: Mutex<PipeInner>,
}

struct PipeInner {
    writer: Option<BufWriter<Box<dyn Write + Send>>>,
}

impl NdjsonPipe {
    /// Write to stdout.
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(io::stdout()))
    }

    /// Append to a file, creating it if needed.
    pub fn append(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Mutex::new(PipeInner {
                writer: Some(BufWriter::new(writer)),
            }),
        }
    }

    fn with_writer<R>(
        &self,
        f: impl FnOnce(&mut BufWriter<Box<dyn Write + Send>>) -> io::Result<R>,
    ) -> Result<R, PipeError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PipeError::Write("pipe lock poisoned".to_string()))?;
        let writer = inner.writer.as_mut().ok_or(PipeError::Closed)?;
        f(writer).map_err(|e| PipeError::Write(e.to_string()))
    }
}

#[async_trait]
impl Pipe for NdjsonPipe {
    async fn write(&self, entity: Entity) -> Result<(), PipeError> {
        let line = serde_json::to_string(&entity)?;
        self.with_writer(|w| writeln!(w, "{line}"))
    }

    async fn flush(&self) -> Result<(), PipeError> {
        self.with_writer(|w| w.flush())
    }

    async fn close(&self) -> Result<(), PipeError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PipeError::Write("pipe lock poisoned".to_string()))?;
        if let Some(mut writer) = inner.writer.take() {
            writer.flush().map_err(|e| PipeError::Write(e.to_string()))?;
        }
        Ok(())
    }
}
