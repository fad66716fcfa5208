//! Host runtime interface.
//!
//! The connector never owns its output sink or its persistence. The host hands
//! it a [`Pipe`] to write normalized models to and a [`State`] store for
//! checkpoints, both behind traits so tests and the CLI can supply their own.
//!
//! # Modules
//!
//! - [`models`] - Output models and the [`Entity`] wrapper
//! - [`ids`] - Deterministic ID derivation

pub mod ids;
pub mod models;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;

pub use models::*;

/// Errors raised by a [`Pipe`] implementation.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("pipe is closed")]
    Closed,

    #[error("pipe write failed: {0}")]
    Write(String),

    #[error("pipe serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by a [`State`] implementation or while decoding a stored value.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state backend error: {0}")]
    Backend(String),

    #[error("invalid state value for key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode state value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Write-only output sink.
#[async_trait]
pub trait Pipe: Send + Sync {
    async fn write(&self, entity: Entity) -> Result<(), PipeError>;
    async fn flush(&self) -> Result<(), PipeError>;
    async fn close(&self) -> Result<(), PipeError>;
}

/// Opaque key-value store holding JSON strings.
#[async_trait]
pub trait State: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StateError>;
    async fn set_with_expires(
        &self,
        key: &str,
        value: String,
        expires: Duration,
    ) -> Result<(), StateError>;
    async fn exists(&self, key: &str) -> Result<bool, StateError>;
    async fn delete(&self, key: &str) -> Result<(), StateError>;
}

/// Read and decode a JSON value. `Ok(None)` when the key is absent.
pub async fn get_json<T: DeserializeOwned>(
    state: &dyn State,
    key: &str,
) -> Result<Option<T>, StateError> {
    match state.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StateError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode a value as JSON and store it.
pub async fn set_json<T: Serialize + ?Sized>(
    state: &dyn State,
    key: &str,
    value: &T,
) -> Result<(), StateError> {
    let raw = serde_json::to_string(value).map_err(|source| StateError::Encode {
        key: key.to_string(),
        source,
    })?;
    state.set(key, raw).await
}

/// Typed JSON access on top of any [`State`].
#[async_trait]
pub trait StateExt: State {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError>
    where
        Self: Sized,
    {
        get_json(self, key).await
    }

    async fn set_json<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StateError>
    where
        Self: Sized,
    {
        set_json(self, key, value).await
    }
}

impl<S: State> StateExt for S {}

/// In-memory [`State`], used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryState {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, (_, exp))| exp.is_none_or(|e| e > now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl State for MemoryState {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(exp))) if *exp <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StateError> {
        self.entries.lock().insert(key.to_string(), (value, None));
        Ok(())
    }

    async fn set_with_expires(
        &self,
        key: &str,
        value: String,
        expires: Duration,
    ) -> Result<(), StateError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Some(Instant::now() + expires)));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// In-memory [`Pipe`] that records everything written to it.
#[derive(Debug, Default)]
pub struct MemoryPipe {
    inner: Mutex<MemoryPipeInner>,
}

#[derive(Debug, Default)]
struct MemoryPipeInner {
    written: Vec<Entity>,
    flushes: usize,
    closed: bool,
}

impl MemoryPipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<Entity> {
        self.inner.lock().written.clone()
    }

    /// Written entities with the given host model name.
    pub fn of_model(&self, model: &str) -> Vec<Entity> {
        self.inner
            .lock()
            .written
            .iter()
            .filter(|e| e.model_name() == model)
            .cloned()
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.inner.lock().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[async_trait]
impl Pipe for MemoryPipe {
    async fn write(&self, entity: Entity) -> Result<(), PipeError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PipeError::Closed);
        }
        inner.written.push(entity);
        Ok(())
    }

    async fn flush(&self) -> Result<(), PipeError> {
        self.inner.lock().flushes += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), PipeError> {
        self.inner.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_state_round_trips_json() {
        let state = MemoryState::new();
        set_json(&state, "k", &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<i32>> = get_json(&state, "k").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        let missing: Option<Vec<i32>> = get_json(&state, "missing").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn state_ext_reads_typed_values() {
        let state = MemoryState::new();
        state.set_json("n", &7u32).await.unwrap();
        let n: Option<u32> = state.get_json("n").await.unwrap();
        assert_eq!(n, Some(7));
    }

    #[tokio::test]
    async fn get_json_reports_the_key_on_decode_failure() {
        let state = MemoryState::new();
        state.set("k", "not json".into()).await.unwrap();
        let err = get_json::<Vec<i32>>(&state, "k").await.unwrap_err();
        assert!(matches!(err, StateError::Decode { ref key, .. } if key == "k"));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_state_expires_entries() {
        let state = MemoryState::new();
        state
            .set_with_expires("temp", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(state.exists("temp").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!state.exists("temp").await.unwrap());
        assert!(state.keys().is_empty());
    }

    #[tokio::test]
    async fn memory_state_delete_removes_key() {
        let state = MemoryState::new();
        state.set("a", "1".into()).await.unwrap();
        state.set("b", "2".into()).await.unwrap();
        state.delete("a").await.unwrap();
        assert_eq!(state.keys(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn memory_pipe_records_and_rejects_after_close() {
        let pipe = MemoryPipe::new();
        pipe.write(WorkProject::default().into()).await.unwrap();
        pipe.flush().await.unwrap();
        assert_eq!(pipe.of_model("work.Project").len(), 1);
        assert_eq!(pipe.flush_count(), 1);

        pipe.close().await.unwrap();
        assert!(pipe.is_closed());
        let err = pipe
            .write(WorkProject::default().into())
            .await
            .unwrap_err();
        assert!(matches!(err, PipeError::Closed));
    }
}
