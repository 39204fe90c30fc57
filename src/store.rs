// src/store.rs
//! Storage port for discovery state. The pipeline only ever sees the
//! `KeyValueStore` trait; backends are injected so tests run against the
//! in-memory store and the CLI against a directory of JSON files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key for the persisted project list.
pub const KEY_PROJECTS: &str = "discovered_projects";
/// Key for the persisted grant list.
pub const KEY_GRANTS: &str = "discovered_grants";
/// Key for the job history ring.
pub const KEY_JOBS: &str = "ingestion_jobs";
/// Key for the timestamp of the last completed run.
pub const KEY_LAST_RUN: &str = "last_run";

pub const ENV_DATA_DIR: &str = "SCOUT_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "data";

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: String) -> Result<()>;
}

/// Typed read through the port. Absent key is `None`; malformed JSON is an
/// error so the caller can decide between failing and degrading.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get_raw(key).await? {
        Some(raw) => {
            let value =
                serde_json::from_str(&raw).with_context(|| format!("decode stored '{key}'"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("encode '{key}'"))?;
    store.set_raw(key, raw).await
}

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let map = self.map.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(map.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        let mut map = self.map.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }
}

/// One JSON file per key under a data directory. Writes go through a temp
/// file and rename so a crash mid-write never leaves a truncated list.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Data directory from `SCOUT_DATA_DIR`, defaulting to `data/`.
    pub fn from_env() -> Self {
        let dir = std::env::var(ENV_DATA_DIR).unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create data dir {}", self.dir.display()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }
}
