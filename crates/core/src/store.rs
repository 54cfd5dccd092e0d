use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;

/// The record kinds persisted by the session, one key each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Memory,
    Agents,
    Status,
    Messages,
    Logs,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [Self::Memory, Self::Agents, Self::Status, Self::Messages, Self::Logs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Agents => "agents",
            Self::Status => "status",
            Self::Messages => "messages",
            Self::Logs => "logs",
        }
    }

    /// Storage key, e.g. `ox_status_v4.7_tactical`.
    pub fn key(&self, version: &str) -> String {
        format!("ox_{}_{}", self.as_str(), version)
    }
}

/// Raw string key/value backend.
pub trait KvBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KvBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path(key);
        let tmp = target.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// In-process backend. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    map: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.map
            .lock()
            .map(|m| {
                let mut keys: Vec<String> = m.keys().cloned().collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }
}

impl KvBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let map = self.map.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.map.lock().map_err(|_| StorageError::Poisoned)?;
        map.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut map = self.map.lock().map_err(|_| StorageError::Poisoned)?;
        map.remove(key);
        Ok(())
    }
}

/// Versioned, best-effort typed store. No operation here fails: write errors
/// are logged and dropped, read errors yield the caller's default.
pub struct Store {
    backend: Box<dyn KvBackend>,
    version: String,
}

impl Store {
    pub fn new(backend: impl KvBackend + 'static, version: impl Into<String>) -> Self {
        Self {
            backend: Box::new(backend),
            version: version.into(),
        }
    }

    pub fn in_memory(version: impl Into<String>) -> Self {
        Self::new(MemoryBackend::new(), version)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn key(&self, kind: RecordKind) -> String {
        kind.key(&self.version)
    }

    pub fn save<T: Serialize + ?Sized>(&self, kind: RecordKind, value: &T) {
        let key = self.key(kind);
        let result = serde_json::to_string(value)
            .map_err(StorageError::from)
            .and_then(|json| self.backend.write(&key, &json));
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "save failed");
        }
    }

    /// Load `kind`, or `default` when absent, unreadable or in an older shape.
    pub fn load<T: DeserializeOwned>(&self, kind: RecordKind, default: T) -> T {
        let key = self.key(kind);
        match self.backend.read(&key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "stored value unreadable, using default");
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "load failed, using default");
                default
            }
        }
    }

    /// Remove every namespaced key of this version.
    pub fn wipe(&self) {
        for kind in RecordKind::ALL {
            let key = self.key(kind);
            if let Err(e) = self.backend.remove(&key) {
                tracing::warn!(key = %key, error = %e, "wipe failed");
            }
        }
        tracing::info!(version = %self.version, "store wiped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SystemLogEntry, SystemStatus};

    #[test]
    fn keys_are_versioned() {
        assert_eq!(RecordKind::Agents.key("v4.7_tactical"), "ox_agents_v4.7_tactical");
        let store = Store::in_memory("v1");
        assert_eq!(store.key(RecordKind::Logs), "ox_logs_v1");
    }

    #[test]
    fn status_round_trips() {
        let store = Store::in_memory("v1");
        let mut status = SystemStatus::default();
        status.integrity = 42.5;
        status.glitch_intensity = 0.3;
        status.active_agent_ids.push("other".into());
        store.save(RecordKind::Status, &status);
        let loaded = store.load(RecordKind::Status, SystemStatus::default());
        assert_eq!(loaded, status);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let backend = MemoryBackend::new();
        backend.write("ox_status_v1", "{not json").unwrap();
        let store = Store::new(backend, "v1");
        assert_eq!(store.load(RecordKind::Status, SystemStatus::default()), SystemStatus::default());
    }

    #[test]
    fn other_versions_are_ignored() {
        let backend = MemoryBackend::new();
        let old = Store::new(backend.clone(), "v3");
        old.save(RecordKind::Logs, &vec![SystemLogEntry::new(crate::types::LogKind::Sistemico, "x")]);
        let current = Store::new(backend, "v4");
        let logs: Vec<SystemLogEntry> = current.load(RecordKind::Logs, Vec::new());
        assert!(logs.is_empty());
    }

    #[test]
    fn wipe_removes_only_own_keys() {
        let backend = MemoryBackend::new();
        backend.write("unrelated", "1").unwrap();
        let store = Store::new(backend.clone(), "v1");
        for kind in RecordKind::ALL {
            store.save(kind, &Vec::<String>::new());
        }
        store.wipe();
        assert_eq!(backend.keys(), vec!["unrelated".to_string()]);
    }

    #[test]
    fn file_backend_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let status = SystemStatus { integrity: 7.0, ..SystemStatus::default() };
        Store::new(FileBackend::new(dir.path()), "v1").save(RecordKind::Status, &status);

        let reopened = Store::new(FileBackend::new(dir.path()), "v1");
        assert_eq!(reopened.load(RecordKind::Status, SystemStatus::default()), status);
        assert!(dir.path().join("ox_status_v1.json").exists());
    }

    #[test]
    fn file_backend_missing_key_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested"));
        assert!(backend.read("nope").unwrap().is_none());
        backend.remove("nope").unwrap();
    }
}
