//! Persistence for annotations and known users.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::UserId, errors::Error, ports::Store, Result};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    annotations: BTreeMap<String, Annotation>,
    #[serde(default)]
    users: BTreeSet<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Annotation {
    message: String,
    created_at: DateTime<Utc>,
}

/// `Store` backed by a single JSON file, rewritten on every change.
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = load_store_file(&path)?.unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            users = data.users.len(),
            annotations = data.annotations.len(),
            "store opened"
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut StoreData) -> T) -> Result<T> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| Error::External("store lock poisoned".to_string()))?;
        let out = f(&mut *data);
        save_store_file(&self.path, &*data)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Option<T> {
        self.data.lock().ok().map(|d| f(&*d))
    }
}

impl Store for JsonFileStore {
    fn put_annotation(&self, token: &str, message: &str) -> Result<Option<String>> {
        if let Some(existing) = self.annotation(token) {
            return Ok(Some(existing));
        }
        self.update(|d| claim_annotation(d, token, message))
    }

    fn annotation(&self, token: &str) -> Option<String> {
        self.read(|d| d.annotations.get(token).map(|a| a.message.clone()))
            .flatten()
    }

    fn add_user(&self, user: UserId) -> Result<bool> {
        if self.read(|d| d.users.contains(&user.0)).unwrap_or(false) {
            return Ok(false);
        }
        self.update(|d| d.users.insert(user.0))
    }

    fn remove_user(&self, user: UserId) -> Result<bool> {
        self.update(|d| d.users.remove(&user.0))
    }

    fn users(&self) -> Vec<UserId> {
        self.read(|d| d.users.iter().copied().map(UserId).collect())
            .unwrap_or_default()
    }
}

/// First writer wins; later writers get the stored message back.
fn claim_annotation(d: &mut StoreData, token: &str, message: &str) -> Option<String> {
    if let Some(existing) = d.annotations.get(token) {
        return Some(existing.message.clone());
    }
    d.annotations.insert(
        token.to_string(),
        Annotation {
            message: message.to_string(),
            created_at: Utc::now(),
        },
    );
    None
}

fn load_store_file(path: &Path) -> Result<Option<StoreData>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: StoreData = serde_json::from_str(&txt)?;
    Ok(Some(data))
}

fn save_store_file(path: &Path, data: &StoreData) -> Result<()> {
    let txt = serde_json::to_string_pretty(data)?;
    // The previous file stays intact until the rename.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, txt)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// In-memory `Store`, for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl Store for MemoryStore {
    fn put_annotation(&self, token: &str, message: &str) -> Result<Option<String>> {
        let mut d = self
            .data
            .lock()
            .map_err(|_| Error::External("store lock poisoned".to_string()))?;
        Ok(claim_annotation(&mut d, token, message))
    }

    fn annotation(&self, token: &str) -> Option<String> {
        let d = self.data.lock().ok()?;
        d.annotations.get(token).map(|a| a.message.clone())
    }

    fn add_user(&self, user: UserId) -> Result<bool> {
        let mut d = self
            .data
            .lock()
            .map_err(|_| Error::External("store lock poisoned".to_string()))?;
        Ok(d.users.insert(user.0))
    }

    fn remove_user(&self, user: UserId) -> Result<bool> {
        let mut d = self
            .data
            .lock()
            .map_err(|_| Error::External("store lock poisoned".to_string()))?;
        Ok(d.users.remove(&user.0))
    }

    fn users(&self) -> Vec<UserId> {
        self.data
            .lock()
            .map(|d| d.users.iter().copied().map(UserId).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        std::env::temp_dir().join(format!("{prefix}-{pid}-{ts}.json"))
    }

    #[test]
    fn json_store_survives_reopen() {
        let path = tmp("vaultlink-store");
        {
            let store = JsonFileStore::open(&path).unwrap();
            assert!(store.add_user(UserId(5)).unwrap());
            assert!(!store.add_user(UserId(5)).unwrap());
            store.add_user(UserId(3)).unwrap();
            assert_eq!(store.put_annotation("tok", "hello").unwrap(), None);
            assert_eq!(
                store.put_annotation("tok", "other").unwrap().as_deref(),
                Some("hello")
            );
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.users(), vec![UserId(3), UserId(5)]);
        assert_eq!(store.annotation("tok").as_deref(), Some("hello"));
        assert_eq!(store.annotation("other"), None);

        assert!(store.remove_user(UserId(3)).unwrap());
        assert_eq!(store.users(), vec![UserId(5)]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_file_opens_as_empty_store() {
        let path = tmp("vaultlink-empty");
        std::fs::write(&path, "").unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.users().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn memory_store_tracks_users() {
        let store = MemoryStore::default();
        assert!(store.add_user(UserId(1)).unwrap());
        assert!(!store.add_user(UserId(1)).unwrap());
        assert!(store.remove_user(UserId(1)).unwrap());
        assert!(store.users().is_empty());
    }
}
