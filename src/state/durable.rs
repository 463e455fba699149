//! File-backed durable state storage
//!
//! File layout (`<dir>/<name>.state`):
//!
//! ```text
//! | payload_len: u32 LE | crc32: u32 LE | payload: JSON bytes |
//! ```
//!
//! Writes are atomic:
//! 1. Write header + payload to `<name>.state.tmp`
//! 2. fsync the temp file
//! 3. Rename temp over the final file
//! 4. fsync the directory so the rename itself is durable

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{StorageError, StorageResult};
use super::StateStorage;

const HEADER_LEN: usize = 8;

/// Durable storage of one named state value in a directory.
#[derive(Debug)]
pub struct DurableStateStorage<T> {
    name: String,
    state_path: PathBuf,
    temp_path: PathBuf,
    _state: PhantomData<fn() -> T>,
}

impl<T> DurableStateStorage<T> {
    /// Open storage for `name` inside `dir`, creating the directory if needed.
    pub fn open(dir: &Path, name: &str) -> StorageResult<Self> {
        fs::create_dir_all(dir)
            .map_err(|e| StorageError::io("creating state directory", dir, e))?;

        Ok(Self {
            name: name.to_string(),
            state_path: dir.join(format!("{}.state", name)),
            temp_path: dir.join(format!("{}.state.tmp", name)),
            _state: PhantomData,
        })
    }

    /// Name (key) of the stored state.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn corrupted(&self, reason: impl Into<String>) -> StorageError {
        StorageError::Corrupted {
            path: self.state_path.clone(),
            reason: reason.into(),
        }
    }
}

impl<T> StateStorage<T> for DurableStateStorage<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> StorageResult<Option<T>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.state_path)
            .map_err(|e| StorageError::io("opening state file", &self.state_path, e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| StorageError::io("reading state file", &self.state_path, e))?;

        if bytes.len() < HEADER_LEN {
            return Err(self.corrupted(format!("{} bytes is shorter than header", bytes.len())));
        }

        let payload_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let checksum = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = &bytes[HEADER_LEN..];

        if payload.len() != payload_len {
            return Err(self.corrupted(format!(
                "payload length {} does not match header length {}",
                payload.len(),
                payload_len
            )));
        }
        if !verify_checksum(payload, checksum) {
            return Err(self.corrupted("checksum mismatch"));
        }

        let state = serde_json::from_slice(payload).map_err(|e| StorageError::Serialization {
            name: self.name.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(state))
    }

    fn persist(&self, state: &T) -> StorageResult<()> {
        let payload = serde_json::to_vec(state).map_err(|e| StorageError::Serialization {
            name: self.name.clone(),
            message: e.to_string(),
        })?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| StorageError::Serialization {
                name: self.name.clone(),
                message: format!("state of {} bytes exceeds u32 length", payload.len()),
            })?;

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&compute_checksum(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| StorageError::io("creating temp state file", &self.temp_path, e))?;
        file.write_all(&buf)
            .map_err(|e| StorageError::io("writing temp state file", &self.temp_path, e))?;
        file.sync_all()
            .map_err(|e| StorageError::io("syncing temp state file", &self.temp_path, e))?;

        fs::rename(&self.temp_path, &self.state_path)
            .map_err(|e| StorageError::io("renaming state file", &self.state_path, e))?;

        if let Some(parent) = self.state_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type Counters = BTreeMap<String, i64>;

    #[test]
    fn test_load_missing_state_is_none() {
        let tmp = TempDir::new().unwrap();
        let storage: DurableStateStorage<Counters> =
            DurableStateStorage::open(tmp.path(), "counters").unwrap();
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn test_persist_then_load() {
        let tmp = TempDir::new().unwrap();
        let storage = DurableStateStorage::open(tmp.path(), "counters").unwrap();

        let mut state = Counters::new();
        state.insert("a".to_string(), 7);
        storage.persist(&state).unwrap();

        let loaded: Counters = storage.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!tmp.path().join("counters.state.tmp").exists());
    }

    #[test]
    fn test_persist_replaces_previous_value() {
        let tmp = TempDir::new().unwrap();
        let storage = DurableStateStorage::open(tmp.path(), "counters").unwrap();

        let mut state = Counters::new();
        state.insert("a".to_string(), 1);
        storage.persist(&state).unwrap();
        state.insert("a".to_string(), 2);
        storage.persist(&state).unwrap();

        let loaded: Counters = storage.load().unwrap().unwrap();
        assert_eq!(loaded.get("a"), Some(&2));
    }

    #[test]
    fn test_reopen_sees_persisted_state() {
        let tmp = TempDir::new().unwrap();
        {
            let storage = DurableStateStorage::open(tmp.path(), "counters").unwrap();
            let mut state = Counters::new();
            state.insert("x".to_string(), 99);
            storage.persist(&state).unwrap();
        }

        let storage: DurableStateStorage<Counters> =
            DurableStateStorage::open(tmp.path(), "counters").unwrap();
        assert_eq!(storage.load().unwrap().unwrap().get("x"), Some(&99));
    }

    #[test]
    fn test_corrupted_payload_is_detected() {
        let tmp = TempDir::new().unwrap();
        let storage = DurableStateStorage::open(tmp.path(), "counters").unwrap();
        let mut state = Counters::new();
        state.insert("a".to_string(), 1);
        storage.persist(&state).unwrap();

        let path = storage.state_path().to_path_buf();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let result: StorageResult<Option<Counters>> = storage.load();
        assert!(matches!(result, Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn test_truncated_file_is_detected() {
        let tmp = TempDir::new().unwrap();
        let storage: DurableStateStorage<Counters> =
            DurableStateStorage::open(tmp.path(), "counters").unwrap();
        fs::write(storage.state_path(), [1u8, 2, 3]).unwrap();

        assert!(matches!(storage.load(), Err(StorageError::Corrupted { .. })));
    }
}
