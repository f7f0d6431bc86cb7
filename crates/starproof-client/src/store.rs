//! Durable storage for the issuance flow.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::flow::FlowState;

/// Fixed key the flow state is stored under.
pub const FLOW_STORAGE_KEY: &str = "starproof-flow";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("flow store io: {0}")]
    Io(#[from] io::Error),
    #[error("flow state is not valid json: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait FlowStore {
    fn load(&self) -> Result<Option<FlowState>, StoreError>;
    fn save(&mut self, state: &FlowState) -> Result<(), StoreError>;
}

/// JSON file at `<dir>/starproof-flow.json`, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileFlowStore {
    path: PathBuf,
}

impl FileFlowStore {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{FLOW_STORAGE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlowStore for FileFlowStore {
    fn load(&self) -> Result<Option<FlowState>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, state: &FlowState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        serde_json::to_writer_pretty(&mut file, state)?;
        file.flush()?;
        file.sync_data()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// In-memory store; keeps the serialized form so reloads go through serde.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlowStore {
    saved: Option<String>,
    saves: usize,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl FlowStore for MemoryFlowStore {
    fn load(&self) -> Result<Option<FlowState>, StoreError> {
        match &self.saved {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, state: &FlowState) -> Result<(), StoreError> {
        self.saved = Some(serde_json::to_string(state)?);
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FileFlowStore, FlowStore, MemoryFlowStore};
    use crate::flow::FlowState;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFlowStore::in_dir(dir.path());
        assert!(store.load().unwrap().is_none());
        assert!(store.path().ends_with("starproof-flow.json"));
    }

    #[test]
    fn file_store_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileFlowStore::in_dir(dir.path().join("nested"));
        store.save(&FlowState::Draft).unwrap();
        store.save(&FlowState::Draft).unwrap();
        assert_eq!(store.load().unwrap(), Some(FlowState::Draft));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileFlowStore::in_dir(dir.path());
        std::fs::write(store.path(), b"{\"step\":").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryFlowStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&FlowState::Draft).unwrap();
        assert_eq!(store.saves(), 1);
        assert_eq!(store.load().unwrap(), Some(FlowState::Draft));
    }
}
