use std::fs;
use std::path::{Path, PathBuf};

use birdfingers_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    data_dir: PathBuf,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("birdfingers_snapshots")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("birdfingers.log")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("birdfingers_audit.jsonl")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("birdfingers.toml")
    }

    pub fn snapshot_meta_path(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(format!("{id}.json"))
    }

    pub fn snapshot_payload_path(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(format!("{id}.txt"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.data_dir.clone(), self.snapshots_dir()] {
            fs::create_dir_all(&dir).map_err(|err| Error::storage(&dir, err))?;
        }
        Ok(())
    }
}
