use crate::SnapshotStore;
use anyhow::{Context, Result};
use proco_core::Snapshot;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Pretty-printed JSON snapshot in a single file. Writes go to a sibling temp
/// file first and are renamed into place.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create snapshot dir {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Store at `<data_dir>/snapshot.json`.
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Self::new(data_dir.as_ref().join("snapshot.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .with_context(|| format!("write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("rename into {}", self.path.display()))?;
        debug!(path = %self.path.display(), blocks = snapshot.blocks.len(), "snapshot written");
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data =
            fs::read(&self.path).with_context(|| format!("read {}", self.path.display()))?;
        let snapshot = serde_json::from_slice::<Snapshot>(&data)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(snapshot))
    }
}
