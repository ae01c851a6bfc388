use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use cchain_core::{ChainError, WorldState};
use tempfile::NamedTempFile;
use tracing::{info, warn};

const SNAPSHOT_FILE: &str = "state.json";
const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Atomic file-backed snapshot of `WorldState`: write to a temp file in the
/// same directory, `sync_all`, then rename over the live snapshot so a
/// crash mid-write never leaves a half-written file in its place.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, ChainError> {
        let dir = data_dir.into();
        fs::create_dir_all(&dir).map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(DIR_MODE))
            .map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// `Ok(None)` means no snapshot exists yet (fresh data dir, genesis
    /// path). A present-but-unparseable file is `CorruptFile`, never
    /// silently discarded.
    pub fn load(&self) -> Result<Option<WorldState>, ChainError> {
        let path = self.snapshot_path();
        if !path.exists() {
            info!(path = %path.display(), "no snapshot found, starting from genesis");
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        let state: WorldState = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(error = %e, "snapshot file failed to parse");
            ChainError::CorruptFile
        })?;
        Ok(Some(state))
    }

    pub fn save(&self, state: &WorldState) -> Result<(), ChainError> {
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        use std::io::Write;
        tmp.write_all(&bytes).map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        tmp.as_file().sync_all().map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(FILE_MODE))
            .map_err(|e| ChainError::SnapshotIO(e.to_string()))?;
        tmp.persist(self.snapshot_path())
            .map_err(|e| ChainError::SnapshotIO(e.error.to_string()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}
