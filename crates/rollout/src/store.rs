//! File-backed deployment repository.
//!
//! Each deployment is one pretty-printed JSON snapshot at `<data_dir>/<id>.json`.
//! Writes go to a temporary file first and are renamed into place, under an
//! exclusive lock on `<data_dir>/.store.lock`. The lock also covers the check of
//! what is on disk, so an update from a process that loaded an older snapshot is
//! rejected as a conflict instead of overwriting a newer one.

use std::{
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use fs2::FileExt;
use rollout_core::{
    application::{DeploymentRepository, RepositoryError, RepositoryResult},
    DeploymentId, StudyDeploymentSnapshot,
};
use tracing::debug;

const LOCK_FILE: &str = ".store.lock";
const EXTENSION: &str = "json";

/// What a locked write expects to find on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expect {
    Absent,
    Current(StudyDeploymentSnapshot),
}

#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    dir: PathBuf,
}

impl JsonFileRepository {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: DeploymentId) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    async fn write(&self, snapshot: StudyDeploymentSnapshot, expect: Expect) -> RepositoryResult<()> {
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| RepositoryError::storage_error(format!("serialize snapshot: {e}")))?;
        let dir = self.dir.clone();
        let id = snapshot.id;

        tokio::task::spawn_blocking(move || write_locked(&dir, id, &json, expect))
            .await
            .map_err(|e| RepositoryError::storage_error(format!("write task failed: {e}")))?
    }
}

#[async_trait]
impl DeploymentRepository for JsonFileRepository {
    async fn add(&self, snapshot: StudyDeploymentSnapshot) -> RepositoryResult<()> {
        self.write(snapshot, Expect::Absent).await
    }

    async fn get(&self, id: DeploymentId) -> RepositoryResult<Option<StudyDeploymentSnapshot>> {
        let path = self.path_for(id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RepositoryError::storage_error(format!(
                    "read {}: {e}",
                    path.display()
                )))
            }
        };

        parse_snapshot(&path, &content).map(Some)
    }

    async fn update(
        &self,
        expected: &StudyDeploymentSnapshot,
        snapshot: StudyDeploymentSnapshot,
    ) -> RepositoryResult<()> {
        self.write(snapshot, Expect::Current(expected.clone())).await
    }

    async fn remove(&self, id: DeploymentId) -> RepositoryResult<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(RepositoryError::not_found("deployment", id))
            }
            Err(e) => Err(RepositoryError::storage_error(e.to_string())),
        }
    }

    async fn list_ids(&self) -> RepositoryResult<Vec<DeploymentId>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RepositoryError::storage_error(e.to_string())),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RepositoryError::storage_error(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            // Foreign files in the data directory are ignored
            if let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| DeploymentId::from_str(stem).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn write_locked(dir: &Path, id: DeploymentId, json: &str, expect: Expect) -> RepositoryResult<()> {
    let storage = |action: &str, e: std::io::Error| {
        RepositoryError::storage_error(format!("{action} in {}: {e}", dir.display()))
    };

    std::fs::create_dir_all(dir).map_err(|e| storage("create data directory", e))?;

    // Released when the file is dropped
    let lock = File::options()
        .write(true)
        .create(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE))
        .map_err(|e| storage("open lock file", e))?;
    lock.lock_exclusive()
        .map_err(|e| storage("acquire lock", e))?;

    let path = dir.join(format!("{id}.{EXTENSION}"));
    match expect {
        Expect::Absent if path.exists() => {
            return Err(RepositoryError::conflict(format!(
                "deployment {id} already exists"
            )))
        }
        Expect::Absent => {}
        Expect::Current(expected) => {
            let stored = read_snapshot(&path)?
                .ok_or_else(|| RepositoryError::not_found("deployment", id))?;
            if stored != expected {
                return Err(RepositoryError::conflict(format!(
                    "deployment {id} changed since it was loaded"
                )));
            }
        }
    }

    let staging = dir.join(format!("{id}.{EXTENSION}.tmp"));
    replace_file(&staging, &path, json).map_err(|e| storage("replace snapshot", e))?;

    debug!(deployment_id = %id, path = %path.display(), "Stored snapshot");
    Ok(())
}

fn read_snapshot(path: &Path) -> RepositoryResult<Option<StudyDeploymentSnapshot>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RepositoryError::storage_error(format!(
                "read {}: {e}",
                path.display()
            )))
        }
    };
    parse_snapshot(path, &content).map(Some)
}

fn parse_snapshot(path: &Path, content: &str) -> RepositoryResult<StudyDeploymentSnapshot> {
    serde_json::from_str(content).map_err(|e| {
        RepositoryError::invalid_input(format!("{} is not a deployment snapshot: {e}", path.display()))
    })
}

/// Write `content` to `staging` and rename it over `target`.
/// On failure the staging file is removed and `target` is left as it was.
fn replace_file(staging: &Path, target: &Path, content: &str) -> std::io::Result<()> {
    let result = std::fs::write(staging, content).and_then(|()| std::fs::rename(staging, target));
    if result.is_err() && staging.is_file() {
        let _ = std::fs::remove_file(staging);
    }
    result
}
