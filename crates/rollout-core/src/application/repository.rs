//! Persistence boundary for study deployments.
//!
//! Repositories store [`StudyDeploymentSnapshot`]s, never live aggregates, so an
//! implementation only needs to move serde-serialisable values around.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::{DeploymentId, StudyDeploymentSnapshot};

// ============================================================================
// SHARED ERROR TYPES
// ============================================================================

/// Common errors across all repository operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// Entity not found in repository
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Conflict with existing data
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored data could not be read back
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Underlying storage failure
    #[error("storage error: {0}")]
    StorageError(String),
}

impl RepositoryError {
    /// Create a not found error
    #[must_use]
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} '{id}'"))
    }

    /// Create a conflict error
    #[must_use]
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    /// Create an invalid input error
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    /// Create a storage error
    #[must_use]
    pub fn storage_error(reason: impl Into<String>) -> Self {
        Self::StorageError(reason.into())
    }
}

/// Result type alias for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

// ============================================================================
// REPOSITORY TRAIT
// ============================================================================

/// Storage for study deployment snapshots.
///
/// # Error Handling
///
/// - `add` fails with `Conflict` if the id is taken
/// - `get` returns `Ok(None)` for unknown ids
/// - `update` and `remove` fail with `NotFound` for unknown ids
/// - `update` fails with `Conflict` if the stored snapshot is no longer `expected`
#[async_trait::async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Store a new deployment.
    async fn add(&self, snapshot: StudyDeploymentSnapshot) -> RepositoryResult<()>;

    /// Load a deployment.
    async fn get(&self, id: DeploymentId) -> RepositoryResult<Option<StudyDeploymentSnapshot>>;

    /// Replace an existing deployment, provided it still equals `expected`.
    ///
    /// The comparison and the write are atomic with respect to every other write
    /// to the same store, so a snapshot loaded before a concurrent update can never
    /// overwrite it.
    async fn update(
        &self,
        expected: &StudyDeploymentSnapshot,
        snapshot: StudyDeploymentSnapshot,
    ) -> RepositoryResult<()>;

    /// Delete a deployment.
    async fn remove(&self, id: DeploymentId) -> RepositoryResult<()>;

    /// Ids of all stored deployments, sorted.
    async fn list_ids(&self) -> RepositoryResult<Vec<DeploymentId>>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

/// Repository keeping snapshots in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDeploymentRepository {
    deployments: RwLock<HashMap<DeploymentId, StudyDeploymentSnapshot>>,
}

impl InMemoryDeploymentRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DeploymentRepository for InMemoryDeploymentRepository {
    async fn add(&self, snapshot: StudyDeploymentSnapshot) -> RepositoryResult<()> {
        let mut deployments = self.deployments.write().await;
        if deployments.contains_key(&snapshot.id) {
            return Err(RepositoryError::conflict(format!(
                "deployment '{}' already exists",
                snapshot.id
            )));
        }
        deployments.insert(snapshot.id, snapshot);
        Ok(())
    }

    async fn get(&self, id: DeploymentId) -> RepositoryResult<Option<StudyDeploymentSnapshot>> {
        Ok(self.deployments.read().await.get(&id).cloned())
    }

    async fn update(
        &self,
        expected: &StudyDeploymentSnapshot,
        snapshot: StudyDeploymentSnapshot,
    ) -> RepositoryResult<()> {
        let mut deployments = self.deployments.write().await;
        match deployments.get_mut(&snapshot.id) {
            Some(stored) if stored == expected => {
                *stored = snapshot;
                Ok(())
            }
            Some(_) => Err(RepositoryError::conflict(format!(
                "deployment '{}' changed since it was loaded",
                snapshot.id
            ))),
            None => Err(RepositoryError::not_found("deployment", snapshot.id)),
        }
    }

    async fn remove(&self, id: DeploymentId) -> RepositoryResult<()> {
        self.deployments
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::not_found("deployment", id))
    }

    async fn list_ids(&self) -> RepositoryResult<Vec<DeploymentId>> {
        let mut ids: Vec<DeploymentId> = self.deployments.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}
