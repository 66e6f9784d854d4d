//! Application service hosting study deployments.
//!
//! Each command runs as load, execute, save, publish:
//!
//! 1. Take the per-deployment lock, so commands for one deployment never interleave
//! 2. Restore the aggregate from its stored snapshot
//! 3. Run the command; on failure return without touching storage
//! 4. Store the new snapshot, provided storage still holds the one loaded in step 2
//! 5. Publish the drained events on the broadcast channel
//!
//! If another writer sharing the repository got there first, step 4 reports a
//! conflict and the command runs again on the fresh snapshot. Commands for
//! different deployments run concurrently.
//!
//! Locks are only kept for deployments that exist in the repository.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::repository::{DeploymentRepository, RepositoryError};
use crate::{
    clock::Clock,
    domain::{
        DeploymentEvent, DeploymentId, EventMetadata, MasterDeviceDeployment, StoredEvent,
        StudyDeployment, StudyDeploymentStatus,
    },
    error::DeploymentError,
    invitation::ParticipantInvitation,
    protocol::{DeviceRegistration, RoleName, StudyProtocolSnapshot},
};

/// Capacity of the event channel before slow subscribers start lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Attempts at a command before concurrent writers are reported as a conflict.
const MAX_COMMAND_ATTEMPTS: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("deployment '{0}' not found")]
    NotFound(DeploymentId),
}

impl ServiceError {
    /// The domain error, if the aggregate rejected the command.
    #[must_use]
    pub const fn as_deployment_error(&self) -> Option<&DeploymentError> {
        match self {
            Self::Deployment(e) => Some(e),
            Self::Repository(_) | Self::NotFound(_) => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Per-deployment lock guarding the number of events published for it.
type StreamLock = Arc<Mutex<u64>>;

pub struct DeploymentService<R> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    streams: Mutex<HashMap<DeploymentId, StreamLock>>,
    events: broadcast::Sender<StoredEvent>,
}

impl<R: DeploymentRepository> DeploymentService<R> {
    #[must_use]
    pub fn new(repository: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            repository,
            clock,
            streams: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Receive every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub const fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Create and store a new deployment.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Deployment` if the protocol or an invitation is invalid,
    /// or `ServiceError::Repository` if storing fails.
    pub async fn create_deployment(
        &self,
        protocol: StudyProtocolSnapshot,
        invitations: &[ParticipantInvitation],
    ) -> ServiceResult<StudyDeploymentStatus> {
        let deployment =
            StudyDeployment::from_invitations(protocol, invitations, Arc::clone(&self.clock))?;
        self.repository.add(deployment.snapshot()).await?;

        Ok(deployment.status())
    }

    /// # Errors
    ///
    /// See [`StudyDeployment::register_device`].
    pub async fn register_device(
        &self,
        id: DeploymentId,
        device: RoleName,
        registration: DeviceRegistration,
    ) -> ServiceResult<StudyDeploymentStatus> {
        self.execute(id, move |deployment| {
            deployment.register_device(&device, registration.clone())
        })
        .await
    }

    /// # Errors
    ///
    /// See [`StudyDeployment::unregister_device`].
    pub async fn unregister_device(
        &self,
        id: DeploymentId,
        device: RoleName,
    ) -> ServiceResult<StudyDeploymentStatus> {
        self.execute(id, move |deployment| deployment.unregister_device(&device))
            .await
    }

    /// # Errors
    ///
    /// See [`StudyDeployment::device_deployed`].
    pub async fn device_deployed(
        &self,
        id: DeploymentId,
        device: RoleName,
        last_updated_on: DateTime<Utc>,
    ) -> ServiceResult<StudyDeploymentStatus> {
        self.execute(id, move |deployment| {
            deployment.device_deployed(&device, last_updated_on)
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` for unknown deployments.
    pub async fn stop(&self, id: DeploymentId) -> ServiceResult<StudyDeploymentStatus> {
        self.execute(id, |deployment| {
            deployment.stop();
            Ok(())
        })
        .await
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` for unknown deployments.
    pub async fn status(&self, id: DeploymentId) -> ServiceResult<StudyDeploymentStatus> {
        Ok(self.load(id).await?.status())
    }

    /// # Errors
    ///
    /// See [`StudyDeployment::device_deployment_for`].
    pub async fn device_deployment_for(
        &self,
        id: DeploymentId,
        device: &RoleName,
    ) -> ServiceResult<MasterDeviceDeployment> {
        Ok(self.load(id).await?.device_deployment_for(device)?)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Repository` if listing fails.
    pub async fn list(&self) -> ServiceResult<Vec<DeploymentId>> {
        Ok(self.repository.list_ids().await?)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn execute<F>(&self, id: DeploymentId, command: F) -> ServiceResult<StudyDeploymentStatus>
    where
        F: Fn(&mut StudyDeployment) -> Result<(), DeploymentError> + Send + Sync,
    {
        let stream = self.stream(id).await?;
        let mut published = stream.lock().await;

        for attempt in 1..=MAX_COMMAND_ATTEMPTS {
            let stored = self
                .repository
                .get(id)
                .await?
                .ok_or(ServiceError::NotFound(id))?;
            let mut deployment =
                StudyDeployment::from_snapshot(stored.clone(), Arc::clone(&self.clock))?;
            command(&mut deployment)?;
            let events = deployment.consume_events();

            if events.is_empty() {
                return Ok(deployment.status());
            }

            match self.repository.update(&stored, deployment.snapshot()).await {
                Ok(()) => {
                    self.publish(id, &mut published, events);
                    return Ok(deployment.status());
                }
                Err(RepositoryError::Conflict(reason)) => {
                    debug!(
                        deployment_id = %id,
                        attempt,
                        %reason,
                        "Retrying command on fresh snapshot"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RepositoryError::conflict(format!(
            "deployment '{id}' changed concurrently {MAX_COMMAND_ATTEMPTS} times"
        ))
        .into())
    }

    async fn load(&self, id: DeploymentId) -> ServiceResult<StudyDeployment> {
        let snapshot = self
            .repository
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound(id))?;
        Ok(StudyDeployment::from_snapshot(
            snapshot,
            Arc::clone(&self.clock),
        )?)
    }

    async fn stream(&self, id: DeploymentId) -> ServiceResult<StreamLock> {
        let mut streams = self.streams.lock().await;
        if let Some(stream) = streams.get(&id) {
            return Ok(Arc::clone(stream));
        }
        if self.repository.get(id).await?.is_none() {
            return Err(ServiceError::NotFound(id));
        }
        Ok(Arc::clone(streams.entry(id).or_default()))
    }

    fn publish(&self, id: DeploymentId, published: &mut u64, events: Vec<DeploymentEvent>) {
        let stored_at = self.clock.now();
        for event in events {
            *published += 1;
            debug!(deployment_id = %id, event_type = event.event_type(), "Publishing event");
            let stored = StoredEvent::new(
                event,
                EventMetadata {
                    stream_id: id.to_string(),
                    stream_version: *published,
                    stored_at,
                },
            );
            // No subscribers is not an error
            let _ = self.events.send(stored);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        application::InMemoryDeploymentRepository,
        clock::ManualClock,
        protocol::{DeviceDescriptor, DeviceType},
    };

    fn service() -> DeploymentService<InMemoryDeploymentRepository> {
        DeploymentService::new(
            Arc::new(InMemoryDeploymentRepository::new()),
            Arc::new(ManualClock::new(Utc::now())),
        )
    }

    fn protocol() -> StudyProtocolSnapshot {
        let mut protocol = StudyProtocolSnapshot::new("Streams", Utc::now());
        protocol.add_master_device(DeviceDescriptor::master(
            RoleName::parse("Phone").expect("valid role"),
            DeviceType::Smartphone,
        ));
        protocol
    }

    #[tokio::test]
    async fn test_unknown_ids_keep_no_locks() {
        let service = service();

        for _ in 0..1000 {
            let result = service.stop(DeploymentId::new()).await;
            assert!(matches!(result, Err(ServiceError::NotFound(_))));
        }

        assert!(service.streams.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_one_lock_per_stored_deployment() {
        let service = service();
        let id = service
            .create_deployment(protocol(), &[])
            .await
            .expect("created")
            .deployment_id;

        service.stop(id).await.expect("stops");
        service.stop(id).await.expect("stops again");
        let _ = service.stop(DeploymentId::new()).await;

        let streams = service.streams.lock().await;
        assert_eq!(streams.len(), 1);
        assert!(streams.contains_key(&id));
    }
}
