//! Integration tests for the deployment service over the in-memory repository.

#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Duration, Utc};
use rollout_core::{
    application::{DeploymentRepository, RepositoryError, RepositoryResult},
    invitation::ParticipantInvitation,
    protocol::{DeviceDescriptor, DeviceRegistration, DeviceType, RoleName, StudyProtocolSnapshot},
    DeploymentEvent, DeploymentId, DeploymentPhase, DeploymentService, DeviceState,
    InMemoryDeploymentRepository, ManualClock, ServiceError, StudyDeployment,
    StudyDeploymentSnapshot,
};
use tokio::sync::broadcast::error::TryRecvError;

fn role(name: &str) -> RoleName {
    RoleName::parse(name).expect("valid role name")
}

fn protocol() -> StudyProtocolSnapshot {
    let mut protocol = StudyProtocolSnapshot::new("Service", Utc::now());
    protocol.add_master_device(DeviceDescriptor::master(role("Phone"), DeviceType::Smartphone));
    protocol.add_connected_device(
        DeviceDescriptor::connected(role("Monitor"), DeviceType::Generic),
        &role("Phone"),
    );
    protocol
}

struct Harness {
    service: DeploymentService<InMemoryDeploymentRepository>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
    ));
    let service = DeploymentService::new(
        Arc::new(InMemoryDeploymentRepository::new()),
        clock.clone(),
    );
    Harness { service, clock }
}

async fn create(harness: &Harness) -> DeploymentId {
    let invitation = ParticipantInvitation::for_username("alice", [role("Phone")]);
    harness
        .service
        .create_deployment(protocol(), &[invitation])
        .await
        .expect("deployment created")
        .deployment_id
}

#[tokio::test]
async fn full_lifecycle_through_service() {
    let harness = harness();
    let id = create(&harness).await;

    harness
        .service
        .register_device(id, role("Phone"), DeviceRegistration::new("phone"))
        .await
        .expect("registers");
    let status = harness
        .service
        .register_device(id, role("Monitor"), DeviceRegistration::new("monitor"))
        .await
        .expect("registers");
    assert_eq!(status.phase, DeploymentPhase::DeployingDevices);

    let unit = harness
        .service
        .device_deployment_for(id, &role("Phone"))
        .await
        .expect("deployment available");
    let status = harness
        .service
        .device_deployed(id, role("Phone"), unit.last_updated_on)
        .await
        .expect("confirms");
    assert_eq!(status.phase, DeploymentPhase::Running);
    assert!(status.started_on.is_some());

    let stored = harness.service.status(id).await.expect("stored");
    assert_eq!(stored, status);
}

#[tokio::test]
async fn events_are_published_with_increasing_versions() {
    let harness = harness();
    let id = create(&harness).await;
    let mut events = harness.service.subscribe();

    harness
        .service
        .register_device(id, role("Phone"), DeviceRegistration::new("phone"))
        .await
        .expect("registers");
    harness
        .service
        .register_device(id, role("Monitor"), DeviceRegistration::new("monitor"))
        .await
        .expect("registers");

    let first = events.recv().await.expect("first event");
    let second = events.recv().await.expect("second event");

    assert_eq!(first.stream_id(), id.to_string());
    assert_eq!(first.stream_version(), 1);
    assert_eq!(second.stream_version(), 2);
    assert!(matches!(first.event, DeploymentEvent::DeviceRegistered(_)));
    assert_eq!(second.event.device(), Some(&role("Monitor")));
}

#[tokio::test]
async fn failed_command_changes_nothing() {
    let harness = harness();
    let id = create(&harness).await;
    let mut events = harness.service.subscribe();
    let before = harness
        .service
        .repository()
        .get(id)
        .await
        .expect("readable")
        .expect("stored");

    let result = harness
        .service
        .register_device(id, role("Smartwatch"), DeviceRegistration::new("watch"))
        .await;

    assert!(result
        .as_ref()
        .is_err_and(|e| e.as_deployment_error().is_some_and(|e| e.is_invalid_argument())));
    let after = harness
        .service
        .repository()
        .get(id)
        .await
        .expect("readable")
        .expect("stored");
    assert_eq!(after, before);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn stale_confirmation_is_rejected_after_reregistration() {
    let harness = harness();
    let id = create(&harness).await;
    for (device, device_id) in [("Phone", "phone"), ("Monitor", "monitor")] {
        harness
            .service
            .register_device(id, role(device), DeviceRegistration::new(device_id))
            .await
            .expect("registers");
    }
    let unit = harness
        .service
        .device_deployment_for(id, &role("Phone"))
        .await
        .expect("deployment available");

    harness.clock.advance(Duration::seconds(5));
    harness
        .service
        .unregister_device(id, role("Monitor"))
        .await
        .expect("unregisters");
    harness
        .service
        .register_device(id, role("Monitor"), DeviceRegistration::new("replacement"))
        .await
        .expect("registers again");

    let result = harness
        .service
        .device_deployed(id, role("Phone"), unit.last_updated_on)
        .await;
    assert!(matches!(result, Err(ServiceError::Deployment(_))));

    let status = harness.service.status(id).await.expect("stored");
    let phone = status.device_status(&role("Phone")).expect("phone status");
    assert_eq!(
        phone.state,
        DeviceState::Registered {
            can_obtain_deployment: true
        }
    );
}

#[tokio::test]
async fn stop_is_idempotent_and_published_once() {
    let harness = harness();
    let id = create(&harness).await;
    let mut events = harness.service.subscribe();

    let first = harness.service.stop(id).await.expect("stops");
    harness.clock.advance(Duration::minutes(1));
    let second = harness.service.stop(id).await.expect("stops again");

    assert_eq!(first.phase, DeploymentPhase::Stopped);
    assert_eq!(second.stopped_on, first.stopped_on);

    let stored = events.recv().await.expect("stop event");
    assert!(matches!(stored.event, DeploymentEvent::Stopped(_)));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    let result = harness
        .service
        .register_device(id, role("Phone"), DeviceRegistration::new("phone"))
        .await;
    assert!(result
        .as_ref()
        .is_err_and(|e| e.as_deployment_error().is_some_and(|e| e.is_illegal_state())));
}

#[tokio::test]
async fn unknown_deployment_is_not_found() {
    let harness = harness();
    let id = DeploymentId::new();

    let result = harness.service.status(id).await;
    assert!(matches!(result, Err(ServiceError::NotFound(missing)) if missing == id));

    let result = harness.service.stop(id).await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn list_returns_created_deployments() {
    let harness = harness();
    let a = create(&harness).await;
    let b = create(&harness).await;

    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(harness.service.list().await.expect("lists"), expected);
}

#[tokio::test]
async fn concurrent_registrations_are_serialised() {
    let harness = Arc::new(harness());
    let id = create(&harness).await;

    let phone = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .service
                .register_device(id, role("Phone"), DeviceRegistration::new("phone"))
                .await
        })
    };
    let monitor = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .service
                .register_device(id, role("Monitor"), DeviceRegistration::new("monitor"))
                .await
        })
    };
    phone.await.expect("task joins").expect("registers");
    monitor.await.expect("task joins").expect("registers");

    let status = harness.service.status(id).await.expect("stored");
    assert!(status.remaining_devices_to_register().is_empty());
}

#[tokio::test]
async fn repository_conflict_surfaces_as_repository_error() {
    let harness = harness();
    let id = create(&harness).await;
    let snapshot = harness
        .service
        .repository()
        .get(id)
        .await
        .expect("readable")
        .expect("stored");

    let result = harness.service.repository().add(snapshot).await;
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));
}

/// Shared store where another writer registers "Monitor" right before the first update lands.
struct InterleavedRepository {
    inner: InMemoryDeploymentRepository,
    clock: Arc<ManualClock>,
    interfered: AtomicBool,
}

#[async_trait::async_trait]
impl DeploymentRepository for InterleavedRepository {
    async fn add(&self, snapshot: StudyDeploymentSnapshot) -> RepositoryResult<()> {
        self.inner.add(snapshot).await
    }

    async fn get(&self, id: DeploymentId) -> RepositoryResult<Option<StudyDeploymentSnapshot>> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        expected: &StudyDeploymentSnapshot,
        snapshot: StudyDeploymentSnapshot,
    ) -> RepositoryResult<()> {
        if !self.interfered.swap(true, Ordering::SeqCst) {
            let mut other = StudyDeployment::from_snapshot(expected.clone(), self.clock.clone())
                .expect("valid snapshot");
            other
                .register_device(&role("Monitor"), DeviceRegistration::new("monitor"))
                .expect("registers");
            self.inner
                .update(expected, other.snapshot())
                .await
                .expect("other writer stores first");
        }
        self.inner.update(expected, snapshot).await
    }

    async fn remove(&self, id: DeploymentId) -> RepositoryResult<()> {
        self.inner.remove(id).await
    }

    async fn list_ids(&self) -> RepositoryResult<Vec<DeploymentId>> {
        self.inner.list_ids().await
    }
}

#[tokio::test]
async fn concurrent_writer_update_is_kept() {
    let clock = Arc::new(ManualClock::new(
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
    ));
    let repository = Arc::new(InterleavedRepository {
        inner: InMemoryDeploymentRepository::new(),
        clock: clock.clone(),
        interfered: AtomicBool::new(false),
    });
    let service = DeploymentService::new(Arc::clone(&repository), clock);
    let id = service
        .create_deployment(protocol(), &[])
        .await
        .expect("created")
        .deployment_id;
    let mut events = service.subscribe();

    let status = service
        .register_device(id, role("Phone"), DeviceRegistration::new("phone"))
        .await
        .expect("registers after retry");

    assert!(status.remaining_devices_to_register().is_empty());
    let stored = repository.get(id).await.expect("readable").expect("stored");
    assert!(stored.registered_devices.contains_key(&role("Phone")));
    assert!(stored.registered_devices.contains_key(&role("Monitor")));

    let published = events.recv().await.expect("published");
    assert_eq!(published.event.device(), Some(&role("Phone")));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}
