//! The study deployment aggregate.
//!
//! A [`StudyDeployment`] tracks one group of participants rolling a protocol out onto
//! their devices. It owns the [`DeviceGraph`], the [`RegistrationLedger`] and the
//! deployed/invalidated sets, and is the only place where these change.
//!
//! Two construction paths share one internal representation:
//!
//! - [`StudyDeployment::from_invitations`] starts a new deployment.
//! - [`StudyDeployment::from_snapshot`] restores a stored one without emitting events.
//!
//! All commands are synchronous and leave the aggregate untouched when they fail.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    composer::{self, MasterDeviceDeployment},
    events::DeploymentEvent,
    graph::DeviceGraph,
    ledger::RegistrationLedger,
};
use crate::{
    clock::Clock,
    error::{DeploymentError, Result},
    invariant,
    invitation::{ParticipantInvitation, ParticipantStatus},
    protocol::{
        Control, DataType, DeviceDescriptor, DeviceRegistration, Measure, RegistrationEntry,
        RoleName, StudyProtocolSnapshot,
    },
};

// ============================================================================
// DEPLOYMENT ID
// ============================================================================

/// Unique identifier of a study deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(Uuid);

impl DeploymentId {
    /// Generate a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeploymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeploymentId {
    type Err = DeploymentError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DeploymentError::InvalidValue {
                field: "deployment id",
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// DATA STREAMS
// ============================================================================

/// A data stream a device is expected to upload once the deployment runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpectedDataStream {
    pub device_role_name: RoleName,
    pub data_type: DataType,
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Mutable state shared by both construction paths.
#[derive(Debug, Clone)]
pub(super) struct RawState {
    pub id: DeploymentId,
    pub created_on: DateTime<Utc>,
    pub protocol: StudyProtocolSnapshot,
    pub participants: Vec<ParticipantStatus>,
    pub ledger: RegistrationLedger,
    pub deployed: BTreeSet<RoleName>,
    pub invalidated: BTreeSet<RoleName>,
    pub started_on: Option<DateTime<Utc>>,
    pub stopped_on: Option<DateTime<Utc>>,
}

/// The deployment of one protocol to one group of participants' devices.
#[derive(Debug, Clone)]
pub struct StudyDeployment {
    id: DeploymentId,
    created_on: DateTime<Utc>,
    protocol: StudyProtocolSnapshot,
    graph: DeviceGraph,
    participants: Vec<ParticipantStatus>,
    ledger: RegistrationLedger,
    deployed: BTreeSet<RoleName>,
    invalidated: BTreeSet<RoleName>,
    started_on: Option<DateTime<Utc>>,
    stopped_on: Option<DateTime<Utc>>,
    events: Vec<DeploymentEvent>,
    clock: Arc<dyn Clock>,
}

impl StudyDeployment {
    /// Start a new deployment of `protocol` for the invited participants.
    ///
    /// # Errors
    ///
    /// - `InvalidProtocol` if the protocol is structurally inconsistent
    /// - `InvalidInvitation` if an invitation assigns a device the protocol does not contain
    pub fn from_invitations(
        protocol: StudyProtocolSnapshot,
        invitations: &[ParticipantInvitation],
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        protocol.validate()?;

        for invitation in invitations {
            for role in &invitation.assigned_role_names {
                invariant!(
                    protocol.device(role).is_some(),
                    DeploymentError::InvalidInvitation(format!(
                        "participant {} is assigned to '{role}', which is not part of the protocol",
                        invitation.participant_id
                    ))
                );
            }
        }

        let raw = RawState {
            id: DeploymentId::new(),
            created_on: clock.now(),
            protocol,
            participants: invitations.iter().map(ParticipantStatus::from).collect(),
            ledger: RegistrationLedger::new(),
            deployed: BTreeSet::new(),
            invalidated: BTreeSet::new(),
            started_on: None,
            stopped_on: None,
        };
        let deployment = Self::from_raw(raw, clock);
        info!(deployment_id = %deployment.id, protocol = %deployment.protocol.name, "Created study deployment");
        Ok(deployment)
    }

    /// The single constructor behind both creation paths. Never emits events.
    pub(super) fn from_raw(raw: RawState, clock: Arc<dyn Clock>) -> Self {
        let graph = DeviceGraph::from_protocol(&raw.protocol);
        Self {
            id: raw.id,
            created_on: raw.created_on,
            protocol: raw.protocol,
            graph,
            participants: raw.participants,
            ledger: raw.ledger,
            deployed: raw.deployed,
            invalidated: raw.invalidated,
            started_on: raw.started_on,
            stopped_on: raw.stopped_on,
            events: Vec::new(),
            clock,
        }
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Register `registration` for `device`.
    ///
    /// A new registration never invalidates deployments which were already confirmed.
    ///
    /// # Errors
    ///
    /// - `Stopped` once the deployment is stopped
    /// - any registration failure of [`RegistrationLedger::register`]
    pub fn register_device(
        &mut self,
        device: &RoleName,
        registration: DeviceRegistration,
    ) -> Result<()> {
        invariant!(!self.is_stopped(), DeploymentError::Stopped);

        let written = self.ledger.register(
            &self.graph,
            device,
            registration.clone(),
            self.clock.now(),
        )?;
        self.events.push(DeploymentEvent::device_registered(
            device.clone(),
            registration,
            written,
        ));

        debug!(deployment_id = %self.id, device = %device, "Registered device");
        Ok(())
    }

    /// Remove the registration of `device`, invalidating the deployed master which
    /// relies on it.
    ///
    /// # Errors
    ///
    /// - `Stopped` once the deployment is stopped
    /// - `UnknownDevice` / `NotRegistered` from [`RegistrationLedger::unregister`]
    pub fn unregister_device(&mut self, device: &RoleName) -> Result<()> {
        invariant!(!self.is_stopped(), DeploymentError::Stopped);

        let now = self.ledger.unregister(&self.graph, device, self.clock.now())?;
        self.events
            .push(DeploymentEvent::device_unregistered(device.clone(), now));
        debug!(deployment_id = %self.id, device = %device, "Unregistered device");

        if let Some(root) = self.graph.deployment_root(device) {
            if self.deployed.remove(root) {
                self.invalidated.insert(root.clone());
                self.events
                    .push(DeploymentEvent::deployment_invalidated(root.clone(), now));
                info!(deployment_id = %self.id, device = %root, cause = %device, "Invalidated device deployment");
            }
        }

        Ok(())
    }

    /// Compose the deployment `device` needs to run. Read-only.
    ///
    /// Available after the deployment has stopped so clients can still inspect it.
    ///
    /// # Errors
    ///
    /// - `UnknownDevice` if the device is not part of the protocol
    /// - `NotDeployable` if no deployment can be composed for the device yet
    pub fn device_deployment_for(&self, device: &RoleName) -> Result<MasterDeviceDeployment> {
        composer::compose(&self.protocol, &self.graph, &self.ledger, device)
    }

    /// Confirm that `device` runs the deployment stamped `last_updated_on`.
    ///
    /// Confirming an already confirmed deployment again is a no-op.
    ///
    /// # Errors
    ///
    /// - `UnknownDevice` if the device is not part of the protocol
    /// - `Stopped` once the deployment is stopped
    /// - `NotDeployable` if no deployment can be composed for the device
    /// - `StaleDeployment` if `last_updated_on` is not the current freshness token
    pub fn device_deployed(
        &mut self,
        device: &RoleName,
        last_updated_on: DateTime<Utc>,
    ) -> Result<()> {
        invariant!(
            self.graph.contains(device),
            DeploymentError::UnknownDevice(device.clone())
        );
        invariant!(!self.is_stopped(), DeploymentError::Stopped);
        composer::check_composable(&self.graph, &self.ledger, device)?;

        let current = composer::freshness_token(&self.graph, &self.ledger, device)
            .ok_or_else(|| DeploymentError::not_deployable(device, "device is not registered"))?;
        invariant!(
            current == last_updated_on,
            DeploymentError::StaleDeployment {
                role: device.clone(),
                acknowledged: last_updated_on,
                current,
            },
            "rejected stale deployment of {device} in {}",
            self.id
        );

        if self.deployed.contains(device) {
            return Ok(());
        }

        let now = self.clock.now();
        self.deployed.insert(device.clone());
        self.invalidated.remove(device);
        self.events.push(DeploymentEvent::device_deployed(
            device.clone(),
            last_updated_on,
            now,
        ));
        debug!(deployment_id = %self.id, device = %device, "Device deployed");

        if self.started_on.is_none() && self.minimum_deployed() {
            self.started_on = Some(now);
            self.events.push(DeploymentEvent::started(now));
            info!(deployment_id = %self.id, "Study deployment started");
        }

        Ok(())
    }

    /// Stop the deployment. Only the first call has an effect.
    pub fn stop(&mut self) {
        if self.stopped_on.is_some() {
            return;
        }

        let now = self.clock.now();
        self.stopped_on = Some(now);
        self.events.push(DeploymentEvent::stopped(now));
        info!(deployment_id = %self.id, "Study deployment stopped");
    }

    /// Drain the events recorded since the last call.
    pub fn consume_events(&mut self) -> Vec<DeploymentEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    #[must_use]
    pub const fn id(&self) -> DeploymentId {
        self.id
    }

    #[must_use]
    pub const fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    #[must_use]
    pub const fn protocol(&self) -> &StudyProtocolSnapshot {
        &self.protocol
    }

    #[must_use]
    pub fn participants(&self) -> &[ParticipantStatus] {
        &self.participants
    }

    /// Every device of the protocol, ordered by role name.
    pub fn registrable_devices(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.graph.devices()
    }

    #[must_use]
    pub const fn registered_devices(&self) -> &BTreeMap<RoleName, RegistrationEntry> {
        self.ledger.registered()
    }

    #[must_use]
    pub const fn registration_history(&self) -> &BTreeMap<RoleName, Vec<RegistrationEntry>> {
        self.ledger.history()
    }

    #[must_use]
    pub const fn deployed_devices(&self) -> &BTreeSet<RoleName> {
        &self.deployed
    }

    #[must_use]
    pub const fn invalidated_devices(&self) -> &BTreeSet<RoleName> {
        &self.invalidated
    }

    #[must_use]
    pub const fn started_on(&self) -> Option<DateTime<Utc>> {
        self.started_on
    }

    #[must_use]
    pub const fn stopped_on(&self) -> Option<DateTime<Utc>> {
        self.stopped_on
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped_on.is_some()
    }

    /// Events recorded but not yet consumed.
    #[must_use]
    pub fn pending_events(&self) -> &[DeploymentEvent] {
        &self.events
    }

    /// Whether `device` is a master which can be deployed on its own.
    #[must_use]
    pub fn can_be_deployed(&self, device: &RoleName) -> bool {
        self.graph.can_be_deployed(device)
    }

    /// Registrable devices which hold no registration.
    #[must_use]
    pub fn remaining_devices_to_register(&self) -> BTreeSet<RoleName> {
        self.graph
            .devices()
            .map(|d| &d.role_name)
            .filter(|role| !self.ledger.is_registered(role))
            .cloned()
            .collect()
    }

    /// Deployable masters which are not deployed but for which a deployment can be
    /// composed right now.
    #[must_use]
    pub fn remaining_devices_ready_to_deploy(&self) -> BTreeSet<RoleName> {
        self.graph
            .deployable_masters()
            .filter(|role| !self.deployed.contains(*role))
            .filter(|role| composer::check_composable(&self.graph, &self.ledger, role).is_ok())
            .cloned()
            .collect()
    }

    /// Whether enough master devices are deployed for the study to run.
    ///
    /// All required masters must be deployed. When every master is optional, one
    /// deployed master suffices.
    #[must_use]
    pub fn minimum_deployed(&self) -> bool {
        let mut required = self
            .graph
            .deployable_masters()
            .filter(|role| self.graph.requires_deployment(role))
            .peekable();

        if required.peek().is_some() {
            required.all(|role| self.deployed.contains(role))
        } else {
            self.graph
                .deployable_masters()
                .any(|role| self.deployed.contains(role))
        }
    }

    /// Data streams the devices of this deployment are expected to upload.
    ///
    /// Each task control makes its destination device collect the task's data
    /// streams and a completed-task stream, and its trigger's source device record
    /// a triggered-task stream.
    #[must_use]
    pub fn required_data_streams(&self) -> BTreeSet<ExpectedDataStream> {
        let mut streams = BTreeSet::new();
        for control in &self.protocol.task_controls {
            let destination = &control.destination_device_role_name;

            if let Some(task) = self.protocol.task(&control.task_name) {
                for measure in &task.measures {
                    if let Measure::DataStream { data_type } = measure {
                        streams.insert(ExpectedDataStream {
                            device_role_name: destination.clone(),
                            data_type: data_type.clone(),
                        });
                    }
                }
            }
            if control.control == Control::Start {
                streams.insert(ExpectedDataStream {
                    device_role_name: destination.clone(),
                    data_type: DataType::completed_task(),
                });
            }
            if let Some(trigger) = self.protocol.triggers.get(&control.trigger_id) {
                streams.insert(ExpectedDataStream {
                    device_role_name: trigger.source_device_role_name.clone(),
                    data_type: DataType::triggered_task(),
                });
            }
        }
        streams
    }

    pub(super) const fn graph(&self) -> &DeviceGraph {
        &self.graph
    }

    pub(super) const fn ledger(&self) -> &RegistrationLedger {
        &self.ledger
    }
}
