//! Flat, event-free representation of a study deployment.
//!
//! A snapshot holds everything needed to restore a [`StudyDeployment`] exactly,
//! without replaying its history. Restoring validates the snapshot first, since it
//! usually comes from storage the aggregate does not control.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    deployment::{DeploymentId, RawState, StudyDeployment},
    graph::DeviceGraph,
    ledger::RegistrationLedger,
};
use crate::{
    clock::Clock,
    error::{DeploymentError, Result},
    invitation::ParticipantStatus,
    protocol::{RegistrationEntry, RoleName, StudyProtocolSnapshot},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyDeploymentSnapshot {
    pub id: DeploymentId,
    pub created_on: DateTime<Utc>,
    pub protocol: StudyProtocolSnapshot,
    #[serde(default)]
    pub participants: Vec<ParticipantStatus>,
    pub registrable_devices: BTreeSet<RoleName>,
    #[serde(default)]
    pub registered_devices: BTreeMap<RoleName, RegistrationEntry>,
    #[serde(default)]
    pub registration_history: BTreeMap<RoleName, Vec<RegistrationEntry>>,
    /// Latest registration or unregistration stamp per device
    #[serde(default)]
    pub registration_changes: BTreeMap<RoleName, DateTime<Utc>>,
    #[serde(default)]
    pub deployed_devices: BTreeSet<RoleName>,
    #[serde(default)]
    pub invalidated_devices: BTreeSet<RoleName>,
    pub started_on: Option<DateTime<Utc>>,
    pub stopped_on: Option<DateTime<Utc>>,
    pub is_stopped: bool,
}

impl StudyDeployment {
    /// Capture the current state. Pending events are not part of a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StudyDeploymentSnapshot {
        StudyDeploymentSnapshot {
            id: self.id(),
            created_on: self.created_on(),
            protocol: self.protocol().clone(),
            participants: self.participants().to_vec(),
            registrable_devices: self
                .registrable_devices()
                .map(|d| d.role_name.clone())
                .collect(),
            registered_devices: self.registered_devices().clone(),
            registration_history: self.registration_history().clone(),
            registration_changes: self.ledger().changes().clone(),
            deployed_devices: self.deployed_devices().clone(),
            invalidated_devices: self.invalidated_devices().clone(),
            started_on: self.started_on(),
            stopped_on: self.stopped_on(),
            is_stopped: self.is_stopped(),
        }
    }

    /// Restore a deployment from a snapshot without emitting any events.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::InvalidSnapshot` if the snapshot does not describe a
    /// consistent deployment.
    pub fn from_snapshot(snapshot: StudyDeploymentSnapshot, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Err(e) = check(&snapshot) {
            warn!(deployment_id = %snapshot.id, error = %e, "Rejected deployment snapshot");
            return Err(e);
        }

        let ledger = RegistrationLedger::from_parts(
            snapshot.registered_devices,
            snapshot.registration_history,
            snapshot.registration_changes,
        );
        let raw = RawState {
            id: snapshot.id,
            created_on: snapshot.created_on,
            protocol: snapshot.protocol,
            participants: snapshot.participants,
            ledger,
            deployed: snapshot.deployed_devices,
            invalidated: snapshot.invalidated_devices,
            started_on: snapshot.started_on,
            stopped_on: snapshot.stopped_on,
        };
        Ok(Self::from_raw(raw, clock))
    }
}

fn check(snapshot: &StudyDeploymentSnapshot) -> Result<()> {
    let invalid = |reason: String| Err(DeploymentError::InvalidSnapshot(reason));

    if let Err(e) = snapshot.protocol.validate() {
        return invalid(e.to_string());
    }
    let graph = DeviceGraph::from_protocol(&snapshot.protocol);

    let registrable: BTreeSet<RoleName> = graph.devices().map(|d| d.role_name.clone()).collect();
    if registrable != snapshot.registrable_devices {
        return invalid("registrable devices do not match the protocol".to_string());
    }

    let known_roles = snapshot
        .registered_devices
        .keys()
        .chain(snapshot.registration_history.keys())
        .chain(snapshot.registration_changes.keys())
        .chain(&snapshot.deployed_devices)
        .chain(&snapshot.invalidated_devices)
        .chain(snapshot.participants.iter().flat_map(|p| &p.assigned_role_names));
    for role in known_roles {
        if !graph.contains(role) {
            return invalid(format!("'{role}' is not part of the protocol"));
        }
    }

    for (role, entry) in &snapshot.registered_devices {
        let last = snapshot
            .registration_history
            .get(role)
            .and_then(|history| history.last());
        if last != Some(entry) {
            return invalid(format!(
                "registration of '{role}' is not the latest in its history"
            ));
        }
        if snapshot
            .registration_changes
            .get(role)
            .is_some_and(|changed| *changed != entry.registered_on)
        {
            return invalid(format!(
                "registration of '{role}' is not its latest change"
            ));
        }
    }

    for role in &snapshot.deployed_devices {
        if !snapshot.registered_devices.contains_key(role) {
            return invalid(format!("deployed device '{role}' is not registered"));
        }
        if snapshot.invalidated_devices.contains(role) {
            return invalid(format!("'{role}' is both deployed and invalidated"));
        }
    }
    for role in snapshot.deployed_devices.iter().chain(&snapshot.invalidated_devices) {
        if !graph.can_be_deployed(role) {
            return invalid(format!("'{role}' cannot be deployed"));
        }
    }

    if snapshot.is_stopped != snapshot.stopped_on.is_some() {
        return invalid("stop flag and stop time disagree".to_string());
    }

    Ok(())
}
