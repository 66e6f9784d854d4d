//! Device deployment composer.
//!
//! Assembles everything a master device needs to run its part of the study: its own
//! registration, the registrations of the devices relayed through it, and the tasks,
//! triggers and task controls scoped to that subtree. Composition is read-only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::{graph::DeviceGraph, ledger::RegistrationLedger};
use crate::{
    error::{DeploymentError, Result},
    invariant,
    protocol::{
        DeviceConnection, DeviceDescriptor, DeviceRegistration, RoleName, StudyProtocolSnapshot,
        TaskControl, TaskDescriptor, Trigger, TriggerId,
    },
};

/// The deployable unit for one master device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterDeviceDeployment {
    pub device: DeviceDescriptor,
    pub registration: DeviceRegistration,
    /// Devices relayed through `device`, registered or not
    pub connected_devices: Vec<DeviceDescriptor>,
    pub connections: Vec<DeviceConnection>,
    /// Registrations of connected devices; unregistered optional devices are absent
    pub connected_device_registrations: BTreeMap<RoleName, DeviceRegistration>,
    pub tasks: Vec<TaskDescriptor>,
    pub triggers: BTreeMap<TriggerId, Trigger>,
    pub task_controls: Vec<TaskControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_data: Option<String>,
    /// Freshness token, the latest registration change of the master or its subtree
    pub last_updated_on: DateTime<Utc>,
}

/// Check that a deployment can be composed for `master`.
///
/// # Errors
///
/// - `UnknownDevice` if `master` is not part of the protocol
/// - `NotDeployable` if `master` is not a deployable master, is not registered, or one
///   of its required connected devices is not registered
pub fn check_composable(
    graph: &DeviceGraph,
    ledger: &RegistrationLedger,
    master: &RoleName,
) -> Result<()> {
    invariant!(
        graph.contains(master),
        DeploymentError::UnknownDevice(master.clone())
    );
    invariant!(
        graph.can_be_deployed(master),
        DeploymentError::not_deployable(master, "only master devices which are not connected to another device can be deployed")
    );
    invariant!(
        ledger.is_registered(master),
        DeploymentError::not_deployable(master, "device is not registered")
    );

    let missing = graph
        .connected_devices_of(master)
        .into_iter()
        .filter(|role| !ledger.is_registered(role))
        .filter(|role| graph.device(role).is_some_and(|d| !d.is_optional))
        .collect_vec();
    invariant!(
        missing.is_empty(),
        DeploymentError::not_deployable(
            master,
            format!(
                "required connected devices are not registered: {}",
                missing.iter().join(", ")
            )
        )
    );

    Ok(())
}

/// The current freshness token for `master`, if it is registered.
///
/// The latest registration change of the master or any device in its subtree, so
/// unregistering a device also outdates every unit composed before.
#[must_use]
pub fn freshness_token(
    graph: &DeviceGraph,
    ledger: &RegistrationLedger,
    master: &RoleName,
) -> Option<DateTime<Utc>> {
    let own = ledger.registration(master)?.registered_on;
    let own = ledger.changed_on(master).map_or(own, |changed| changed.max(own));
    let connected = graph
        .connected_devices_of(master)
        .into_iter()
        .filter_map(|role| ledger.changed_on(&role));
    Some(connected.fold(own, DateTime::max))
}

/// Compose the deployment for `master`.
///
/// # Errors
///
/// Fails as [`check_composable`] does.
pub fn compose(
    protocol: &StudyProtocolSnapshot,
    graph: &DeviceGraph,
    ledger: &RegistrationLedger,
    master: &RoleName,
) -> Result<MasterDeviceDeployment> {
    check_composable(graph, ledger, master)?;

    let (device, entry) = graph
        .device(master)
        .zip(ledger.registration(master))
        .ok_or_else(|| DeploymentError::not_deployable(master, "device is not registered"))?;
    let last_updated_on = freshness_token(graph, ledger, master)
        .ok_or_else(|| DeploymentError::not_deployable(master, "device is not registered"))?;

    let subtree = graph.connected_devices_of(master);
    let mut scope: BTreeSet<&RoleName> = subtree.iter().collect();
    scope.insert(master);

    let connected_devices = subtree
        .iter()
        .filter_map(|role| graph.device(role).cloned())
        .collect();
    let connections = protocol
        .connections
        .iter()
        .filter(|c| subtree.contains(&c.role_name))
        .cloned()
        .collect();
    let connected_device_registrations = subtree
        .iter()
        .filter_map(|role| {
            ledger
                .registration(role)
                .map(|e| (role.clone(), e.registration.clone()))
        })
        .collect();

    let triggers: BTreeMap<TriggerId, Trigger> = protocol
        .triggers
        .iter()
        .filter(|(_, t)| scope.contains(&t.source_device_role_name))
        .map(|(id, t)| (*id, t.clone()))
        .collect();
    let task_controls: Vec<TaskControl> = protocol
        .task_controls
        .iter()
        .filter(|c| triggers.contains_key(&c.trigger_id))
        .cloned()
        .collect();
    let task_names: BTreeSet<&str> = protocol
        .task_controls
        .iter()
        .filter(|c| scope.contains(&c.destination_device_role_name))
        .map(|c| c.task_name.as_str())
        .collect();
    let tasks = protocol
        .tasks
        .iter()
        .filter(|t| task_names.contains(t.name.as_str()))
        .cloned()
        .collect();

    Ok(MasterDeviceDeployment {
        device: device.clone(),
        registration: entry.registration.clone(),
        connected_devices,
        connections,
        connected_device_registrations,
        tasks,
        triggers,
        task_controls,
        application_data: protocol.application_data.clone(),
        last_updated_on,
    })
}
