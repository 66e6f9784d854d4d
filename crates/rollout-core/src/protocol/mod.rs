//! # Protocol definition
//!
//! The immutable study protocol a deployment is created from: devices and how they
//! connect, tasks, triggers and the task controls tying them together.
//!
//! Protocol *authoring* happens elsewhere. A deployment receives a
//! [`StudyProtocolSnapshot`] and only checks it for structural consistency through
//! [`StudyProtocolSnapshot::validate`] before deriving anything from it.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::DeploymentError, invariant};

mod devices;
mod registration;
mod tasks;

pub use devices::{DeviceConnection, DeviceDescriptor, DeviceKind, DeviceType};
pub use registration::{
    DeviceRegistration, MacAddress, RegistrationDetails, RegistrationEntry, RegistrationKind,
};
pub use tasks::{
    Control, DataType, Measure, TaskControl, TaskDescriptor, Trigger, TriggerCondition, TriggerId,
};

// ============================================================================
// ROLE NAME
// ============================================================================

/// Maximum allowed length for a role name.
const MAX_ROLE_NAME_LENGTH: usize = 128;

/// Validated device role name.
///
/// Role names identify devices within a protocol, e.g. `"Participant's phone"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    /// Parse and validate a role name.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::InvalidValue` if the name is blank, has surrounding
    /// whitespace, or exceeds the maximum length.
    pub fn parse(s: impl Into<String>) -> Result<Self, DeploymentError> {
        let s = s.into();
        let invalid = |reason: String| DeploymentError::InvalidValue {
            field: "role name",
            reason,
        };

        if s.trim().is_empty() {
            return Err(invalid("must not be empty".to_string()));
        }
        if s.trim() != s {
            return Err(invalid(format!("'{s}' has leading or trailing whitespace")));
        }
        if s.chars().count() > MAX_ROLE_NAME_LENGTH {
            return Err(invalid(format!(
                "exceeds {MAX_ROLE_NAME_LENGTH} characters"
            )));
        }

        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoleName {
    type Error = DeploymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

// ============================================================================
// PROTOCOL SNAPSHOT
// ============================================================================

/// An immutable, already-authored study protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyProtocolSnapshot {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_on: DateTime<Utc>,
    pub devices: Vec<DeviceDescriptor>,
    #[serde(default)]
    pub connections: Vec<DeviceConnection>,
    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
    #[serde(default)]
    pub triggers: BTreeMap<TriggerId, Trigger>,
    #[serde(default)]
    pub task_controls: Vec<TaskControl>,
    /// Opaque data forwarded to every device deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_data: Option<String>,
}

impl StudyProtocolSnapshot {
    /// An empty protocol. Add devices before creating a deployment from it.
    #[must_use]
    pub fn new(name: impl Into<String>, created_on: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_on,
            devices: Vec::new(),
            connections: Vec::new(),
            tasks: Vec::new(),
            triggers: BTreeMap::new(),
            task_controls: Vec::new(),
            application_data: None,
        }
    }

    /// Add a master device which is not connected to any other device.
    pub fn add_master_device(&mut self, device: DeviceDescriptor) {
        self.devices.push(device);
    }

    /// Add `device` as relayed through `master`.
    pub fn add_connected_device(&mut self, device: DeviceDescriptor, master: &RoleName) {
        self.connections
            .push(DeviceConnection::new(device.role_name.clone(), master.clone()));
        self.devices.push(device);
    }

    /// Add a trigger and return the id it was stored under, one past the highest id in use.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::InvalidProtocol` if the highest id in use is `u32::MAX`.
    pub fn add_trigger(&mut self, trigger: Trigger) -> Result<TriggerId, DeploymentError> {
        let id = match self.triggers.keys().next_back() {
            None => TriggerId(0),
            Some(last) => last.0.checked_add(1).map(TriggerId).ok_or_else(|| {
                DeploymentError::InvalidProtocol(format!("no trigger id left after {last}"))
            })?,
        };
        self.triggers.insert(id, trigger);
        Ok(id)
    }

    /// Add a task control, registering its task if it was not known yet.
    pub fn add_task_control(&mut self, control: TaskControl, task: TaskDescriptor) {
        if !self.tasks.iter().any(|t| t.name == task.name) {
            self.tasks.push(task);
        }
        self.task_controls.push(control);
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Look up a device by role name.
    #[must_use]
    pub fn device(&self, role: &RoleName) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| &d.role_name == role)
    }

    /// The master `role` is connected to, if any.
    #[must_use]
    pub fn connected_to(&self, role: &RoleName) -> Option<&RoleName> {
        self.connections
            .iter()
            .find(|c| &c.role_name == role)
            .map(|c| &c.connected_to)
    }

    #[must_use]
    pub fn task(&self, name: &str) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| t.name == name)
    }

    // ========================================================================
    // VALIDATION
    // ========================================================================

    /// Check that the protocol is structurally consistent.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::InvalidProtocol` when role or task names repeat,
    /// a reference dangles, connections are malformed or cyclic, or the protocol
    /// has no master device that can be deployed on its own.
    pub fn validate(&self) -> Result<(), DeploymentError> {
        let devices: HashMap<&RoleName, &DeviceDescriptor> =
            self.devices.iter().map(|d| (&d.role_name, d)).collect();
        invariant!(
            devices.len() == self.devices.len(),
            DeploymentError::InvalidProtocol("device role names must be unique".to_string())
        );

        let mut connected = HashSet::new();
        for connection in &self.connections {
            let parent = devices.get(&connection.connected_to).ok_or_else(|| {
                DeploymentError::InvalidProtocol(format!(
                    "'{}' is connected to unknown device '{}'",
                    connection.role_name, connection.connected_to
                ))
            })?;
            invariant!(
                devices.contains_key(&connection.role_name),
                DeploymentError::InvalidProtocol(format!(
                    "connection declared for unknown device '{}'",
                    connection.role_name
                ))
            );
            invariant!(
                parent.is_master(),
                DeploymentError::InvalidProtocol(format!(
                    "'{}' can only be connected to a master device, '{}' is not one",
                    connection.role_name, connection.connected_to
                ))
            );
            invariant!(
                connected.insert(&connection.role_name),
                DeploymentError::InvalidProtocol(format!(
                    "'{}' is connected to more than one device",
                    connection.role_name
                ))
            );
        }

        for device in &self.devices {
            invariant!(
                device.is_master() || connected.contains(&device.role_name),
                DeploymentError::InvalidProtocol(format!(
                    "connected device '{}' is not connected to a master device",
                    device.role_name
                ))
            );
            self.check_acyclic(&device.role_name)?;
        }

        invariant!(
            self.devices
                .iter()
                .any(|d| d.is_master() && !connected.contains(&d.role_name)),
            DeploymentError::InvalidProtocol(
                "protocol contains no master device which can be deployed".to_string()
            )
        );

        self.validate_tasks(&devices)
    }

    fn check_acyclic(&self, start: &RoleName) -> Result<(), DeploymentError> {
        let mut current = start;
        for _ in 0..=self.devices.len() {
            match self.connected_to(current) {
                Some(parent) if parent == start => break,
                Some(parent) => current = parent,
                None => return Ok(()),
            }
        }
        Err(DeploymentError::InvalidProtocol(format!(
            "connections of '{start}' form a cycle"
        )))
    }

    fn validate_tasks(
        &self,
        devices: &HashMap<&RoleName, &DeviceDescriptor>,
    ) -> Result<(), DeploymentError> {
        let task_names: HashSet<&str> = self.tasks.iter().map(|t| t.name.as_str()).collect();
        invariant!(
            task_names.len() == self.tasks.len(),
            DeploymentError::InvalidProtocol("task names must be unique".to_string())
        );

        for (id, trigger) in &self.triggers {
            invariant!(
                devices.contains_key(&trigger.source_device_role_name),
                DeploymentError::InvalidProtocol(format!(
                    "trigger {id} has unknown source device '{}'",
                    trigger.source_device_role_name
                ))
            );
        }

        for control in &self.task_controls {
            invariant!(
                self.triggers.contains_key(&control.trigger_id),
                DeploymentError::InvalidProtocol(format!(
                    "task control refers to unknown trigger {}",
                    control.trigger_id
                ))
            );
            invariant!(
                task_names.contains(control.task_name.as_str()),
                DeploymentError::InvalidProtocol(format!(
                    "task control refers to unknown task '{}'",
                    control.task_name
                ))
            );
            invariant!(
                devices.contains_key(&control.destination_device_role_name),
                DeploymentError::InvalidProtocol(format!(
                    "task control targets unknown device '{}'",
                    control.destination_device_role_name
                ))
            );
        }

        Ok(())
    }
}
