//! Read-only status projection of a study deployment.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deployment::{DeploymentId, StudyDeployment};
use crate::{
    invitation::ParticipantStatus,
    protocol::{DeviceDescriptor, RoleName},
};

/// Lifecycle phase of a deployment, in increasing order of precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeploymentPhase {
    /// No device has been registered yet
    Invited,
    /// Devices are being registered or (re)deployed
    DeployingDevices,
    /// Enough master devices run their deployment
    Running,
    /// Terminal
    Stopped,
}

/// Deployment state of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeviceState {
    Unregistered,
    Registered { can_obtain_deployment: bool },
    Deployed,
    NeedsRedeployment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDeploymentStatus {
    pub device: DeviceDescriptor,
    /// False for connected devices and chained masters, whatever their state
    pub can_be_deployed: bool,
    #[serde(flatten)]
    pub state: DeviceState,
}

/// Client-facing summary of a study deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyDeploymentStatus {
    pub deployment_id: DeploymentId,
    pub created_on: DateTime<Utc>,
    pub phase: DeploymentPhase,
    pub devices: Vec<DeviceDeploymentStatus>,
    pub participants: Vec<ParticipantStatus>,
    pub remaining_to_register: BTreeSet<RoleName>,
    pub ready_to_deploy: BTreeSet<RoleName>,
    pub started_on: Option<DateTime<Utc>>,
    pub stopped_on: Option<DateTime<Utc>>,
}

impl StudyDeploymentStatus {
    /// Status of `device`, if it is part of the deployment.
    #[must_use]
    pub fn device_status(&self, device: &RoleName) -> Option<&DeviceDeploymentStatus> {
        self.devices.iter().find(|s| &s.device.role_name == device)
    }

    /// Devices which still need to be registered.
    #[must_use]
    pub const fn remaining_devices_to_register(&self) -> &BTreeSet<RoleName> {
        &self.remaining_to_register
    }

    /// Master devices for which a deployment can be obtained and confirmed now.
    #[must_use]
    pub const fn remaining_devices_ready_to_deploy(&self) -> &BTreeSet<RoleName> {
        &self.ready_to_deploy
    }
}

impl StudyDeployment {
    /// Project the current state into a [`StudyDeploymentStatus`].
    #[must_use]
    pub fn status(&self) -> StudyDeploymentStatus {
        let ready_to_deploy = self.remaining_devices_ready_to_deploy();

        let devices: Vec<DeviceDeploymentStatus> = self
            .registrable_devices()
            .map(|device| {
                let role = &device.role_name;
                let state = if self.deployed_devices().contains(role) {
                    DeviceState::Deployed
                } else if self.invalidated_devices().contains(role) {
                    DeviceState::NeedsRedeployment
                } else if self.ledger().is_registered(role) {
                    DeviceState::Registered {
                        can_obtain_deployment: ready_to_deploy.contains(role),
                    }
                } else {
                    DeviceState::Unregistered
                };
                DeviceDeploymentStatus {
                    device: device.clone(),
                    can_be_deployed: self.graph().can_be_deployed(role),
                    state,
                }
            })
            .collect();

        let needs_redeployment = devices
            .iter()
            .any(|s| s.state == DeviceState::NeedsRedeployment);
        let phase = if self.is_stopped() {
            DeploymentPhase::Stopped
        } else if self.minimum_deployed() && !needs_redeployment {
            DeploymentPhase::Running
        } else if !self.registered_devices().is_empty() || needs_redeployment {
            DeploymentPhase::DeployingDevices
        } else {
            DeploymentPhase::Invited
        };

        StudyDeploymentStatus {
            deployment_id: self.id(),
            created_on: self.created_on(),
            phase,
            devices,
            participants: self.participants().to_vec(),
            remaining_to_register: self.remaining_devices_to_register(),
            ready_to_deploy,
            started_on: self.started_on(),
            stopped_on: self.stopped_on(),
        }
    }
}
