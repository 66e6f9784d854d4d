//! Device descriptors as declared by a study protocol.

use serde::{Deserialize, Serialize};

use super::{RegistrationKind, RoleName};

/// Whether a device can run a study runtime on its own.
///
/// Master devices execute a local deployment; connected devices are relayed
/// through the master they are connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    Master,
    Connected,
}

/// Concrete device-descriptor type.
///
/// Known types declare which registration shape they accept. A `Custom` type was
/// not recognised at runtime; registrations for it cannot be verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceType {
    Smartphone,
    AltBeacon,
    HeartRateMonitor,
    Generic,
    Custom { class_name: String },
}

impl DeviceType {
    /// Registration shape this type accepts, or `None` when it cannot be determined.
    #[must_use]
    pub const fn expected_registration(&self) -> Option<RegistrationKind> {
        match self {
            Self::Smartphone | Self::Generic => Some(RegistrationKind::Default),
            Self::AltBeacon => Some(RegistrationKind::AltBeacon),
            Self::HeartRateMonitor => Some(RegistrationKind::MacAddress),
            Self::Custom { .. } => None,
        }
    }

    /// Whether the concrete type is unknown at runtime.
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }
}

/// A device participating in a protocol, identified by its role name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique role of the device within the protocol
    pub role_name: RoleName,
    /// Concrete descriptor type
    pub device_type: DeviceType,
    /// Master or connected
    pub kind: DeviceKind,
    /// Optional devices do not need to be registered for a deployment to run
    #[serde(default)]
    pub is_optional: bool,
}

impl DeviceDescriptor {
    /// A required master device.
    #[must_use]
    pub const fn master(role_name: RoleName, device_type: DeviceType) -> Self {
        Self {
            role_name,
            device_type,
            kind: DeviceKind::Master,
            is_optional: false,
        }
    }

    /// A required connected device.
    #[must_use]
    pub const fn connected(role_name: RoleName, device_type: DeviceType) -> Self {
        Self {
            role_name,
            device_type,
            kind: DeviceKind::Connected,
            is_optional: false,
        }
    }

    /// Mark the device as optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    #[must_use]
    pub const fn is_master(&self) -> bool {
        matches!(self.kind, DeviceKind::Master)
    }
}

/// Declares that `role_name` is relayed through the master `connected_to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConnection {
    pub role_name: RoleName,
    pub connected_to: RoleName,
}

impl DeviceConnection {
    #[must_use]
    pub const fn new(role_name: RoleName, connected_to: RoleName) -> Self {
        Self {
            role_name,
            connected_to,
        }
    }
}
