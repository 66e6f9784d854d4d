//! Device registrations submitted by clients.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeploymentError;

/// Shape of a registration payload, used to check it against a device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegistrationKind {
    Default,
    AltBeacon,
    MacAddress,
}

/// Device-type specific registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationDetails {
    /// No details beyond the device id.
    Default,
    /// Identification of an AltBeacon advertisement.
    AltBeacon {
        manufacturer_id: u16,
        organization_id: Uuid,
        major_id: u16,
        minor_id: u16,
        reference_rssi: i16,
    },
    /// A Bluetooth device identified by hardware address.
    MacAddress { address: MacAddress },
}

impl RegistrationDetails {
    #[must_use]
    pub const fn kind(&self) -> RegistrationKind {
        match self {
            Self::Default => RegistrationKind::Default,
            Self::AltBeacon { .. } => RegistrationKind::AltBeacon,
            Self::MacAddress { .. } => RegistrationKind::MacAddress,
        }
    }
}

/// Proof that a client controls a physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Externally supplied identifier of the physical device
    pub device_id: String,
    /// Type-specific payload
    pub details: RegistrationDetails,
}

impl DeviceRegistration {
    /// A registration carrying only a device id.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            details: RegistrationDetails::Default,
        }
    }

    #[must_use]
    pub fn with_details(device_id: impl Into<String>, details: RegistrationDetails) -> Self {
        Self {
            device_id: device_id.into(),
            details,
        }
    }

    /// A registration identifying a device by its MAC address, which doubles as device id.
    #[must_use]
    pub fn for_mac_address(address: MacAddress) -> Self {
        Self {
            device_id: address.as_str().to_string(),
            details: RegistrationDetails::MacAddress { address },
        }
    }

    #[must_use]
    pub const fn kind(&self) -> RegistrationKind {
        self.details.kind()
    }
}

/// A registration as stored, stamped with the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationEntry {
    pub registration: DeviceRegistration,
    pub registered_on: DateTime<Utc>,
}

// ============================================================================
// MAC ADDRESS
// ============================================================================

/// Validated hardware address, normalised to `AA-BB-CC-DD-EE-FF`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse a MAC address written with `-` or `:` separators, in any case.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentError::InvalidValue` when the input is not six hex octets
    /// joined by a single kind of separator.
    pub fn parse(s: &str) -> Result<Self, DeploymentError> {
        let invalid = |reason: &str| DeploymentError::InvalidValue {
            field: "mac address",
            reason: format!("'{s}' {reason}"),
        };

        let separator = if s.contains('-') { '-' } else { ':' };
        let octets: Vec<&str> = s.split(separator).collect();
        if octets.len() != 6 {
            return Err(invalid("must consist of six octets separated by '-' or ':'"));
        }
        if !octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(invalid("contains an invalid octet"));
        }

        Ok(Self(octets.join("-").to_ascii_uppercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = DeploymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = DeploymentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
