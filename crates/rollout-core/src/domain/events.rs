//! Deployment events
//!
//! Every state change accepted by a [`StudyDeployment`](super::StudyDeployment) is
//! recorded as a [`DeploymentEvent`] in the aggregate's pending buffer. The hosting
//! application drains the buffer with `consume_events` and routes the events onward,
//! wrapping them in [`StoredEvent`] envelopes once they are persisted.
//!
//! # Design Principles
//!
//! - **Immutable**: Events cannot be modified after creation
//! - **Serializable**: All events can be serialized for persistence and transmission
//! - **Timestamped**: All events include when they occurred

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{DeviceRegistration, RoleName};

// ============================================================================
// Deployment Event Enum
// ============================================================================

/// Something that happened to a study deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data")]
pub enum DeploymentEvent {
    /// A device registration was accepted
    DeviceRegistered(Box<DeviceRegisteredEvent>),

    /// A device registration was removed
    DeviceUnregistered(Box<DeviceUnregisteredEvent>),

    /// A master device confirmed it runs its deployment
    DeviceDeployed(Box<DeviceDeployedEvent>),

    /// A deployed master device has to obtain its deployment again
    DeploymentInvalidated(Box<DeploymentInvalidatedEvent>),

    /// All required master devices were deployed for the first time
    Started(Box<LifecycleEvent>),

    /// The deployment was stopped
    Stopped(Box<LifecycleEvent>),
}

impl DeploymentEvent {
    /// Get the timestamp for when this event occurred
    #[must_use]
    pub const fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::DeviceRegistered(e) => &e.timestamp,
            Self::DeviceUnregistered(e) => &e.timestamp,
            Self::DeviceDeployed(e) => &e.timestamp,
            Self::DeploymentInvalidated(e) => &e.timestamp,
            Self::Started(e) | Self::Stopped(e) => &e.timestamp,
        }
    }

    /// Get the event type as a string
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::DeviceRegistered(_) => "device_registered",
            Self::DeviceUnregistered(_) => "device_unregistered",
            Self::DeviceDeployed(_) => "device_deployed",
            Self::DeploymentInvalidated(_) => "deployment_invalidated",
            Self::Started(_) => "started",
            Self::Stopped(_) => "stopped",
        }
    }

    /// The device the event concerns, if any
    #[must_use]
    pub fn device(&self) -> Option<&RoleName> {
        match self {
            Self::DeviceRegistered(e) => Some(&e.device),
            Self::DeviceUnregistered(e) => Some(&e.device),
            Self::DeviceDeployed(e) => Some(&e.device),
            Self::DeploymentInvalidated(e) => Some(&e.device),
            Self::Started(_) | Self::Stopped(_) => None,
        }
    }

    #[must_use]
    pub fn device_registered(
        device: RoleName,
        registration: DeviceRegistration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::DeviceRegistered(Box::new(DeviceRegisteredEvent {
            device,
            registration,
            timestamp,
        }))
    }

    #[must_use]
    pub fn device_unregistered(device: RoleName, timestamp: DateTime<Utc>) -> Self {
        Self::DeviceUnregistered(Box::new(DeviceUnregisteredEvent { device, timestamp }))
    }

    #[must_use]
    pub fn device_deployed(
        device: RoleName,
        last_updated_on: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::DeviceDeployed(Box::new(DeviceDeployedEvent {
            device,
            last_updated_on,
            timestamp,
        }))
    }

    #[must_use]
    pub fn deployment_invalidated(device: RoleName, timestamp: DateTime<Utc>) -> Self {
        Self::DeploymentInvalidated(Box::new(DeploymentInvalidatedEvent { device, timestamp }))
    }

    #[must_use]
    pub fn started(timestamp: DateTime<Utc>) -> Self {
        Self::Started(Box::new(LifecycleEvent { timestamp }))
    }

    #[must_use]
    pub fn stopped(timestamp: DateTime<Utc>) -> Self {
        Self::Stopped(Box::new(LifecycleEvent { timestamp }))
    }
}

// ============================================================================
// Event Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegisteredEvent {
    pub device: RoleName,
    pub registration: DeviceRegistration,
    /// Write timestamp of the registration
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUnregisteredEvent {
    pub device: RoleName,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDeployedEvent {
    pub device: RoleName,
    /// Freshness token the device acknowledged
    pub last_updated_on: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInvalidatedEvent {
    pub device: RoleName,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Event Metadata
// ============================================================================

/// Metadata for an event once it has been persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Stream identifier, the deployment id
    pub stream_id: String,
    /// Position of the event within its stream, starting at 1
    pub stream_version: u64,
    /// When the event was stored
    pub stored_at: DateTime<Utc>,
}

/// A stored event with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event: DeploymentEvent,
    pub metadata: EventMetadata,
}

impl StoredEvent {
    #[must_use]
    pub const fn new(event: DeploymentEvent, metadata: EventMetadata) -> Self {
        Self { event, metadata }
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.metadata.stream_id
    }

    #[must_use]
    pub const fn stream_version(&self) -> u64 {
        self.metadata.stream_version
    }
}

// ============================================================================
// Event Serialization
// ============================================================================

/// Serialize an event to JSON
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn serialize_event(event: &DeploymentEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Deserialize an event from JSON
///
/// # Errors
///
/// Returns an error if deserialization fails
pub fn deserialize_event(json: &str) -> Result<DeploymentEvent, serde_json::Error> {
    serde_json::from_str(json)
}

// ============================================================================
// Tests
// ============================================================================
