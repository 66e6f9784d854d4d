//! Error types for rollout-core
//!
//! Every domain failure is a [`DeploymentError`]. Variants are specific so callers
//! can match on them, but each one belongs to exactly one [`ErrorKind`]:
//!
//! - **Invalid argument** - caller-supplied data violates a structural precondition.
//!   Safe to retry with corrected input.
//! - **Illegal state** - the operation is not allowed in the deployment's current
//!   lifecycle phase. Re-read the status before retrying.
//!
//! No operation that returns an error has mutated the deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{RegistrationKind, RoleName};

/// Recoverability class of a [`DeploymentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-supplied data is invalid.
    InvalidArgument,
    /// The operation is disallowed in the current lifecycle phase.
    IllegalState,
}

/// Core error type for deployment operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeploymentError {
    /// The protocol definition is structurally inconsistent.
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    /// A participant invitation refers to something the protocol does not contain.
    #[error("invalid invitation: {0}")]
    InvalidInvitation(String),

    /// A snapshot does not describe a consistent deployment.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A value failed validation on construction.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },

    /// The device is not part of this deployment.
    #[error("device '{0}' is not part of this deployment")]
    UnknownDevice(RoleName),

    /// The device already holds a registration.
    #[error("device '{0}' is already registered")]
    AlreadyRegistered(RoleName),

    /// The device holds no registration to remove.
    #[error("device '{0}' is not registered")]
    NotRegistered(RoleName),

    /// The registration shape does not match what the device expects.
    #[error("device '{role}' expects a {expected} registration, got {actual}")]
    RegistrationMismatch {
        role: RoleName,
        expected: RegistrationKind,
        actual: RegistrationKind,
    },

    /// Another device of the same type is already registered with this device id.
    #[error("device id '{device_id}' is already in use by '{registered_to}'")]
    DeviceIdInUse {
        device_id: String,
        registered_to: RoleName,
    },

    /// The acknowledged deployment is older than the current one.
    #[error("deployment for '{role}' is outdated: acknowledged {acknowledged}, current {current}")]
    StaleDeployment {
        role: RoleName,
        acknowledged: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// A deployment cannot currently be obtained for the device.
    #[error("cannot deploy '{role}': {reason}")]
    NotDeployable { role: RoleName, reason: String },

    /// The deployment has been stopped; no further modifications are accepted.
    #[error("deployment has been stopped")]
    Stopped,
}

impl DeploymentError {
    /// Recoverability class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProtocol(_)
            | Self::InvalidInvitation(_)
            | Self::InvalidSnapshot(_)
            | Self::InvalidValue { .. }
            | Self::UnknownDevice(_)
            | Self::AlreadyRegistered(_)
            | Self::NotRegistered(_)
            | Self::RegistrationMismatch { .. }
            | Self::DeviceIdInUse { .. }
            | Self::StaleDeployment { .. } => ErrorKind::InvalidArgument,
            Self::NotDeployable { .. } | Self::Stopped => ErrorKind::IllegalState,
        }
    }

    /// Whether the caller supplied invalid data.
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidArgument)
    }

    /// Whether the operation was disallowed by the lifecycle phase.
    #[must_use]
    pub const fn is_illegal_state(&self) -> bool {
        matches!(self.kind(), ErrorKind::IllegalState)
    }

    pub(crate) fn not_deployable(role: &RoleName, reason: impl Into<String>) -> Self {
        Self::NotDeployable {
            role: role.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for rollout-core operations
pub type Result<T> = std::result::Result<T, DeploymentError>;
