//! # Rollout Core
//!
//! Study deployment lifecycle: rolling a study protocol out onto the devices of a
//! group of participants.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` / `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Layout
//!
//! - [`protocol`] - the immutable protocol a deployment is created from
//! - [`invitation`] - participants and the devices they are invited to use
//! - [`domain`] - the [`StudyDeployment`] aggregate, its status and events
//! - [`application`] - repository boundary and the hosting [`DeploymentService`]
//! - [`config`] - layered configuration
//! - [`clock`] - injectable time source
//!
//! ## Error Handling
//!
//! Every domain failure is a [`DeploymentError`], classified by
//! [`DeploymentError::kind`] into invalid-argument or illegal-state.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod application;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod invitation;
mod macros;
pub mod protocol;

pub use application::{DeploymentService, InMemoryDeploymentRepository, ServiceError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    DeploymentEvent, DeploymentId, DeploymentPhase, DeviceState, MasterDeviceDeployment,
    StudyDeployment, StudyDeploymentSnapshot, StudyDeploymentStatus,
};
pub use error::{DeploymentError, ErrorKind, Result};

#[doc(hidden)]
pub mod __private {
    pub use tracing;
}
