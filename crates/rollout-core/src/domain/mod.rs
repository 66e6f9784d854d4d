//! # Domain Layer
//!
//! The study deployment aggregate and everything it is built from.
//!
//! ## Module Structure
//!
//! - [`graph`] - [`DeviceGraph`], which devices can be deployed and what they relay
//! - [`ledger`] - [`RegistrationLedger`], current registrations and their history
//! - [`composer`] - [`MasterDeviceDeployment`], the deployable unit of a master device
//! - [`deployment`] - [`StudyDeployment`], the aggregate root
//! - [`status`] - [`StudyDeploymentStatus`], the read-only projection
//! - [`snapshot`] - [`StudyDeploymentSnapshot`], the persisted form
//! - [`events`] - [`DeploymentEvent`], drained by the application layer
//!
//! Data flows one way: protocol, then graph (fixed at creation), then ledger
//! (changed by commands), then composer and status (computed on demand).
//!
//! Nothing in this module performs I/O or reads the system clock directly.

pub mod composer;
pub mod deployment;
pub mod events;
pub mod graph;
pub mod ledger;
pub mod snapshot;
pub mod status;

pub use composer::MasterDeviceDeployment;
pub use deployment::{DeploymentId, ExpectedDataStream, StudyDeployment};
pub use events::{DeploymentEvent, EventMetadata, StoredEvent};
pub use graph::DeviceGraph;
pub use ledger::RegistrationLedger;
pub use snapshot::StudyDeploymentSnapshot;
pub use status::{DeploymentPhase, DeviceDeploymentStatus, DeviceState, StudyDeploymentStatus};
