//! Application layer hosting study deployments.
//!
//! - [`repository`] - persistence boundary and an in-memory implementation
//! - [`service`] - [`DeploymentService`], which serialises commands per deployment
//!   and publishes their events

pub mod repository;
pub mod service;

pub use repository::{
    DeploymentRepository, InMemoryDeploymentRepository, RepositoryError, RepositoryResult,
};
pub use service::{DeploymentService, ServiceError, ServiceResult};
