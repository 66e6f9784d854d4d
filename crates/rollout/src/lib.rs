//! Rollout - study deployment device rollout manager
//!
//! Command line front end over [`rollout_core::DeploymentService`], storing one JSON
//! snapshot per deployment in the configured data directory.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod store;

pub use store::JsonFileRepository;
