// fedx - federated table engine
// Core library

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod smpc;
pub mod tables;
pub mod worker;

pub use error::{ErrorEnvelope, FederationError, FederationResult};
