//! What the controller knows about the federation: workers and data models

pub mod data_model;
pub mod data_model_registry;
pub mod discovery;
pub mod node_registry;

pub use data_model::{CommonDataElement, DataModelMetadata};
pub use data_model_registry::{DataModelRegistry, NodeDataModel};
pub use discovery::AddressSource;
pub use node_registry::{NodeRegistry, RegistrySnapshot, RegistryState};
