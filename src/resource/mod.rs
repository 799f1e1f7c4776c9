//! Stack resource model and classification
//!
//! - [`types`] - Resource descriptors and the classified target groups
//! - [`classifier`] - Turns a stack's raw resource list into typed targets

pub mod classifier;
pub mod types;

pub use classifier::{parse_service_arn, Classifier, ClusterMembership};
pub use types::{ClassifiedResources, EcsServiceRef, ResourceDescriptor, ResourceType};
