//! Provides the resource synthesis and reconciliation core of the dogu operator.
#![warn(missing_docs)]

/// Operator configuration shared by binaries and generators.
#[cfg(feature = "controller")]
pub mod config;
/// Dogu custom resource and descriptor types.
pub mod dogu;
/// Errors produced while generating or reconciling resources.
#[cfg(feature = "controller")]
pub mod error;
/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// Collaborators consumed by the core: config store, descriptor source, image registry, exposer.
#[cfg(feature = "controller")]
pub mod registry;
/// Resource generation and reconciliation.
#[cfg(feature = "controller")]
pub mod resource;
/// Utils module for shared utility functions.
#[cfg(feature = "controller")]
pub mod utils;

#[cfg(feature = "controller")]
pub use error::{Error, Result};

/// Name the operator uses to identify itself, e.g. as a volume or service account client.
pub const CONTROLLER_NAME: &str = "k8s-dogu-operator";
