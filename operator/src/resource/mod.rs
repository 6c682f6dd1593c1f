//! Turns dogu descriptors into Kubernetes resources and reconciles them with the cluster.
pub mod annotation;
pub mod exposed_ports;
pub mod generator;
pub mod netpol;
pub mod owner;
pub mod pod_template;
pub mod requirements;
pub mod requirements_updater;
pub mod security;
pub mod upserter;
pub mod volumes;

pub use exposed_ports::DoguExposedPortHandler;
pub use generator::ResourceGenerator;
pub use owner::{ControllerOwnerReference, OwnerAttacher};
pub use requirements::RequirementsGenerator;
pub use requirements_updater::RequirementsUpdater;
pub use upserter::Upserter;
