//! Dogu is the k8s custom resource describing one installed dogu, plus the descriptor the
//! dogu ships with.

// Export all spec types
mod descriptor;
mod spec;
pub use descriptor::*;
pub use spec::*;

#[cfg(test)]
#[cfg(feature = "controller")]
pub mod stub;
