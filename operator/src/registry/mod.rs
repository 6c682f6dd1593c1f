//! Collaborators the resource core consumes. Implementations outside of tests live either in
//! [`configmap`] (cluster backed) or in the surrounding controller.
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::dogu::{DevelopmentDoguMap, Dogu, DoguDescriptor, ImageConfig};

pub mod configmap;

pub use configmap::{ConfigMapConfigStore, GlobalConfigWatcher, KubeDoguFetcher};

/// Per dogu key value configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Read a key of the dogu's configuration. Returns `Ok(None)` when the key does not exist.
    async fn get(&self, dogu: &str, key: &str) -> Result<Option<String>>;
}

/// Source of descriptors of installed dogus.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocalDoguFetcher: Send + Sync {
    /// Fetch the descriptor of the installed dogu with the given simple name.
    async fn fetch_installed(&self, name: &str) -> Result<DoguDescriptor>;
}

/// Source of the descriptor a dogu resource asks for.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceDoguFetcher: Send + Sync {
    /// Fetch the descriptor for the resource, along with the development override it came from.
    async fn fetch_with_resource(
        &self,
        dogu: &Dogu,
    ) -> Result<(DoguDescriptor, Option<DevelopmentDoguMap>)>;
}

/// Container image registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Pull the configuration of an image reference such as `registry/official/ldap:1.2.3`.
    async fn pull_image_config(&self, image: &str) -> Result<ImageConfig>;
}

/// Registers raw TCP/UDP port forwarding for dogus at the ingress layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TcpUdpExposer: Send + Sync {
    /// Register or update the exposed ports of the dogu.
    async fn expose_or_update_dogu_services(
        &self,
        namespace: &str,
        dogu: &DoguDescriptor,
    ) -> Result<()>;
    /// Remove the exposed ports of the dogu.
    async fn delete_dogu_services(&self, namespace: &str, dogu: &DoguDescriptor) -> Result<()>;
}

/// Notifies about changes of a global configuration key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigWatcher: Send + Sync {
    /// Stream one item per change of the key. The stream ends when the watch ends.
    async fn watch(&self, key: &str) -> Result<BoxStream<'static, Result<()>>>;
}
