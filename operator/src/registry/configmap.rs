//! Collaborators backed by config maps in the operator namespace.
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use futures::{future, stream::BoxStream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use tracing::debug;

use crate::dogu::{DevelopmentDoguMap, Dogu, DoguDescriptor};
use crate::registry::{ConfigWatcher, ConfigurationStore, LocalDoguFetcher, ResourceDoguFetcher};

/// Key of the descriptor inside descriptor config maps.
pub const DESCRIPTOR_KEY: &str = "dogu.json";

/// Reads dogu configuration from the `<dogu>-config` config map.
pub struct ConfigMapConfigStore {
    config_maps: Api<ConfigMap>,
}

impl ConfigMapConfigStore {
    /// Create a store reading config maps in the namespace.
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            config_maps: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ConfigurationStore for ConfigMapConfigStore {
    async fn get(&self, dogu: &str, key: &str) -> Result<Option<String>> {
        let config = self.config_maps.get_opt(&format!("{dogu}-config")).await?;
        Ok(config
            .and_then(|config| config.data)
            .and_then(|mut data| data.remove(key)))
    }
}

/// Fetches descriptors from `dogu-spec-<dogu>` config maps, or from a `<dogu>-descriptor`
/// development config map when one exists.
pub struct KubeDoguFetcher {
    config_maps: Api<ConfigMap>,
}

impl KubeDoguFetcher {
    /// Create a fetcher reading config maps in the namespace.
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            config_maps: Api::namespaced(client, namespace),
        }
    }
}

fn parse_descriptor(config: &ConfigMap, name: &str) -> Result<DoguDescriptor> {
    let raw = config
        .data
        .as_ref()
        .and_then(|data| data.get(DESCRIPTOR_KEY))
        .ok_or_else(|| anyhow!("config map {name} does not contain key {DESCRIPTOR_KEY}"))?;
    serde_json::from_str(raw).with_context(|| format!("failed to parse descriptor in {name}"))
}

#[async_trait]
impl LocalDoguFetcher for KubeDoguFetcher {
    async fn fetch_installed(&self, name: &str) -> Result<DoguDescriptor> {
        let config_name = format!("dogu-spec-{name}");
        let config = self
            .config_maps
            .get_opt(&config_name)
            .await?
            .ok_or_else(|| anyhow!("dogu {name} is not installed: {config_name} not found"))?;
        parse_descriptor(&config, &config_name)
    }
}

#[async_trait]
impl ResourceDoguFetcher for KubeDoguFetcher {
    async fn fetch_with_resource(
        &self,
        dogu: &Dogu,
    ) -> Result<(DoguDescriptor, Option<DevelopmentDoguMap>)> {
        let name = dogu.simple_name();
        let development_name = format!("{name}-descriptor");
        if let Some(config) = self.config_maps.get_opt(&development_name).await? {
            debug!(dogu = %name, "using development descriptor");
            let descriptor = parse_descriptor(&config, &development_name)?;
            return Ok((descriptor, Some(config.data.unwrap_or_default())));
        }
        Ok((self.fetch_installed(&name).await?, None))
    }
}

/// Watches a key of the global configuration config map.
pub struct GlobalConfigWatcher {
    config_maps: Api<ConfigMap>,
    config_map: String,
}

impl GlobalConfigWatcher {
    /// Create a watcher for the named config map in the namespace.
    pub fn new(client: Client, namespace: &str, config_map: &str) -> Self {
        Self {
            config_maps: Api::namespaced(client, namespace),
            config_map: config_map.to_owned(),
        }
    }
}

/// Records the current value of the key and reports whether it differs from the last one.
///
/// The first observation only records the value.
fn value_changed(last: &mut Option<Option<String>>, current: Option<String>) -> bool {
    let changed = matches!(last, Some(previous) if *previous != current);
    *last = Some(current);
    changed
}

#[async_trait]
impl ConfigWatcher for GlobalConfigWatcher {
    async fn watch(&self, key: &str) -> Result<BoxStream<'static, Result<()>>> {
        let config =
            watcher::Config::default().fields(&format!("metadata.name={}", self.config_map));
        let key = key.to_owned();
        let mut last = None;
        let changes = watcher(self.config_maps.clone(), config)
            .default_backoff()
            .applied_objects()
            .map_err(anyhow::Error::from)
            .try_filter_map(move |config: ConfigMap| {
                let current = config.data.and_then(|mut data| data.remove(&key));
                future::ready(Ok(value_changed(&mut last, current).then_some(())))
            });
        Ok(changes.boxed())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::*;
    use crate::utils::test::{mock_client, timeout_after_1s};
    use kube::core::ObjectMeta;

    fn config_map(name: &str, data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            data: Some(BTreeMap::from_iter(
                data.iter().map(|(k, v)| (k.to_string(), v.to_string())),
            )),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failing_watch_backs_off() {
        let (client, mut server) = mock_client();
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = requests.clone();
        let mocksrv = tokio::spawn(async move {
            loop {
                server.respond_conflict().await;
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        let watcher = GlobalConfigWatcher::new(client, "ecosystem", "global-config");
        let mut changes = watcher.watch("trigger").await.unwrap();
        let drained = tokio::time::timeout(Duration::from_millis(500), async {
            while changes.next().await.is_some() {}
        })
        .await;
        mocksrv.abort();
        assert!(drained.is_err(), "watch should keep retrying");
        let requests = requests.load(Ordering::SeqCst);
        assert!(requests < 10, "{requests} list requests in 500ms");
    }

    #[test]
    fn first_value_is_not_a_change() {
        let mut last = None;
        assert!(!value_changed(&mut last, Some("1".to_owned())));
        assert!(!value_changed(&mut last, Some("1".to_owned())));
        assert!(value_changed(&mut last, Some("2".to_owned())));
        assert!(value_changed(&mut last, None));
        assert!(!value_changed(&mut last, None));
    }

    #[tokio::test]
    async fn config_store_reads_key() {
        let (client, mut server) = mock_client();
        let mocksrv = tokio::spawn(async move {
            let request = server
                .respond_with(&config_map(
                    "ldap-config",
                    &[("container_config/memory_limit", "1g")],
                ))
                .await;
            request.assert("GET", "/api/v1/namespaces/ecosystem/configmaps/ldap-config");
        });
        let store = ConfigMapConfigStore::new(client, "ecosystem");
        let value = store
            .get("ldap", "container_config/memory_limit")
            .await
            .expect("get should succeed");
        assert_eq!(value.as_deref(), Some("1g"));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn config_store_missing_map_is_not_found() {
        let (client, mut server) = mock_client();
        let mocksrv = tokio::spawn(async move {
            server.respond_not_found().await;
        });
        let store = ConfigMapConfigStore::new(client, "ecosystem");
        let value = store
            .get("ldap", "container_config/memory_limit")
            .await
            .expect("missing config should not fail");
        assert_eq!(value, None);
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn fetcher_prefers_development_descriptor() {
        let (client, mut server) = mock_client();
        let descriptor = r#"{"Name": "official/ldap", "Version": "1.2.4-dev"}"#;
        let mocksrv = tokio::spawn(async move {
            let request = server
                .respond_with(&config_map("ldap-descriptor", &[(DESCRIPTOR_KEY, descriptor)]))
                .await;
            request.assert(
                "GET",
                "/api/v1/namespaces/ecosystem/configmaps/ldap-descriptor",
            );
        });
        let fetcher = KubeDoguFetcher::new(client, "ecosystem");
        let (fetched, development) = fetcher
            .fetch_with_resource(&Dogu::test())
            .await
            .expect("fetch should succeed");
        assert_eq!(fetched.version, "1.2.4-dev");
        assert!(development.is_some());
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn fetcher_falls_back_to_installed_descriptor() {
        let (client, mut server) = mock_client();
        let descriptor = r#"{"Name": "official/ldap", "Version": "1.2.3"}"#;
        let mocksrv = tokio::spawn(async move {
            server.respond_not_found().await;
            let request = server
                .respond_with(&config_map("dogu-spec-ldap", &[(DESCRIPTOR_KEY, descriptor)]))
                .await;
            request.assert(
                "GET",
                "/api/v1/namespaces/ecosystem/configmaps/dogu-spec-ldap",
            );
        });
        let fetcher = KubeDoguFetcher::new(client, "ecosystem");
        let (fetched, development) = fetcher
            .fetch_with_resource(&Dogu::test())
            .await
            .expect("fetch should succeed");
        assert_eq!(fetched.version, "1.2.3");
        assert!(development.is_none());
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn fetcher_reports_missing_descriptor() {
        let (client, mut server) = mock_client();
        let mocksrv = tokio::spawn(async move {
            server.respond_not_found().await;
        });
        let fetcher = KubeDoguFetcher::new(client, "ecosystem");
        let err = fetcher
            .fetch_installed("ldap")
            .await
            .expect_err("missing descriptor should fail");
        assert!(err.to_string().contains("dogu ldap is not installed"));
        timeout_after_1s(mocksrv).await;
    }
}
