use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{ListParams, PostParams},
    Api, Client,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    dogu::Dogu,
    registry::{ConfigWatcher, LocalDoguFetcher},
    resource::requirements::RequirementsGenerator,
    Error, Result,
};

/// Keeps the resource requirements of every installed dogu in sync with its configuration.
///
/// A sync runs whenever the global trigger key changes.
pub struct RequirementsUpdater {
    client: Client,
    namespace: String,
    trigger_key: String,
    fetcher: Arc<dyn LocalDoguFetcher>,
    requirements: RequirementsGenerator,
    watcher: Arc<dyn ConfigWatcher>,
}

impl RequirementsUpdater {
    /// Create an updater for the dogus of the namespace.
    pub fn new(
        client: Client,
        namespace: &str,
        trigger_key: &str,
        fetcher: Arc<dyn LocalDoguFetcher>,
        requirements: RequirementsGenerator,
        watcher: Arc<dyn ConfigWatcher>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.to_owned(),
            trigger_key: trigger_key.to_owned(),
            fetcher,
            requirements,
            watcher,
        }
    }

    /// Watch the trigger key and sync on every change until the watch ends or the token is
    /// cancelled. Failed syncs are logged and do not end the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut changes = self.watcher.watch(&self.trigger_key).await?;
        info!(key = %self.trigger_key, "watching for requirement changes");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("requirements updater cancelled");
                    return Ok(());
                }
                change = changes.next() => match change {
                    None => {
                        info!("requirements watch ended");
                        return Ok(());
                    }
                    Some(Err(err)) => warn!(%err, "requirements watch failed"),
                    Some(Ok(())) => {
                        if let Err(err) = self.sync().await {
                            error!(%err, "failed to sync dogu requirements");
                        }
                    }
                },
            }
        }
    }

    /// Regenerate the requirements of every dogu in the namespace. A failing dogu does not
    /// stop the others, all failures are reported together.
    pub async fn sync(&self) -> Result<()> {
        let dogus: Api<Dogu> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut errors = Vec::new();
        for dogu in dogus.list(&ListParams::default()).await? {
            let name = dogu.simple_name();
            if let Err(err) = self.sync_dogu(&name).await {
                warn!(dogu = %name, %err, "failed to update requirements");
                errors.push(err);
            }
        }
        Error::join(errors)
    }

    async fn sync_dogu(&self, name: &str) -> Result<()> {
        let descriptor = self.fetcher.fetch_installed(name).await?;
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut deployment = deployments.get(name).await?;
        let resources = self.requirements.generate(&descriptor).await?;
        if let Some(container) = deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
            .and_then(|pod| pod.containers.first_mut())
        {
            container.resources = Some(resources);
        }
        deployments
            .replace(name, &PostParams::default(), &deployment)
            .await?;
        debug!(dogu = %name, "updated requirements");
        Ok(())
    }
}
