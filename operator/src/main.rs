//! Runs the dogu operator components that act on their own, currently the resource
//! requirements updater.
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dogu_common::telemetry;
use dogu_operator::{
    config::OperatorConfig,
    registry::{ConfigMapConfigStore, GlobalConfigWatcher, KubeDoguFetcher},
    resource::{RequirementsGenerator, RequirementsUpdater},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    telemetry::init(args.config.otlp_endpoint.clone())?;
    info!(namespace = %args.config.namespace, stage = ?args.config.stage, "starting dogu operator");

    let client = Client::try_default().await?;
    let namespace = &args.config.namespace;
    let store = Arc::new(ConfigMapConfigStore::new(client.clone(), namespace));
    let fetcher = Arc::new(KubeDoguFetcher::new(client.clone(), namespace));
    let watcher = Arc::new(GlobalConfigWatcher::new(
        client.clone(),
        namespace,
        &args.config.global_config_map,
    ));
    let updater = RequirementsUpdater::new(
        client,
        namespace,
        &args.config.requirements_trigger_key,
        fetcher,
        RequirementsGenerator::new(store),
        watcher,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for shutdown signal");
        }
        on_signal.cancel();
    });

    let result = updater.run(cancel).await;
    // Flush traces before shutdown
    telemetry::shutdown();
    Ok(result?)
}
