//! Provides helper functions for initializing telemetry collection and publication.
use anyhow::Result;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace, Resource};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Registry};

const SERVICE_NAME: &str = "dogu-operator";

/// Initialize logging and, when an OTLP endpoint is given, trace export.
pub fn init(otlp_endpoint: Option<String>) -> Result<()> {
    // Default to INFO if no env is specified
    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;
    let logger = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .compact()
        .with_filter(log_filter);

    let telemetry = match otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    trace::config()
                        .with_resource(Resource::new(vec![KeyValue::new(
                            "service.name",
                            SERVICE_NAME,
                        )])),
                )
                .install_batch(runtime::Tokio)?;
            let otlp_filter = EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?;
            Some(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(otlp_filter),
            )
        }
        None => None,
    };

    let collector = Registry::default().with(telemetry).with(logger);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

/// Flush any pending spans before the process exits.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
