use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use rollout_flags::config::Config;
use rollout_flags::server::serve;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutdown signal received, draining requests");
}

fn otel_tracer(config: &Config, sink_url: &str) -> Tracer {
    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
        config.otel_sampling_rate,
    )));
    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        Value::from(config.otel_service_name.clone()),
    )]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(sink_url)
                .with_timeout(Duration::from_secs(config.otel_export_timeout_secs)),
        )
        .install_batch(runtime::Tokio)
        .expect("failed to start the OTLP exporter")
}

/// Flag decisions and rollout transitions are logged as JSON lines unless
/// DEBUG is set; spans also go to OTLP when OTEL_URL is configured.
fn init_tracing(config: &Config) {
    let stdout = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);
    let stdout = if *config.debug {
        stdout
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_ansi(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        stdout
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };

    let otel = config.otel_url.as_deref().map(|url| {
        OpenTelemetryLayer::new(otel_tracer(config, url))
            .with_filter(LevelFilter::from_level(config.otel_log_level))
    });

    tracing_subscriber::registry().with(stdout).with(otel).init();
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("invalid rollout-flags configuration");
    init_tracing(&config);

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("could not bind the flag service address");
    tracing::info!(address = %config.address, "rollout-flags listening");
    serve(config, listener, shutdown()).await;
    tracing::info!("rollout-flags stopped");
}
