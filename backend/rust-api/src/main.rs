use anyhow::Context;
use opentelemetry::trace::TracerProvider as _;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizbot_api::{
    config::Config,
    create_router,
    services::{maintenance_worker::MaintenanceWorker, question_source, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OpenTelemetry tracer (spans are exported over OTLP/HTTP)
    let provider = init_telemetry()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizbot_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("quizbot-api")))
        .init();

    tracing::info!("Starting quizbot API");

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let (catalog, rejected) = question_source::load_catalog(&config.quiz.questions_dir)
        .context("Failed to load question catalog")?;
    if catalog.is_empty() {
        tracing::warn!(
            "No questions loaded from {}",
            config.quiz.questions_dir.display()
        );
    }
    for record in &rejected {
        tracing::debug!("Rejected {}: {}", record.record_id, record.reason);
    }

    let backend = AppState::connect_backend(&config).await?;
    let bind_addr = config.server.bind_addr.clone();
    let app_state = Arc::new(AppState::new(config, catalog, backend));

    // Background workers stop when the shutdown flag flips
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flusher = tokio::spawn(app_state.store.clone().run_flusher(shutdown_rx.clone()));
    let worker = MaintenanceWorker::new(app_state.orchestrator.clone(), &app_state.config);
    let maintenance = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let app = create_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped, draining background workers");
    let _ = shutdown_tx.send(true);
    if let Err(e) = maintenance.await {
        tracing::warn!("Maintenance worker ended abnormally: {}", e);
    }
    if let Err(e) = flusher.await {
        tracing::warn!("Store flusher ended abnormally: {}", e);
    }

    let pending = app_state.store.pending_writes();
    if pending > 0 {
        tracing::warn!("{} writes still pending, flushing", pending);
        app_state
            .store
            .flush_now()
            .await
            .context("Final flush failed")?;
    }

    shutdown_telemetry(provider);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn init_telemetry() -> anyhow::Result<opentelemetry_sdk::trace::SdkTracerProvider> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4318".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()
        .context("Failed to create OTLP exporter")?;

    let resource = Resource::builder_empty()
        .with_service_name("quizbot-api")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

fn shutdown_telemetry(provider: opentelemetry_sdk::trace::SdkTracerProvider) {
    tracing::info!("Shutting down OpenTelemetry");
    if let Err(e) = provider.shutdown() {
        eprintln!("OpenTelemetry shutdown failed: {}", e);
    }
}
