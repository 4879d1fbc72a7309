use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use envconfig::Envconfig;
use fact_modeling_worker::{
    config::Config,
    consumer::EventConsumerLoop,
    identity::PgIdentityStore,
    notify::{create_kafka_producer, KafkaCompletionNotifier},
    pipeline::PipelineEngine,
    runs::{Launcher, RunRegistry},
    serve::{app, serve},
    sink::PgFactSink,
    source::PgRecordSource,
};
use health::HealthRegistry;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().expect("static directive parses")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let shutdown = spawn_shutdown_listener();

    let liveness = HealthRegistry::new("liveness");
    let bind = format!("{}:{}", config.host, config.port);
    let router = app(liveness.clone());
    tokio::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let producer = create_kafka_producer(&config.kafka)?;
    let notifier = Arc::new(KafkaCompletionNotifier::new(
        producer,
        config.kafka_completion_topic.clone(),
    ));

    let registry = RunRegistry::new();
    let engine = Arc::new(PipelineEngine::new(
        Arc::new(PgRecordSource::new(pool.clone())),
        Arc::new(PgFactSink::new(pool.clone())),
        Arc::new(PgIdentityStore::new(pool)),
        notifier,
        registry.clone(),
        config.chunk_size,
        shutdown.clone(),
    ));
    let launcher = Arc::new(Launcher::new(engine, registry));

    let consumer_liveness = liveness.register("event-consumer", Duration::from_secs(30));
    let consumer = EventConsumerLoop::new(&config, launcher, consumer_liveness)?;
    consumer.run(shutdown).await;

    info!("Shutting down");
    Ok(())
}
