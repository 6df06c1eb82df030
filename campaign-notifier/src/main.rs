use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common_kafka::kafka_producer::create_kafka_producer;
use envconfig::Envconfig;
use health::HealthRegistry;
use sqlx::postgres::PgPoolOptions;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use campaign_notifier::checkpoint::{CheckpointStore, FileCheckpointStore};
use campaign_notifier::clock::{SnapshotClock, SystemClock};
use campaign_notifier::config::Config;
use campaign_notifier::coordinator::BatchSinkCoordinator;
use campaign_notifier::pipeline::Pipeline;
use campaign_notifier::reference::{refresh_loop, PgReferenceSource, ReferenceData};
use campaign_notifier::retry::RetryPolicy;
use campaign_notifier::server::{router, serve, setup_metrics_recorder};
use campaign_notifier::sink::kafka::KafkaOutboundSink;
use campaign_notifier::sink::postgres::PostgresSink;
use campaign_notifier::stream::KafkaRecordSource;

const PIPELINE_LIVENESS_DEADLINE: Duration = Duration::from_secs(300);
const PRODUCER_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().expect("valid directive")),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("failed to install SIGTERM handler: {}", e);
            if let Err(e) = ctrl_c.await {
                error!("failed to listen for SIGINT: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    info!("starting campaign notifier");

    let config = Config::init_from_env().context("failed to load configuration from env")?;
    config.validate().context("invalid configuration")?;
    info!(
        input_topic = %config.kafka_input_topic,
        output_topic = %config.kafka_output_topic,
        sink_table = %config.sink_table,
        reference_table = %config.reference_table,
        batch_size = config.batch_size,
        "configuration loaded"
    );

    let liveness = HealthRegistry::new("liveness");
    let pipeline_liveness = liveness.register("pipeline", PIPELINE_LIVENESS_DEADLINE);
    let producer_liveness = liveness.register("kafka_producer", PRODUCER_LIVENESS_DEADLINE);

    let recorder = setup_metrics_recorder().context("failed to install metrics recorder")?;
    let app = router(liveness.clone(), Some(recorder));
    let bind = config.bind();
    tokio::spawn(async move {
        if let Err(e) = serve(app, &bind).await {
            error!("failed to serve health and metrics on {}: {}", bind, e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, finishing current batch");
        shutdown_tx.send_replace(true);
    });

    let sink_pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the sink database")?;
    let reference_pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .connect(config.reference_database_url())
        .await
        .context("failed to connect to the reference database")?;

    let reference_source = Arc::new(PgReferenceSource::new(
        reference_pool.clone(),
        &config.reference_table,
    ));
    let reference = Arc::new(
        ReferenceData::load(reference_source)
            .await
            .context("failed to load the subscriber reference set")?,
    );

    if config.reference_refresh_interval_secs > 0 {
        let interval = Duration::from_secs(config.reference_refresh_interval_secs);
        let refresher_liveness = liveness.register("reference_refresher", interval * 3);
        tokio::spawn(refresh_loop(
            reference.clone(),
            interval,
            refresher_liveness,
            shutdown_rx.clone(),
        ));
    }

    let checkpoints = Arc::new(FileCheckpointStore::new(&config.checkpoint_dir));
    let checkpoint = checkpoints
        .load(&config.kafka_input_topic)
        .await
        .context("failed to load checkpoint")?;

    let source = KafkaRecordSource::new(
        &config.kafka,
        &config.kafka_consumer_group,
        &config.kafka_input_topic,
        &checkpoint.offsets,
        config.starting_offsets()?,
        config.batch_size,
        config.batch_timeout_ms.0,
    )
    .context("failed to subscribe to the input topic")?;

    let checkpoint = match checkpoint.with_start_offsets(source.start_offsets()) {
        Some(seeded) => {
            checkpoints
                .commit(&seeded)
                .await
                .context("failed to record partition start offsets")?;
            info!(offsets = ?seeded.offsets, "recorded start offsets of new partitions");
            seeded
        }
        None => checkpoint,
    };

    let producer = create_kafka_producer(&config.kafka, producer_liveness)
        .await
        .context("failed to create kafka producer")?;
    let outbound = Arc::new(KafkaOutboundSink::new(
        producer,
        config.kafka_output_topic.clone(),
    ));

    let coordinator = BatchSinkCoordinator::new(
        Arc::new(PostgresSink::new(sink_pool.clone(), &config.sink_table)),
        outbound.clone(),
        checkpoints,
        RetryPolicy::from(&config.retry_policy),
    );
    let clock = SnapshotClock::new(Arc::new(SystemClock), config.now_refresh_interval_secs);

    let mut pipeline = Pipeline::new(
        source,
        reference,
        coordinator,
        clock,
        checkpoint,
        pipeline_liveness,
    );
    let result = pipeline.run(shutdown_rx).await;

    if let Err(e) = outbound.flush(FLUSH_TIMEOUT) {
        error!("failed to flush kafka producer: {}", e);
    }
    sink_pool.close().await;
    reference_pool.close().await;

    match result {
        Ok(()) => {
            info!(
                batch_id = pipeline.checkpoint().batch_id,
                "campaign notifier stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!("pipeline stopped on a fatal error: {}", e);
            Err(e.into())
        }
    }
}
