use std::sync::Arc;

use envconfig::Envconfig;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use rail_feed_consumer::clock::{SystemClock, TokioDelay};
use rail_feed_consumer::config::{Config, SinkKind};
use rail_feed_consumer::connection::ConnectionManager;
use rail_feed_consumer::normalize::Normalizer;
use rail_feed_consumer::pipeline::IngestPipeline;
use rail_feed_consumer::reference::ReferenceLookup;
use rail_feed_consumer::server::{
    health_router, serve, setup_metrics_recorder, setup_metrics_routes,
};
use rail_feed_consumer::sink::{FileSink, FlushSink, S3Sink};
use rail_feed_consumer::transport::StompTransport;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

async fn build_sink(config: &Config) -> Result<Arc<dyn FlushSink>, anyhow::Error> {
    match config.sink_kind {
        SinkKind::File => Ok(Arc::new(FileSink::new(&config.records_dir).await?)),
        SinkKind::S3 => {
            anyhow::ensure!(
                !config.s3_bucket.is_empty(),
                "S3_BUCKET must be set when SINK_KIND is s3"
            );
            let sink = S3Sink::from_env(
                config.s3_bucket.clone(),
                config.s3_prefix.clone(),
                config.s3_endpoint.clone(),
            )
            .await?;
            Ok(Arc::new(sink))
        }
    }
}

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("Starting rail feed consumer...");

    let config = Config::init_from_env()?;
    info!(
        host = config.feed.host,
        destination = config.feed.destination,
        subscription = config.feed.subscription_name,
        sink = ?config.sink_kind,
        window_seconds = config.flush_window_seconds,
        "Configuration loaded"
    );

    let metrics_handle = setup_metrics_recorder()?;
    let lookup = Arc::new(ReferenceLookup::load(&config.operator_table_path)?);
    let sink = build_sink(&config).await?;
    let mut pipeline = IngestPipeline::new(
        Normalizer::new(lookup),
        sink,
        Arc::new(SystemClock),
        config.flush_window(),
    );

    let mut manager = ConnectionManager::new(
        StompTransport::new(config.stomp_settings()),
        config.subscription(),
        config.retry_policy(),
        TokioDelay,
    );

    // Health check server
    let bind = config.bind();
    let router = setup_metrics_routes(health_router(manager.state_watch()), metrics_handle);
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!(error = %e, bind, "Health server stopped");
        }
    });

    let outcome = tokio::select! {
        result = manager.run(&mut pipeline) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    if let Err(e) = pipeline.flush_remaining().await {
        error!(error = %e, "Final flush failed, buffered records were not saved");
    }
    manager.close().await;

    outcome?;
    info!("Rail feed consumer shut down");
    Ok(())
}
