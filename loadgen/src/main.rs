use anyhow::{Context, bail};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::fs;
use std::sync::Arc;
use storyload::report::print_summary;
use storyload::{
    Config, ErrorReport, Generator, HttpTransport, LoadRunner, ResourceTable, ThresholdVerdict,
    TokioClock,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the recorder before anything records a metric
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyload=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;
    info!(
        "Loaded configuration: base_url={}, poll_mode={:?}, concurrent_images={}, repeat_count={}",
        config.base_url,
        config.polling.mode,
        config.images.concurrent_images,
        config.images.repeat_count
    );
    println!("🚀 Load test starting (VUs: {})", config.load.peak_vus());

    let transport = HttpTransport::new(&config.base_url, config.request_timeout)
        .context("Failed to build HTTP client")?;
    let table = Arc::new(ResourceTable::from_polling(&config.polling));
    let generator = Arc::new(Generator::new(transport, Arc::new(TokioClock), table));
    let config = Arc::new(config);

    let outcome = LoadRunner::new(generator, config.clone()).run().await;

    let report_path = config.report.error_report_path();
    let report = ErrorReport::build(&outcome, chrono::Utc::now());
    report
        .write(&report_path)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    info!("Error report written to {}", report_path.display());

    let metrics_path = config.report.metrics_snapshot_path();
    if let Err(e) = fs::write(&metrics_path, prometheus.render()) {
        warn!("Failed to write metrics snapshot {}: {}", metrics_path.display(), e);
    }

    let verdict = ThresholdVerdict::evaluate(&config.thresholds, &outcome.log.telemetry);
    print_summary(&outcome, &verdict, &report_path);

    if !verdict.passed() {
        bail!("Load test thresholds failed");
    }
    Ok(())
}
