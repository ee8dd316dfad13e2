use anyhow::{Context, Result};
use clap::Parser;
use loadtest_common::Config;
use loadtest_driver::ledger::{DynamoDbSink, LedgerWorkload};
use loadtest_driver::metrics::DriverTelemetry;
use loadtest_driver::Driver;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Ledger id this driver instance writes transfers against.
    #[arg(long, default_value = "0")]
    ledger_id: u64,

    /// Override the sink's DynamoDB endpoint (e.g. for DynamoDB Local).
    #[arg(long)]
    dynamodb_endpoint: Option<String>,

    /// OpenTelemetry collector endpoint.
    #[arg(long, default_value = "http://localhost:4317")]
    otel_endpoint: String,

    /// Skip ambient OpenTelemetry export, only print the report.
    #[arg(long)]
    no_telemetry: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Loading configuration from: {}", args.config);

    let config = Config::from_file(&args.config)?;
    info!(
        "Driver configured: concurrency={}, target_rate={}/s, duration={}s",
        config.driver.concurrency,
        config.driver.target_request_rate_per_second,
        config.driver.duration_seconds
    );

    let endpoint_url = args
        .dynamodb_endpoint
        .clone()
        .or_else(|| config.sink.endpoint_url.clone());

    let aws_config = build_aws_config(&config, endpoint_url.as_deref()).await;
    let dynamo_client = aws_sdk_dynamodb::Client::new(&aws_config);
    let sink = std::sync::Arc::new(DynamoDbSink::new(dynamo_client, config.sink.table_name.clone()));

    let workload = LedgerWorkload::new(sink, &config.ledger, args.ledger_id);

    let mut driver = Driver::new(config.clone(), workload);
    if !args.no_telemetry {
        let telemetry = DriverTelemetry::new(&args.otel_endpoint)
            .context("failed to initialize OpenTelemetry metrics")?;
        driver = driver.with_telemetry(telemetry);
    }

    let report = driver.run().await.context("driver run failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    info!(
        "Run complete: completed={}, missed={}, errors={}",
        report.completed_iterations, report.missed_iterations, report.error_iterations
    );

    Ok(())
}

async fn build_aws_config(
    config: &Config,
    endpoint_override: Option<&str>,
) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

    if let Some(region) = &config.sink.region {
        loader = loader.region(aws_sdk_dynamodb::config::Region::new(region.clone()));
    }
    if let Some(endpoint) = endpoint_override {
        loader = loader.endpoint_url(endpoint.to_string());
    }

    loader.load().await
}
