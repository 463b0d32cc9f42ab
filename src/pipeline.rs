use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::chart;
use crate::config::{Backend, Settings};
use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::forecast::{self, ForecastSql};
use crate::gcp::bigquery::BigQueryClient;
use crate::gcp::pubsub::{self, TriggerEvent};
use crate::gcp::storage::{self, HTML_CONTENT_TYPE};
use crate::gcp::GcpClient;
use crate::parser;
use crate::release::ReleaseRecord;
use crate::warehouse::Warehouse;

/// Delivery switches shared by both pipelines.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub upload: bool,
    pub signal: bool,
    pub out: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            upload: true,
            signal: true,
            out: None,
        }
    }
}

impl RunOptions {
    /// The forecast signal only follows a published chart.
    fn signals(&self) -> bool {
        self.upload && self.signal
    }
}

pub struct TimelineSummary {
    pub records: usize,
    pub warehouse: String,
    pub chart_url: Option<String>,
    pub signalled: bool,
}

impl TimelineSummary {
    pub fn print(&self) {
        println!("Published {} release notes to {}.", self.records, self.warehouse);
        if let Some(url) = &self.chart_url {
            println!("Timeline chart: {}", url);
        }
        if self.signalled {
            println!("Forecast pipeline signalled.");
        }
    }
}

pub struct ForecastSummary {
    pub forecasts: usize,
    pub records: usize,
    pub chart_url: Option<String>,
}

impl ForecastSummary {
    pub fn print(&self) {
        println!(
            "Forecast {} products over {} release notes.",
            self.forecasts, self.records
        );
        if let Some(url) = &self.chart_url {
            println!("Forecast chart: {}", url);
        }
    }
}

/// Log the triggering message. A payload that cannot be decoded is
/// reported and otherwise ignored.
pub fn log_trigger(event: Option<&str>) -> Option<String> {
    let raw = event?;
    match TriggerEvent::parse(raw).and_then(|ev| ev.text()) {
        Ok(Some(text)) => {
            info!("Triggered with message: {}", text);
            Some(text)
        }
        Ok(None) => {
            info!("Triggered without message data");
            None
        }
        Err(e) => {
            warn!("Ignoring undecodable trigger event: {}", e);
            None
        }
    }
}

fn needs_session(settings: &Settings, opts: &RunOptions) -> bool {
    settings.warehouse.backend == Backend::Bigquery || opts.upload || opts.signals()
}

async fn connect(settings: &Settings) -> Result<GcpClient> {
    GcpClient::connect(&settings.gcp)
        .await
        .context("Failed to open GCP session")
}

/// Fetch, parse and normalize every tracked product, then aggregate.
pub async fn extract_all(settings: &Settings) -> Result<Vec<ReleaseRecord>> {
    let fetcher = Fetcher::new(&settings.fetch)?;

    let pb = ProgressBar::new(settings.products.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut per_product = Vec::with_capacity(settings.products.len());
    for product in &settings.products {
        pb.set_message(product.id.clone());
        let records = parser::extract(&fetcher, &product.id, &product.url).await?;
        per_product.push(records);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let dataset = aggregate(per_product);
    info!(
        "Aggregated {} release notes across {} products",
        dataset.len(),
        settings.products.len()
    );
    Ok(dataset)
}

/// Write the chart locally and/or upload it. Returns the public URL when uploaded.
async fn deliver(
    gcp: Option<&GcpClient>,
    bucket: &str,
    object: &str,
    html: String,
    opts: &RunOptions,
) -> Result<Option<String>> {
    if let Some(path) = &opts.out {
        write_local(path, &html)?;
    }
    if !opts.upload {
        info!("Upload skipped for {}", object);
        return Ok(None);
    }
    let Some(gcp) = gcp else {
        bail!("uploading {} needs a GCP session", object);
    };
    let url = storage::upload_public(gcp, bucket, object, html.into_bytes(), HTML_CONTENT_TYPE)
        .await
        .with_context(|| format!("Failed to upload gs://{}/{}", bucket, object))?;
    Ok(Some(url))
}

fn write_local(path: &Path, html: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, html).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote chart to {}", path.display());
    Ok(())
}

/// Destination of the publish step; failures to open it are publish failures.
fn open_destination(
    settings: &Settings,
    gcp: Option<&GcpClient>,
) -> Result<Warehouse, PipelineError> {
    Ok(Warehouse::open(settings, gcp)?)
}

/// Scrape, publish the table, render and upload the timeline, signal the forecast.
pub async fn run_timeline(
    settings: &Settings,
    opts: &RunOptions,
    event: Option<&str>,
) -> Result<TimelineSummary> {
    log_trigger(event);

    let gcp = if needs_session(settings, opts) {
        Some(connect(settings).await?)
    } else {
        None
    };

    let dataset = extract_all(settings).await?;

    let warehouse = open_destination(settings, gcp.as_ref())?;
    warehouse.publish(&dataset).await?;

    let html = chart::render_timeline(&dataset, &settings.products);
    let publish = &settings.publish;
    let chart_url = deliver(
        gcp.as_ref(),
        &publish.bucket,
        &publish.timeline_object,
        html,
        opts,
    )
    .await?;

    let mut signalled = false;
    if let (true, Some(gcp)) = (opts.signals(), gcp.as_ref()) {
        pubsub::publish(gcp, &publish.forecast_topic, &publish.forecast_message)
            .await
            .context("Failed to signal forecast pipeline")?;
        signalled = true;
    }

    Ok(TimelineSummary {
        records: dataset.len(),
        warehouse: warehouse.describe(),
        chart_url,
        signalled,
    })
}

/// Retrain the forecast model over the published table and chart the result.
pub async fn run_forecast(
    settings: &Settings,
    opts: &RunOptions,
    event: Option<&str>,
) -> Result<ForecastSummary> {
    log_trigger(event);

    if settings.warehouse.backend != Backend::Bigquery {
        bail!("forecasting runs in BigQuery ML; set warehouse.backend = \"bigquery\"");
    }
    let gcp = connect(settings).await?;
    let client = BigQueryClient::new(gcp.clone(), settings.warehouse.job_timeout());

    let sql = ForecastSql::new(settings);
    let points = forecast::run(&client, &sql, &settings.products)
        .await
        .context("Forecast queries failed")?;

    let warehouse = Warehouse::open(settings, Some(&gcp))?;
    let dataset = warehouse
        .load()
        .await
        .with_context(|| format!("Failed to read {}", warehouse.describe()))?;

    let html = chart::render_forecast(
        &dataset,
        &points,
        &settings.products,
        settings.forecast.confidence_level,
    );
    let chart_url = deliver(
        Some(&gcp),
        &settings.publish.bucket,
        &settings.publish.forecast_object,
        html,
        opts,
    )
    .await?;

    Ok(ForecastSummary {
        forecasts: points.len(),
        records: dataset.len(),
        chart_url,
    })
}
