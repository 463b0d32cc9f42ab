use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,1023}$").unwrap());

const LOCAL_CONFIG: &str = "relnotes.toml";

const DEFAULTS: &str = r##"
[gcp]
project = "statmike-internal-site"
region = "us-central1"

[warehouse]
backend = "bigquery"
dataset = "RELEASE_NOTES"
table = "BQ_Release_Notes"
sqlite_path = "data/release_notes.sqlite"
job_timeout_secs = 1800

[fetch]
timeout_secs = 30
max_retries = 3
base_backoff_ms = 2000
user_agent = "relnotes/0.1"

[publish]
bucket = "statmike-internal-site"
timeline_object = "bq-timeline/bqplot.html"
forecast_object = "bq-forecast/bqplot.html"
forecast_topic = "bq-forecast"
forecast_message = "Proceed with Forecast"

[forecast]
view = "Analysis_Data"
model = "arima_plus"
train_horizon = 20
horizon = 10
confidence_level = 0.8
"##;

/// Tracked products when the configuration lists none. Kept out of
/// `DEFAULTS` so a configured `[[products]]` list replaces it whole.
const DEFAULT_PRODUCTS: &str = r##"
[[products]]
id = "bq"
name = "BigQuery"
color = "#4285F4"
url = "https://cloud.google.com/bigquery/docs/release-notes"

[[products]]
id = "bqml"
name = "BigQuery ML"
color = "#EA4335"
url = "https://cloud.google.com/bigquery-ml/docs/release-notes"

[[products]]
id = "bqbi"
name = "BigQuery BI Engine"
color = "#FBBC04"
url = "https://cloud.google.com/bi-engine/docs/release-notes"

[[products]]
id = "bqdt"
name = "BigQuery Data Transfer Service"
color = "#34A853"
url = "https://cloud.google.com/bigquery-transfer/docs/release-notes"
"##;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub gcp: GcpSettings,
    pub warehouse: WarehouseSettings,
    pub fetch: FetchSettings,
    pub publish: PublishSettings,
    pub forecast: ForecastSettings,
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcpSettings {
    pub project: String,
    pub region: String,
    /// Bearer token override; the metadata server is asked when unset.
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Bigquery,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseSettings {
    pub backend: Backend,
    pub dataset: String,
    pub table: String,
    pub sqlite_path: String,
    pub job_timeout_secs: u64,
}

impl WarehouseSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishSettings {
    pub bucket: String,
    pub timeline_object: String,
    pub forecast_object: String,
    pub forecast_topic: String,
    pub forecast_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastSettings {
    pub view: String,
    pub model: String,
    pub train_horizon: u32,
    pub horizon: u32,
    pub confidence_level: f64,
}

/// A tracked product line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub color: String,
    pub url: String,
}

impl Settings {
    /// Defaults, then `relnotes.toml` (or the explicit path), then
    /// `RELNOTES_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Toml));
        builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name(LOCAL_CONFIG).required(false)),
        };
        let settings: Settings = builder
            .add_source(Environment::with_prefix("RELNOTES").separator("__"))
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.finish()
    }

    /// Build from defaults plus an inline TOML overlay.
    #[cfg(test)]
    pub fn from_toml(overlay: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .add_source(File::from_str(overlay, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.finish()
    }

    fn finish(mut self) -> Result<Self> {
        if self.products.is_empty() {
            self.products = default_products()?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            bail!("no products configured");
        }
        let mut seen = HashSet::new();
        for p in &self.products {
            if !seen.insert(p.id.as_str()) {
                bail!("duplicate product id '{}'", p.id);
            }
        }
        for (what, name) in [
            ("dataset", &self.warehouse.dataset),
            ("table", &self.warehouse.table),
            ("view", &self.forecast.view),
            ("model", &self.forecast.model),
        ] {
            if !is_identifier(name) {
                bail!("{} name '{}' is not a valid identifier", what, name);
            }
        }
        let c = self.forecast.confidence_level;
        if !(c > 0.0 && c < 1.0) {
            bail!("forecast.confidence_level must be in (0, 1), got {}", c);
        }
        Ok(())
    }

    pub fn product(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }
}

fn default_products() -> Result<Vec<Product>> {
    Config::builder()
        .add_source(File::from_str(DEFAULT_PRODUCTS, FileFormat::Toml))
        .build()?
        .get("products")
        .context("Invalid built-in product table")
}

pub fn is_identifier(s: &str) -> bool {
    IDENT_RE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_track_four_products() {
        let s = Settings::from_toml("").unwrap();
        let ids: Vec<&str> = s.products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["bq", "bqml", "bqbi", "bqdt"]);
        assert_eq!(s.warehouse.backend, Backend::Bigquery);
        assert_eq!(s.warehouse.dataset, "RELEASE_NOTES");
        assert_eq!(s.warehouse.table, "BQ_Release_Notes");
        assert_eq!(s.gcp.region, "us-central1");
        assert_eq!(s.publish.forecast_message, "Proceed with Forecast");
        assert_eq!(s.product("bqml").unwrap().color, "#EA4335");
        assert!(s.gcp.access_token.is_none());
    }

    #[test]
    fn overlay_overrides_scalars() {
        let s = Settings::from_toml(
            r#"
            [warehouse]
            backend = "sqlite"
            sqlite_path = "/tmp/x.sqlite"
            [fetch]
            max_retries = 0
            "#,
        )
        .unwrap();
        assert_eq!(s.warehouse.backend, Backend::Sqlite);
        assert_eq!(s.warehouse.sqlite_path, "/tmp/x.sqlite");
        assert_eq!(s.fetch.max_retries, 0);
        // untouched keys keep their defaults
        assert_eq!(s.fetch.timeout_secs, 30);
    }

    #[test]
    fn rejects_bad_table_name() {
        let err = Settings::from_toml("[warehouse]\ntable = \"drop table;\"").unwrap_err();
        assert!(err.to_string().contains("not a valid identifier"));
    }

    #[test]
    fn rejects_duplicate_products() {
        let overlay = r##"
            [[products]]
            id = "bq"
            name = "A"
            color = "#000000"
            url = "https://example.com/a"
            [[products]]
            id = "bq"
            name = "B"
            color = "#111111"
            url = "https://example.com/b"
        "##;
        let err = Settings::from_toml(overlay).unwrap_err();
        assert!(err.to_string().contains("duplicate product id"));
    }

    #[test]
    fn configured_products_replace_defaults() {
        let overlay = r##"
            [[products]]
            id = "bqml"
            name = "BigQuery ML"
            color = "#EA4335"
            url = "https://cloud.google.com/bigquery-ml/docs/release-notes"
        "##;
        let s = Settings::from_toml(overlay).unwrap();
        let ids: Vec<&str> = s.products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["bqml"]);
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        assert!(Settings::from_toml("[forecast]\nconfidence_level = 1.5").is_err());
    }
}
