//! Next-release forecasting, delegated to a BigQuery ML `ARIMA_PLUS` model.
//!
//! Three statements run in order: an analysis view of days between
//! releases per product, the model trained on that view, and a retrieval
//! query that keeps the latest already-elapsed forecast row per product.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{Product, Settings};
use crate::gcp::bigquery::{BigQueryClient, QueryResult};
use crate::gcp::ApiError;

pub const FORECAST_KIND: &str = "Forecasted Release Note";
pub const FORECAST_NOTE: &str = "Forecasted Timerange for Next Release Note";

/// Predicted next release for one product, as day offsets from `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub product: String,
    pub timestamp: DateTime<Utc>,
    pub predicted_days: f64,
    pub lower_days: f64,
    pub upper_days: f64,
    target: DateTime<Utc>,
    target_lower: DateTime<Utc>,
    target_upper: DateTime<Utc>,
}

impl ForecastPoint {
    /// `None` when an offset is not finite or leaves the representable range.
    pub fn new(
        product: &str,
        timestamp: DateTime<Utc>,
        predicted_days: f64,
        lower_days: f64,
        upper_days: f64,
    ) -> Option<Self> {
        Some(Self {
            product: product.to_string(),
            timestamp,
            predicted_days,
            lower_days,
            upper_days,
            target: offset(timestamp, predicted_days)?,
            target_lower: offset(timestamp, lower_days)?,
            target_upper: offset(timestamp, upper_days)?,
        })
    }

    pub fn target(&self) -> DateTime<Utc> {
        self.target
    }

    pub fn target_lower(&self) -> DateTime<Utc> {
        self.target_lower
    }

    pub fn target_upper(&self) -> DateTime<Utc> {
        self.target_upper
    }
}

fn offset(ts: DateTime<Utc>, days: f64) -> Option<DateTime<Utc>> {
    let ms = (days * 86_400_000.0).round();
    // i64::MAX as f64 rounds up, so the bound is exclusive
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return None;
    }
    ts.checked_add_signed(Duration::try_milliseconds(ms as i64)?)
}

/// Fully-qualified names the statements are rendered against.
#[derive(Debug, Clone)]
pub struct ForecastSql {
    pub table: String,
    pub view: String,
    pub model: String,
    pub train_horizon: u32,
    pub horizon: u32,
    pub confidence_level: f64,
}

impl ForecastSql {
    pub fn new(settings: &Settings) -> Self {
        let qualify = |name: &str| {
            format!("`{}.{}.{}`", settings.gcp.project, settings.warehouse.dataset, name)
        };
        Self {
            table: qualify(&settings.warehouse.table),
            view: qualify(&settings.forecast.view),
            model: qualify(&settings.forecast.model),
            train_horizon: settings.forecast.train_horizon,
            horizon: settings.forecast.horizon,
            confidence_level: settings.forecast.confidence_level,
        }
    }

    pub fn analysis_view(&self) -> String {
        format!(
            "CREATE VIEW IF NOT EXISTS {view} AS
WITH PREP AS (
  SELECT date, product, COUNT(*) AS releases
  FROM {table}
  GROUP BY date, product
)
SELECT date, product, releases,
       DATE_DIFF(LEAD(date) OVER (PARTITION BY product ORDER BY date), date, DAY)
         AS days_until_next_release
FROM PREP",
            view = self.view,
            table = self.table,
        )
    }

    pub fn train_model(&self) -> String {
        format!(
            "CREATE OR REPLACE MODEL {model}
OPTIONS(MODEL_TYPE = 'ARIMA_PLUS',
        time_series_timestamp_col = 'date',
        time_series_data_col = 'days_until_next_release',
        time_series_id_col = 'product',
        horizon = {horizon}) AS
SELECT date, days_until_next_release, product
FROM {view}",
            model = self.model,
            horizon = self.train_horizon,
            view = self.view,
        )
    }

    pub fn retrieve(&self) -> String {
        format!(
            "WITH
FORECAST AS (
  SELECT *
  FROM ML.EXPLAIN_FORECAST(MODEL {model},
                           STRUCT({horizon} AS horizon, {confidence} AS confidence_level))
  WHERE time_series_type = 'forecast'
    AND DATE(time_series_timestamp) < CURRENT_DATE()
),
MATCH AS (
  SELECT product, MAX(DATE(time_series_timestamp)) AS match_date
  FROM FORECAST
  GROUP BY product
)
SELECT f.product, f.time_series_timestamp, f.time_series_data,
       f.prediction_interval_lower_bound, f.prediction_interval_upper_bound
FROM MATCH m
JOIN FORECAST f
  ON f.product = m.product AND DATE(f.time_series_timestamp) = m.match_date
ORDER BY f.product",
            model = self.model,
            horizon = self.horizon,
            confidence = self.confidence_level,
        )
    }
}

/// Prepare the view, retrain the model, and fetch one point per product.
pub async fn run(
    client: &BigQueryClient,
    sql: &ForecastSql,
    products: &[Product],
) -> Result<Vec<ForecastPoint>, ApiError> {
    info!("Preparing analysis view {}", sql.view);
    client.query(&sql.analysis_view()).await?;
    info!("Training forecast model {}", sql.model);
    client.query(&sql.train_model()).await?;
    let result = client.query(&sql.retrieve()).await?;
    let points = decode_points(&result, products);
    info!("Forecast retrieved for {} products", points.len());
    Ok(points)
}

/// Rows for untracked products or with missing values are skipped.
pub fn decode_points(result: &QueryResult, products: &[Product]) -> Vec<ForecastPoint> {
    result
        .records()
        .filter_map(|row| {
            let product = row.get("product")?;
            if !products.iter().any(|p| p.id == product) {
                warn!("Skipping forecast for untracked product '{}'", product);
                return None;
            }
            let point = ForecastPoint::new(
                product,
                row.timestamp("time_series_timestamp")?,
                row.float("time_series_data")?,
                row.float("prediction_interval_lower_bound")?,
                row.float("prediction_interval_upper_bound")?,
            );
            match &point {
                Some(p) => debug!(
                    "Forecast for {}: {:+.1} days from {} ({:+.1} to {:+.1})",
                    p.product, p.predicted_days, p.timestamp, p.lower_days, p.upper_days
                ),
                None => warn!("Skipping forecast for '{}': prediction out of range", product),
            }
            point
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::bigquery::Field;
    use chrono::TimeZone;
    use serde_json::Value;

    fn settings() -> Settings {
        Settings::from_toml("").unwrap()
    }

    fn field(name: &str, kind: &str) -> Field {
        Field {
            name: name.into(),
            kind: kind.into(),
        }
    }

    #[test]
    fn statements_reference_configured_objects() {
        let sql = ForecastSql::new(&settings());
        let view = sql.analysis_view();
        assert!(view.starts_with(
            "CREATE VIEW IF NOT EXISTS `statmike-internal-site.RELEASE_NOTES.Analysis_Data`"
        ));
        assert!(view.contains("FROM `statmike-internal-site.RELEASE_NOTES.BQ_Release_Notes`"));

        let model = sql.train_model();
        assert!(model.contains("`statmike-internal-site.RELEASE_NOTES.arima_plus`"));
        assert!(model.contains("MODEL_TYPE = 'ARIMA_PLUS'"));
        assert!(model.contains("horizon = 20"));

        let retrieve = sql.retrieve();
        assert!(retrieve.contains("STRUCT(10 AS horizon, 0.8 AS confidence_level)"));
        assert!(retrieve.contains("time_series_type = 'forecast'"));
    }

    #[test]
    fn targets_offset_by_fractional_days() {
        let p = ForecastPoint::new(
            "bq",
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            7.5,
            2.0,
            13.0,
        )
        .unwrap();
        assert_eq!(p.target(), Utc.with_ymd_and_hms(2023, 1, 8, 12, 0, 0).unwrap());
        assert_eq!(p.target_lower(), Utc.with_ymd_and_hms(2023, 1, 3, 0, 0, 0).unwrap());
        assert_eq!(p.target_upper(), Utc.with_ymd_and_hms(2023, 1, 14, 0, 0, 0).unwrap());
    }

    #[test]
    fn extreme_bounds_are_rejected() {
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert!(ForecastPoint::new("bq", ts, 5.0, 1.0, 1e300).is_none());
        assert!(ForecastPoint::new("bq", ts, 5.0, -1e12, 9.0).is_none());
        assert!(ForecastPoint::new("bq", ts, 5.0, 1.0, 1e9).is_none());
        assert!(ForecastPoint::new("bq", ts, f64::NAN, 1.0, 9.0).is_none());
        assert!(ForecastPoint::new("bq", ts, 5.0, 1.0, f64::INFINITY).is_none());
    }

    #[test]
    fn decodes_rows_and_skips_unusable_ones() {
        let cells = |p: &str, ts: Option<&str>| -> Vec<Value> {
            vec![
                Value::from(p),
                ts.map(Value::from).unwrap_or(Value::Null),
                Value::from("6.25"),
                Value::from("1.5"),
                Value::from("11"),
            ]
        };
        let result = QueryResult {
            fields: vec![
                field("product", "STRING"),
                field("time_series_timestamp", "TIMESTAMP"),
                field("time_series_data", "FLOAT"),
                field("prediction_interval_lower_bound", "FLOAT"),
                field("prediction_interval_upper_bound", "FLOAT"),
            ],
            rows: vec![
                cells("bq", Some("1.6725312E9")),
                cells("unknown", Some("1.6725312E9")),
                cells("bqml", None),
                vec![
                    Value::from("bqdt"),
                    Value::from("1.6725312E9"),
                    Value::from("6.25"),
                    Value::from("1.5"),
                    Value::from("1e300"),
                ],
            ],
        };
        let points = decode_points(&result, &settings().products);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].product, "bq");
        assert_eq!(points[0].predicted_days, 6.25);
        assert_eq!(points[0].upper_days, 11.0);
    }
}
