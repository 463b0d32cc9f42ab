pub mod bigquery;
pub mod sqlite;

use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::config::{Backend, Settings};
use crate::error::PipelineError;
use crate::gcp::bigquery::BigQueryClient;
use crate::gcp::{ApiError, GcpClient};
use crate::release::ReleaseRecord;
use bigquery::BigQueryStore;
use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid dataset or table name '{0}'")]
    InvalidName(String),

    #[error("cannot decode stored row: {0}")]
    Decode(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination of the aggregated dataset.
pub enum Warehouse {
    BigQuery(BigQueryStore),
    Sqlite(SqliteStore),
}

impl Warehouse {
    /// Open the configured backend. BigQuery needs an authenticated session.
    pub fn open(settings: &Settings, gcp: Option<&GcpClient>) -> Result<Self, StoreError> {
        let wh = &settings.warehouse;
        match wh.backend {
            Backend::Bigquery => {
                let gcp = gcp.ok_or_else(|| {
                    StoreError::Api(ApiError::Auth("bigquery backend needs a GCP session".into()))
                })?;
                let client = BigQueryClient::new(gcp.clone(), wh.job_timeout());
                Ok(Self::BigQuery(BigQueryStore::new(client, &wh.dataset, &wh.table)))
            }
            Backend::Sqlite => Ok(Self::Sqlite(SqliteStore::open(
                Path::new(&wh.sqlite_path),
                &wh.dataset,
                &wh.table,
                &settings.gcp.region,
            )?)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::BigQuery(s) => s.describe(),
            Self::Sqlite(s) => s.describe(),
        }
    }

    pub async fn ensure_dataset(&self) -> Result<bool, StoreError> {
        match self {
            Self::BigQuery(s) => s.ensure_dataset().await,
            Self::Sqlite(s) => s.ensure_dataset(),
        }
    }

    pub async fn replace_table(&self, dataset: &[ReleaseRecord]) -> Result<usize, StoreError> {
        match self {
            Self::BigQuery(s) => s.replace_table(dataset).await,
            Self::Sqlite(s) => s.replace_table(dataset),
        }
    }

    pub async fn load(&self) -> Result<Vec<ReleaseRecord>, StoreError> {
        match self {
            Self::BigQuery(s) => s.load().await,
            Self::Sqlite(s) => s.load(),
        }
    }

    /// Create the namespace if needed, then overwrite the table in full.
    pub async fn publish(&self, dataset: &[ReleaseRecord]) -> Result<(), PipelineError> {
        if self.ensure_dataset().await? {
            info!("Created dataset namespace for {}", self.describe());
        }
        let rows = self.replace_table(dataset).await?;
        info!("Replaced {} with {} rows", self.describe(), rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::ReleaseKind;
    use chrono::NaiveDate;

    fn sqlite_settings(path: &Path) -> Settings {
        Settings::from_toml(&format!(
            "[warehouse]\nbackend = \"sqlite\"\nsqlite_path = \"{}\"\n",
            path.display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn publish_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let settings = sqlite_settings(&dir.path().join("wh.sqlite"));
        let wh = Warehouse::open(&settings, None).unwrap();
        assert!(wh.describe().starts_with("sqlite:RELEASE_NOTES.BQ_Release_Notes"));

        let dataset = vec![
            ReleaseRecord {
                date: NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
                release_kind: ReleaseKind::Feature,
                description: "a".into(),
                product: "bq".into(),
            },
            ReleaseRecord {
                date: NaiveDate::from_ymd_opt(2023, 1, 20).unwrap(),
                release_kind: ReleaseKind::Fix,
                description: "b".into(),
                product: "bqdt".into(),
            },
        ];
        wh.publish(&dataset).await.unwrap();
        wh.publish(&dataset).await.unwrap();
        assert_eq!(wh.load().await.unwrap(), dataset);
    }

    #[test]
    fn bigquery_backend_requires_session() {
        let settings = Settings::from_toml("").unwrap();
        let err = Warehouse::open(&settings, None).err().unwrap();
        assert!(err.to_string().contains("needs a GCP session"));
    }

    #[tokio::test]
    async fn store_failures_surface_as_publish_errors() {
        let store = SqliteStore::open_in_memory("D", "T").unwrap();
        let wh = Warehouse::Sqlite(store);
        // loading a table that was never published fails in the store
        assert!(matches!(wh.load().await, Err(StoreError::Sqlite(_))));

        let record = ReleaseRecord {
            date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            release_kind: ReleaseKind::Fix,
            description: "x".into(),
            product: "bq".into(),
        };
        wh.publish(&[record]).await.unwrap();
        assert_eq!(wh.load().await.unwrap().len(), 1);
        let err: PipelineError = StoreError::Decode("boom".into()).into();
        assert!(matches!(err, PipelineError::Publish(_)));
    }
}
