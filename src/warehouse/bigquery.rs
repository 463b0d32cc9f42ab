use serde_json::{json, Value};
use tracing::info;

use super::StoreError;
use crate::gcp::bigquery::BigQueryClient;
use crate::release::{ReleaseKind, ReleaseRecord};

/// The release-note table in BigQuery.
pub struct BigQueryStore {
    client: BigQueryClient,
    dataset: String,
    table: String,
}

pub fn table_schema() -> Value {
    json!([
        { "name": "date", "type": "DATE", "mode": "REQUIRED" },
        { "name": "release_type", "type": "STRING", "mode": "REQUIRED" },
        { "name": "description", "type": "STRING", "mode": "NULLABLE" },
        { "name": "product", "type": "STRING", "mode": "REQUIRED" },
    ])
}

/// One JSON object per line, columns named as in [`table_schema`].
pub fn to_ndjson(records: &[ReleaseRecord]) -> Result<String, StoreError> {
    let mut out = String::new();
    for r in records {
        let line = serde_json::to_string(r).map_err(|e| StoreError::Decode(e.to_string()))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

impl BigQueryStore {
    pub fn new(client: BigQueryClient, dataset: &str, table: &str) -> Self {
        Self {
            client,
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    pub fn describe(&self) -> String {
        format!("bigquery:{}.{}.{}", self.client.project(), self.dataset, self.table)
    }

    pub async fn ensure_dataset(&self) -> Result<bool, StoreError> {
        if self.client.dataset_exists(&self.dataset).await? {
            return Ok(false);
        }
        self.client.create_dataset(&self.dataset).await?;
        Ok(true)
    }

    pub async fn replace_table(&self, records: &[ReleaseRecord]) -> Result<usize, StoreError> {
        let ndjson = to_ndjson(records)?;
        let job_id = self
            .client
            .load_ndjson_truncate(&self.dataset, &self.table, table_schema(), ndjson)
            .await?;
        info!("Load job {} replaced {} with {} rows", job_id, self.describe(), records.len());
        Ok(records.len())
    }

    pub async fn load(&self) -> Result<Vec<ReleaseRecord>, StoreError> {
        let sql = format!(
            "SELECT date, release_type, description, product FROM {} ORDER BY date DESC",
            self.client.table_ref(&self.dataset, &self.table)
        );
        let result = self.client.query(&sql).await?;
        result
            .records()
            .enumerate()
            .map(|(i, row)| {
                let bad = |what: &str| StoreError::Decode(format!("row {}: bad or missing {}", i, what));
                let date = row.date("date").ok_or_else(|| bad("date"))?;
                let release_kind = row
                    .get("release_type")
                    .and_then(|k| k.parse::<ReleaseKind>().ok())
                    .ok_or_else(|| bad("release_type"))?;
                let product = row.get("product").ok_or_else(|| bad("product"))?;
                Ok(ReleaseRecord {
                    date,
                    release_kind,
                    description: row.get("description").unwrap_or_default().to_string(),
                    product: product.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn ndjson_matches_schema_columns() {
        let records = vec![
            ReleaseRecord {
                date: NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
                release_kind: ReleaseKind::Feature,
                description: "Line \"quoted\"\nnext".into(),
                product: "bq".into(),
            },
            ReleaseRecord {
                date: NaiveDate::from_ymd_opt(2023, 1, 5).unwrap(),
                release_kind: ReleaseKind::Fix,
                description: "x".into(),
                product: "bqml".into(),
            },
        ];
        let ndjson = to_ndjson(&records).unwrap();
        let lines: Vec<&str> = ndjson.lines().collect();
        assert_eq!(lines.len(), 2);

        let columns: Vec<String> = table_schema()
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap().to_string())
            .collect();
        for line in lines {
            let obj: Value = serde_json::from_str(line).unwrap();
            let mut keys: Vec<&String> = obj.as_object().unwrap().keys().collect();
            keys.sort();
            let mut expected: Vec<&String> = columns.iter().collect();
            expected.sort();
            assert_eq!(keys, expected);
        }
        assert!(ndjson.starts_with(r#"{"date":"2023-02-01","release_type":"Feature""#));
    }
}
