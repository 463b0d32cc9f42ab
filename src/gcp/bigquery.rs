use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ApiError, GcpClient};

const BQ_API: &str = "https://bigquery.googleapis.com/bigquery/v2";
const BQ_UPLOAD_API: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const QUERY_WAIT_MS: u64 = 10_000;

/// BigQuery REST client scoped to the session's project and region.
pub struct BigQueryClient {
    gcp: GcpClient,
    job_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: String,
}

/// Rows of a finished query, cells kept as returned (`{"v": ...}` unwrapped).
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
}

pub struct Row<'a> {
    fields: &'a [Field],
    cells: &'a [Value],
}

impl BigQueryClient {
    pub fn new(gcp: GcpClient, job_timeout: Duration) -> Self {
        Self { gcp, job_timeout }
    }

    pub fn project(&self) -> &str {
        self.gcp.project()
    }

    /// Fully-qualified, backtick-quoted name for use in SQL.
    pub fn table_ref(&self, dataset: &str, table: &str) -> String {
        format!("`{}.{}.{}`", self.project(), dataset, table)
    }

    pub async fn dataset_exists(&self, dataset: &str) -> Result<bool, ApiError> {
        let url = format!("{}/projects/{}/datasets/{}", BQ_API, self.project(), dataset);
        let found = self
            .gcp
            .send_json_optional(self.gcp.request(Method::GET, &url))
            .await?;
        Ok(found.is_some())
    }

    pub async fn create_dataset(&self, dataset: &str) -> Result<(), ApiError> {
        let url = format!("{}/projects/{}/datasets", BQ_API, self.project());
        let body = json!({
            "datasetReference": { "projectId": self.project(), "datasetId": dataset },
            "location": self.gcp.region(),
        });
        match self
            .gcp
            .send_json(self.gcp.request(Method::POST, &url).json(&body))
            .await
        {
            Ok(_) => {
                info!("Created dataset {} in {}", dataset, self.gcp.region());
                Ok(())
            }
            // created by a concurrent run in between
            Err(ApiError::Status { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run a load job of newline-delimited JSON that replaces the table.
    pub async fn load_ndjson_truncate(
        &self,
        dataset: &str,
        table: &str,
        schema: Value,
        ndjson: String,
    ) -> Result<String, ApiError> {
        let metadata = json!({
            "jobReference": { "projectId": self.project(), "location": self.gcp.region() },
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.project(),
                        "datasetId": dataset,
                        "tableId": table,
                    },
                    "schema": { "fields": schema },
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": "WRITE_TRUNCATE",
                    "createDisposition": "CREATE_IF_NEEDED",
                }
            }
        });
        let boundary = boundary_for(ndjson.as_bytes());
        let body = multipart_related(&boundary, &metadata, ndjson.as_bytes());

        let url = format!("{}/projects/{}/jobs", BQ_UPLOAD_API, self.project());
        let req = self
            .gcp
            .request(Method::POST, &url)
            .query(&[("uploadType", "multipart")])
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        let job = self.gcp.send_json(req).await?;
        let job_id = job_id(&job, &url)?;
        info!("Load job {} started for {}.{}", job_id, dataset, table);
        self.wait_for_job(&job_id).await?;
        Ok(job_id)
    }

    async fn wait_for_job(&self, job_id: &str) -> Result<Value, ApiError> {
        let deadline = Instant::now() + self.job_timeout;
        let url = format!("{}/projects/{}/jobs/{}", BQ_API, self.project(), job_id);
        loop {
            let job = self
                .gcp
                .send_json(
                    self.gcp
                        .request(Method::GET, &url)
                        .query(&[("location", self.gcp.region())]),
                )
                .await?;
            let status = &job["status"];
            if status["state"] == "DONE" {
                if let Some(err) = status.get("errorResult") {
                    return Err(ApiError::Job {
                        job_id: job_id.to_string(),
                        message: err["message"].as_str().unwrap_or("unknown error").to_string(),
                    });
                }
                return Ok(job);
            }
            if Instant::now() >= deadline {
                return Err(ApiError::Timeout(format!("job {}", job_id)));
            }
            debug!("Job {} is {}", job_id, status["state"]);
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Run a standard-SQL statement and collect every result page.
    pub async fn query(&self, sql: &str) -> Result<QueryResult, ApiError> {
        let url = format!("{}/projects/{}/queries", BQ_API, self.project());
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "location": self.gcp.region(),
            "timeoutMs": QUERY_WAIT_MS,
        });
        let mut page = self
            .gcp
            .send_json(self.gcp.request(Method::POST, &url).json(&body))
            .await?;
        let job_id = job_id(&page, &url)?;
        let results_url = format!("{}/projects/{}/queries/{}", BQ_API, self.project(), job_id);
        let deadline = Instant::now() + self.job_timeout;
        let mut result = QueryResult::default();

        loop {
            let mut page_token = None;
            if page["jobComplete"].as_bool() == Some(true) {
                if result.fields.is_empty() {
                    result.fields = parse_fields(&page["schema"]);
                }
                result.rows.extend(parse_rows(&page["rows"]));
                match page["pageToken"].as_str() {
                    Some(t) => page_token = Some(t.to_string()),
                    None => {
                        debug!("Query {} returned {} rows", job_id, result.rows.len());
                        return Ok(result);
                    }
                }
            } else if Instant::now() >= deadline {
                return Err(ApiError::Timeout(format!("query job {}", job_id)));
            } else {
                debug!("Query {} still running", job_id);
            }

            let mut params = vec![
                ("location", self.gcp.region().to_string()),
                ("timeoutMs", QUERY_WAIT_MS.to_string()),
            ];
            if let Some(t) = page_token {
                params.push(("pageToken", t));
            }
            page = self
                .gcp
                .send_json(self.gcp.request(Method::GET, &results_url).query(&params))
                .await?;
        }
    }
}

impl QueryResult {
    pub fn records(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|cells| Row {
            fields: &self.fields,
            cells,
        })
    }
}

impl<'a> Row<'a> {
    /// String value of a column; `None` for NULL or a missing column.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        let idx = self.fields.iter().position(|f| f.name == name)?;
        self.cells.get(idx)?.as_str()
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.get(name)?, "%Y-%m-%d").ok()
    }

    /// TIMESTAMP cells arrive as epoch seconds in float notation ("1.6725312E9").
    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        let secs: f64 = self.get(name)?.parse().ok()?;
        let micros = (secs * 1_000_000.0).round() as i64;
        DateTime::from_timestamp(
            micros.div_euclid(1_000_000),
            (micros.rem_euclid(1_000_000) * 1_000) as u32,
        )
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name)?.parse().ok()
    }
}

fn job_id(job: &Value, url: &str) -> Result<String, ApiError> {
    job["jobReference"]["jobId"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::Decode {
            url: url.to_string(),
            reason: "missing jobReference.jobId".into(),
        })
}

fn parse_fields(schema: &Value) -> Vec<Field> {
    schema["fields"]
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .map(|f| Field {
                    name: f["name"].as_str().unwrap_or_default().to_string(),
                    kind: f["type"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_rows(rows: &Value) -> Vec<Vec<Value>> {
    rows.as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row["f"]
                        .as_array()
                        .map(|cells| cells.iter().map(|c| c["v"].clone()).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn boundary_for(data: &[u8]) -> String {
    let mut n = Utc::now().timestamp_micros();
    loop {
        let b = format!("relnotes_boundary_{:x}", n);
        if !contains(data, b.as_bytes()) {
            return b;
        }
        n = n.wrapping_add(1);
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// `multipart/related` body: JSON metadata part followed by the media part.
pub fn multipart_related(boundary: &str, metadata: &Value, media: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n\
         --{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
        b = boundary,
        meta = metadata,
    );
    let tail = format!("\r\n--{}--\r\n", boundary);
    let mut body = Vec::with_capacity(head.len() + media.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(tail.as_bytes());
    body
}
