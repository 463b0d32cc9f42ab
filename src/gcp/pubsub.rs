use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use super::{ApiError, GcpClient};

const PUBSUB_API: &str = "https://pubsub.googleapis.com/v1";

pub fn topic_path(project: &str, topic: &str) -> String {
    format!("projects/{}/topics/{}", project, topic)
}

fn publish_body(text: &str) -> Value {
    json!({ "messages": [ { "data": STANDARD.encode(text.as_bytes()) } ] })
}

/// Publish one UTF-8 message; returns the server-assigned message ids.
pub async fn publish(gcp: &GcpClient, topic: &str, text: &str) -> Result<Vec<String>, ApiError> {
    let path = topic_path(gcp.project(), topic);
    let url = format!("{}/{}:publish", PUBSUB_API, path);
    let response = gcp
        .send_json(gcp.request(Method::POST, &url).json(&publish_body(text)))
        .await?;
    let ids: Vec<String> = response["messageIds"]
        .as_array()
        .map(|ids| ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        return Err(ApiError::Decode {
            url,
            reason: "no messageIds in publish response".into(),
        });
    }
    info!("Published '{}' to {} ({})", text, path, ids.join(","));
    Ok(ids)
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("event is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("event data is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Message that triggered a run. Accepts the background-function shape
/// (`{"data": ...}`) and the push-subscription shape (`{"message": {"data": ...}}`).
#[derive(Debug, Default, Deserialize)]
pub struct TriggerEvent {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<PushMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct PushMessage {
    #[serde(default)]
    data: Option<String>,
}

impl TriggerEvent {
    pub fn parse(raw: &str) -> Result<Self, TriggerError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Decoded message text, `None` when the event carries no data.
    pub fn text(&self) -> Result<Option<String>, TriggerError> {
        let encoded = self
            .data
            .as_deref()
            .or_else(|| self.message.as_ref()?.data.as_deref());
        match encoded {
            None => Ok(None),
            Some(b64) => Ok(Some(String::from_utf8(STANDARD.decode(b64.trim())?)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_event() {
        let ev = TriggerEvent::parse(r#"{"data":"UHJvY2VlZCB3aXRoIEZvcmVjYXN0"}"#).unwrap();
        assert_eq!(ev.text().unwrap().as_deref(), Some("Proceed with Forecast"));
    }

    #[test]
    fn push_event() {
        let ev = TriggerEvent::parse(
            r#"{"message":{"data":"aGVsbG8=","messageId":"1"},"subscription":"projects/p/subscriptions/s"}"#,
        )
        .unwrap();
        assert_eq!(ev.text().unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn event_without_data() {
        let ev = TriggerEvent::parse("{}").unwrap();
        assert_eq!(ev.text().unwrap(), None);
    }

    #[test]
    fn bad_payloads() {
        assert!(matches!(TriggerEvent::parse("not json"), Err(TriggerError::Json(_))));
        let ev = TriggerEvent::parse(r#"{"data":"%%%"}"#).unwrap();
        assert!(matches!(ev.text(), Err(TriggerError::Base64(_))));
        // 0xFF 0xFE is not UTF-8
        let ev = TriggerEvent::parse(r#"{"data":"//4="}"#).unwrap();
        assert!(matches!(ev.text(), Err(TriggerError::Utf8(_))));
    }

    #[test]
    fn publish_body_is_base64() {
        let body = publish_body("Proceed with Forecast");
        assert_eq!(body["messages"][0]["data"], "UHJvY2VlZCB3aXRoIEZvcmVjYXN0");
        assert_eq!(topic_path("p", "bq-forecast"), "projects/p/topics/bq-forecast");
    }
}
