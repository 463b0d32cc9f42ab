use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tracing::info;

use super::{ApiError, GcpClient};

const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";
const PUBLIC_HOST: &str = "https://storage.googleapis.com";

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Upload `body` as `gs://bucket/object`, readable by anyone.
/// Returns the public URL of the object.
pub async fn upload_public(
    gcp: &GcpClient,
    bucket: &str,
    object: &str,
    body: Vec<u8>,
    content_type: &str,
) -> Result<String, ApiError> {
    let url = format!("{}/b/{}/o", UPLOAD_API, bucket);
    let size = body.len();
    let req = gcp
        .request(Method::POST, &url)
        .query(&[
            ("uploadType", "media"),
            ("name", object),
            ("predefinedAcl", "publicRead"),
        ])
        .header(CONTENT_TYPE, content_type)
        .body(body);
    let stored = gcp.send_json(req).await?;
    info!(
        "Uploaded gs://{}/{} ({} bytes, generation {})",
        bucket,
        object,
        size,
        stored["generation"].as_str().unwrap_or("?")
    );
    Ok(public_url(bucket, object))
}

pub fn public_url(bucket: &str, object: &str) -> String {
    format!("{}/{}/{}", PUBLIC_HOST, bucket, object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_layout() {
        assert_eq!(
            public_url("statmike-internal-site", "bq-timeline/bqplot.html"),
            "https://storage.googleapis.com/statmike-internal-site/bq-timeline/bqplot.html"
        );
    }
}
