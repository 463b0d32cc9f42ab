use serde::Deserialize;
use tracing::{debug, info};

use super::ApiError;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// Bearer token for REST calls: the configured one if set, otherwise the
/// default service account's token from the metadata server.
pub async fn access_token(
    http: &reqwest::Client,
    configured: Option<&str>,
) -> Result<String, ApiError> {
    if let Some(token) = configured.map(str::trim).filter(|t| !t.is_empty()) {
        debug!("Using configured access token");
        return Ok(token.to_string());
    }

    let response = http
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| ApiError::Auth(format!("metadata server unreachable: {}", e)))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Auth(format!("metadata server returned {}", status)));
    }
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| ApiError::Auth(format!("bad token response: {}", e)))?;
    info!("Obtained service account token (expires in {}s)", token.expires_in);
    Ok(token.access_token)
}
