//! Response handling shared by the Face API and Graph clients.

use std::time::Duration;

use facefinder_core::ServiceError;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `{"error": {"code": "...", "message": "..."}}`, used by both services.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub(crate) fn build_client() -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ServiceError::Transport(format!("failed to build HTTP client: {e}")))
}

/// Append percent-encoded path segments to a base URL.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, ServiceError> {
    let mut url = Url::parse(base)
        .map_err(|e| ServiceError::Transport(format!("invalid endpoint {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ServiceError::Transport(format!("endpoint {base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn transport(e: reqwest::Error) -> ServiceError {
    ServiceError::Transport(e.to_string())
}

/// Convert a non-success response into a [`ServiceError`], decoding the
/// error envelope when the body carries one.
pub(crate) async fn error_from(response: Response) -> ServiceError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return ServiceError::Unauthorized;
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => (envelope.error.code, envelope.error.message),
        Err(_) => (None, None),
    };

    let message = message
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

    ServiceError::Service {
        status: status.as_u16(),
        code,
        message,
    }
}

/// Decode a JSON body, failing with the service error if the status is not `expected`.
pub(crate) async fn expect_json<T: DeserializeOwned>(
    response: Response,
    expected: StatusCode,
) -> Result<T, ServiceError> {
    if response.status() != expected {
        return Err(error_from(response).await);
    }
    let bytes = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| ServiceError::Decode(e.to_string()))
}

/// Succeed on any of `accepted`, discarding the body.
pub(crate) async fn expect_status(
    response: Response,
    accepted: &[StatusCode],
) -> Result<StatusCode, ServiceError> {
    let status = response.status();
    if accepted.contains(&status) {
        Ok(status)
    } else {
        Err(error_from(response).await)
    }
}
