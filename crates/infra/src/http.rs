//! Shared plumbing for the reqwest-backed collaborator clients.

use reqwest::Response;
use serde_json::Value as JsonValue;

use crate::error::CollaboratorError;

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Map any non-2xx response to `UnexpectedStatus`, keeping the body for logs.
pub(crate) async fn ensure_success(resp: Response) -> Result<Response, CollaboratorError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CollaboratorError::UnexpectedStatus {
        status: status.as_u16(),
        body,
    })
}

/// Positions come back either as a bare JSON number or as a decimal string.
pub(crate) async fn read_position(resp: Response) -> Result<u64, CollaboratorError> {
    let body = ensure_success(resp).await?.text().await?;
    parse_position(&body)
}

fn parse_position(body: &str) -> Result<u64, CollaboratorError> {
    let value: JsonValue = serde_json::from_str(body.trim())
        .map_err(|e| CollaboratorError::Decode(format!("position: {e}")))?;
    match &value {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| CollaboratorError::Decode(format!("position: unexpected value {value}")))
}
