pub mod google_drive;
pub mod relay;

use crate::drive::FileListPage;
use crate::error::AppError;
use serde_json::Value;
use std::time::Duration;

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Decodes a listing response from Drive or from a relay.
///
/// Both report failures as an `error` member, Drive as `{message}` and the
/// relay as a bare string.
pub(crate) async fn read_page(response: reqwest::Response) -> Result<FileListPage, AppError> {
    let status = response.status();
    let body: Value = response.json().await.map_err(|e| {
        AppError::Listing(format!("unreadable listing response ({}): {}", status, e))
    })?;

    if let Some(error) = body.get("error") {
        return Err(AppError::Listing(error_message(error)));
    }
    if !status.is_success() {
        return Err(AppError::Listing(format!(
            "listing request failed with status {}",
            status
        )));
    }

    serde_json::from_value(body)
        .map_err(|e| AppError::Listing(format!("malformed listing page: {}", e)))
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    }
}
