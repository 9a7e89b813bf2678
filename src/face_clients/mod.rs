pub mod descriptor;
pub mod search_api;

use crate::error::AppError;
use reqwest::multipart::Part;
use serde_json::Value;
use url::Url;

pub(crate) fn endpoint(base: &str, route: &str) -> Result<Url, AppError> {
    Url::parse(&format!("{}/", base.trim_end_matches('/')))
        .and_then(|u| u.join(route))
        .map_err(|e| AppError::InvalidInput(format!("invalid face_api_url: {}", e)))
}

pub(crate) fn image_part(bytes: &[u8], file_name: &str, mime_type: &str) -> Result<Part, AppError> {
    Ok(Part::bytes(bytes.to_vec())
        .file_name(file_name.to_string())
        .mime_str(mime_type)?)
}

/// Reads a backend JSON reply, turning `{"error": ...}` or a failed status
/// into a comparison error.
pub(crate) async fn read_reply(response: reqwest::Response) -> Result<Value, AppError> {
    let status = response.status();
    let body: Value = response.json().await.map_err(|e| {
        AppError::Comparison(format!("unreadable backend reply ({}): {}", status, e))
    })?;

    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AppError::Comparison(message));
    }
    if !status.is_success() {
        return Err(AppError::Comparison(format!(
            "backend answered with status {}",
            status
        )));
    }
    Ok(body)
}
