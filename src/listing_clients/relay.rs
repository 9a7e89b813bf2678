use crate::config::AppConfig;
use crate::drive::{FileListPage, FileListingService};
use crate::error::AppError;
use crate::listing_clients::{http_client, read_page};
use async_trait::async_trait;
use serde::Serialize;
use url::Url;

pub const RELAY_ROUTE: &str = "fetch_drive_files";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    folder_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<&'a str>,
}

/// Lists folders through a relay server that keeps the Drive key to itself.
pub struct RelayClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl RelayClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let base = config
            .relay_url
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("relay_url is required in relay mode".into()))?;
        let endpoint = Url::parse(&format!("{}/", base.trim_end_matches('/')))
            .and_then(|u| u.join(RELAY_ROUTE))
            .map_err(|e| AppError::InvalidInput(format!("invalid relay_url: {}", e)))?;
        log::debug!("Creating relay client for endpoint: {}", endpoint);

        Ok(Self {
            client: http_client(config.request_timeout())?,
            endpoint,
        })
    }
}

#[async_trait]
impl FileListingService for RelayClient {
    async fn list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, AppError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RelayRequest {
                folder_id,
                next_page_token: page_token,
            })
            .send()
            .await?;
        read_page(response).await
    }
}
