use crate::config::AppConfig;
use crate::drive::{DriveFile, FileListPage, FileListingService, ImageFetcher, LIST_FIELDS};
use crate::error::AppError;
use crate::listing_clients::{http_client, read_page};
use async_trait::async_trait;
use url::Url;

/// Talks to the Drive v3 files endpoint with an API key.
pub struct GoogleDriveClient {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    page_size: u32,
}

impl GoogleDriveClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let api_key = config
            .drive_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::InvalidInput("Google API Key is not defined".into()))?;
        let api_url = Url::parse(&config.drive_api_url)
            .map_err(|e| AppError::InvalidInput(format!("invalid drive_api_url: {}", e)))?;
        log::debug!("Creating Drive client for URL: {}", api_url);

        Ok(Self {
            client: http_client(config.request_timeout())?,
            api_url,
            api_key,
            page_size: config.page_size(),
        })
    }

    fn list_url(&self, folder_id: &str, page_token: Option<&str>) -> Url {
        let mut url = self.api_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("q", &format!("'{}' in parents", folder_id))
                .append_pair("key", &self.api_key)
                .append_pair("fields", LIST_FIELDS)
                .append_pair("pageSize", &self.page_size.to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        url
    }
}

#[async_trait]
impl FileListingService for GoogleDriveClient {
    async fn list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, AppError> {
        let url = self.list_url(folder_id, page_token);
        log::trace!("Requesting Drive page for folder {} (token {:?})", folder_id, page_token);
        let response = self.client.get(url).send().await?;
        read_page(response).await
    }
}

/// Downloads image bytes from each file's direct-content URL.
pub struct DriveContentFetcher {
    client: reqwest::Client,
    content_url: Url,
}

impl DriveContentFetcher {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let content_url = Url::parse(&config.drive_content_url)
            .map_err(|e| AppError::InvalidInput(format!("invalid drive_content_url: {}", e)))?;
        Ok(Self {
            client: http_client(config.request_timeout())?,
            content_url,
        })
    }
}

#[async_trait]
impl ImageFetcher for DriveContentFetcher {
    async fn fetch(&self, file: &DriveFile) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(file.content_url(&self.content_url))
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::Comparison(format!("{} downloaded empty", file.name)));
        }
        Ok(bytes.to_vec())
    }
}
