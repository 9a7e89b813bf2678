use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fields requested from the Drive files endpoint.
pub const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

impl DriveFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Direct-content URL the image bytes are downloaded from, below `base`
    /// (normally `https://drive.google.com/uc`).
    pub fn content_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        url.query_pairs_mut()
            .append_pair("export", "download")
            .append_pair("id", &self.id);
        url
    }

    /// URL a person opens to look at the file in Drive.
    pub fn view_url(&self) -> String {
        format!("https://drive.google.com/file/d/{}/view", self.id)
    }
}

/// One page of a folder listing, in the shape the Drive API returns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListPage {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

pub fn filter_images(files: Vec<DriveFile>) -> Vec<DriveFile> {
    files.into_iter().filter(DriveFile::is_image).collect()
}

/// Image files of one folder, in page order then within-page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCollection {
    files: Vec<DriveFile>,
}

impl ImageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the image entries of `files`, dropping everything else.
    pub fn extend_images(&mut self, files: Vec<DriveFile>) -> usize {
        let before = self.files.len();
        self.files.extend(filter_images(files));
        self.files.len() - before
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DriveFile> {
        self.files.iter()
    }
}

impl<'a> IntoIterator for &'a ImageCollection {
    type Item = &'a DriveFile;
    type IntoIter = std::slice::Iter<'a, DriveFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Pulls the folder identifier out of a share URL such as
/// `https://drive.google.com/drive/folders/<id>?usp=sharing`.
pub fn extract_folder_id(folder_url: &str) -> Result<String, AppError> {
    let invalid = || AppError::InvalidInput(format!("not a Drive folder URL: {:?}", folder_url));

    let trimmed = folder_url.trim();
    // Links pasted from the address bar often lack the scheme.
    let url = Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{}", trimmed)))
        .map_err(|_| invalid())?;
    let mut segments = url.path_segments().ok_or_else(invalid)?;
    segments.by_ref().find(|s| *s == "folders").ok_or_else(invalid)?;

    match segments.next() {
        Some(id)
            if !id.is_empty()
                && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            Ok(id.to_string())
        }
        _ => Err(invalid()),
    }
}

#[async_trait]
pub trait FileListingService: Send + Sync {
    async fn list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, AppError>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, file: &DriveFile) -> Result<Vec<u8>, AppError>;
}

pub struct DriveImageLister {
    service: Arc<dyn FileListingService>,
    timeout: Duration,
}

impl DriveImageLister {
    pub fn new(service: Arc<dyn FileListingService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Walks every page of the folder and returns its images.
    ///
    /// Any failing page aborts the whole listing; nothing partial is returned.
    pub async fn list_images(
        &self,
        folder_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ImageCollection, AppError> {
        if folder_id.trim().is_empty() {
            return Err(AppError::InvalidInput("folder id is empty".into()));
        }

        log::info!("Listing images in Drive folder {}", folder_id);
        let mut images = ImageCollection::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let request = self.service.list(folder_id, page_token.as_deref());
            let page = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                result = tokio::time::timeout(self.timeout, request) => match result {
                    Ok(Ok(page)) => page,
                    Ok(Err(e)) => return Err(e.into_listing()),
                    Err(_) => return Err(AppError::Timeout(self.timeout).into_listing()),
                },
            };

            pages += 1;
            let returned = page.files.len();
            let kept = images.extend_images(page.files);
            log::debug!(
                "Page {} of folder {}: {} entries, {} images",
                pages,
                folder_id,
                returned,
                kept
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    log::trace!("Continuing folder {} with page token {}", folder_id, token);
                    page_token = Some(token);
                }
                None => break,
            }
        }

        log::info!(
            "Found {} images in folder {} across {} page(s)",
            images.len(),
            folder_id,
            pages
        );
        Ok(images)
    }
}
