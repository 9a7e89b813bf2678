//! Fakes for the remote capabilities, shared by the module tests.

use crate::drive::{DriveFile, FileListPage, FileListingService, ImageFetcher};
use crate::error::AppError;
use crate::face::{CompareOptions, Comparison, FaceComparisonService, ReferenceFace, TargetImage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub fn drive_file(id: &str, mime_type: &str) -> DriveFile {
    DriveFile {
        id: id.to_string(),
        name: format!("{}.file", id),
        mime_type: mime_type.to_string(),
    }
}

pub fn reference() -> ReferenceFace {
    ReferenceFace::Image {
        file_name: "reference.jpg".into(),
        bytes: b"reference".to_vec(),
    }
}

/// Serves pre-built pages chained by `page-N` tokens.
pub struct FakeListing {
    pages: Vec<Vec<DriveFile>>,
    fail_at: Option<(usize, String)>,
    latency: Duration,
    calls: Mutex<Vec<Option<String>>>,
}

impl FakeListing {
    pub fn with_pages(pages: Vec<Vec<DriveFile>>) -> Self {
        Self {
            pages,
            fail_at: None,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, page: usize, message: &str) -> Self {
        self.fail_at = Some((page, message.to_string()));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileListingService for FakeListing {
    async fn list(
        &self,
        _folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push(page_token.map(str::to_string));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let index = match page_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| AppError::Listing(format!("unknown page token {}", token)))?,
        };
        if let Some((page, message)) = &self.fail_at {
            if *page == index {
                return Err(AppError::Listing(message.clone()));
            }
        }

        let files = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = if index + 1 < self.pages.len() {
            Some(format!("page-{}", index + 1))
        } else {
            None
        };
        Ok(FileListPage {
            files,
            next_page_token,
        })
    }
}

/// Returns the file id as the image bytes; fails for listed ids.
#[derive(Default)]
pub struct FakeFetcher {
    pub failing: Vec<String>,
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, file: &DriveFile) -> Result<Vec<u8>, AppError> {
        if self.failing.contains(&file.id) {
            return Err(AppError::Comparison(format!("download of {} failed", file.id)));
        }
        Ok(file.id.as_bytes().to_vec())
    }
}

#[derive(Clone)]
pub enum Scripted {
    Match,
    NoMatch,
    NoFace,
    Fail(String),
    Hang,
}

/// Answers per file id from a script; unscripted ids get `NoMatch`.
#[derive(Default)]
pub struct FakeComparer {
    script: HashMap<String, Scripted>,
    seen: Mutex<Vec<String>>,
}

impl FakeComparer {
    pub fn with(mut self, id: &str, answer: Scripted) -> Self {
        self.script.insert(id.to_string(), answer);
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl FaceComparisonService for FakeComparer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn compare(
        &self,
        _reference: &ReferenceFace,
        target: TargetImage<'_>,
        _options: CompareOptions,
    ) -> Result<Comparison, AppError> {
        self.seen.lock().unwrap().push(target.file.id.clone());
        match self
            .script
            .get(&target.file.id)
            .cloned()
            .unwrap_or(Scripted::NoMatch)
        {
            Scripted::Match => Ok(Comparison::Match {
                identifier: format!("face-{}", target.file.id),
                score: 99.0,
            }),
            Scripted::NoMatch => Ok(Comparison::NoMatch),
            Scripted::NoFace => Ok(Comparison::NoFace),
            Scripted::Fail(message) => Err(AppError::Comparison(message)),
            Scripted::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Comparison::NoMatch)
            }
        }
    }
}
