use crate::config::{AppConfig, BackendKind, ListingMode};
use crate::drive::{
    extract_folder_id, DriveImageLister, FileListingService, ImageCollection, ImageFetcher,
};
use crate::error::AppError;
use crate::face::{CompareOptions, FaceComparisonService, FaceDescriptor, ReferenceFace};
use crate::face_clients::{descriptor::DescriptorClient, search_api::SearchApiClient};
use crate::listing_clients::{
    google_drive::{DriveContentFetcher, GoogleDriveClient},
    relay::RelayClient,
};
use crate::scanner::{FaceMatchScanner, ScanEvent, ScanReport};
use crossbeam_channel::Sender;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reads and checks a reference face from disk: an image, or a `.json`
/// array holding a precomputed descriptor.
pub fn read_reference(path: &Path) -> Result<ReferenceFace, AppError> {
    if !path.is_file() {
        return Err(AppError::InvalidInput(format!(
            "reference file {} does not exist",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "reference file {} is empty",
            path.display()
        )));
    }

    if path.extension().map_or(false, |e| e.eq_ignore_ascii_case("json")) {
        let values: Vec<f32> = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::InvalidInput(format!("{} is not a face descriptor: {}", path.display(), e))
        })?;
        if values.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "{} holds an empty descriptor",
                path.display()
            )));
        }
        return Ok(ReferenceFace::Descriptor(FaceDescriptor::new(values)));
    }

    let by_extension = mime_guess::from_path(path)
        .first()
        .map(|m| m.type_() == mime::IMAGE)
        .unwrap_or(false);
    if !by_extension && image::guess_format(&bytes).is_err() {
        return Err(AppError::InvalidInput(format!(
            "reference file {} is not an image",
            path.display()
        )));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "reference".into());
    Ok(ReferenceFace::Image { file_name, bytes })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSummary {
    pub folder_id: String,
    pub image_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceChange {
    Unchanged,
    Replaced,
}

/// Everything one user session works on: the listed folder, the active
/// reference face, and the stop signal of the scan started from them.
#[derive(Debug, Default)]
pub struct RunContext {
    folder_id: Option<String>,
    images: ImageCollection,
    reference: Option<ReferenceFace>,
    reference_digest: Option<String>,
    active_scan: Option<ActiveScan>,
}

#[derive(Debug)]
struct ActiveScan {
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

/// Owned inputs of a single scan, detached from the context that started it.
pub struct ScanJob {
    pub reference: ReferenceFace,
    pub images: ImageCollection,
    pub cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder_id(&self) -> Option<&str> {
        self.folder_id.as_deref()
    }

    pub fn images(&self) -> &ImageCollection {
        &self.images
    }

    /// Installs a new reference; a different face stops the running scan.
    pub fn set_reference(&mut self, reference: ReferenceFace) -> ReferenceChange {
        let digest = reference.digest();
        if self.reference_digest.as_deref() == Some(digest.as_str()) {
            log::debug!("Reference {} unchanged", &digest[..12]);
            return ReferenceChange::Unchanged;
        }

        if self.cancel_scan() {
            log::info!("Reference face changed; cancelled the running scan");
        }
        log::info!("Using reference face {} ({})", reference.label(), &digest[..12]);
        self.reference = Some(reference);
        self.reference_digest = Some(digest);
        ReferenceChange::Replaced
    }

    /// Stops the running scan, returning whether one was running.
    ///
    /// A scan that already ran to completion is forgotten without cancelling.
    pub fn cancel_scan(&mut self) -> bool {
        match self.active_scan.take() {
            Some(scan) if !scan.finished.load(Ordering::SeqCst) && !scan.cancel.is_cancelled() => {
                scan.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn replace_images(&mut self, folder_id: String, images: ImageCollection) {
        self.cancel_scan();
        self.folder_id = Some(folder_id);
        self.images = images;
    }

    /// Hands out the inputs of a fresh scan, cancelling any previous one.
    pub fn start_scan(&mut self) -> Result<ScanJob, AppError> {
        let reference = self
            .reference
            .clone()
            .ok_or_else(|| AppError::InvalidInput("upload a reference face first".into()))?;
        if self.images.is_empty() {
            return Err(AppError::InvalidInput("No images found in the folder.".into()));
        }

        self.cancel_scan();
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        self.active_scan = Some(ActiveScan {
            cancel: cancel.clone(),
            finished: finished.clone(),
        });
        Ok(ScanJob {
            reference,
            images: self.images.clone(),
            cancel,
            finished,
        })
    }
}

pub struct Finder {
    lister: DriveImageLister,
    scanner: FaceMatchScanner,
}

impl Finder {
    pub fn new(lister: DriveImageLister, scanner: FaceMatchScanner) -> Self {
        Self { lister, scanner }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let listing: Arc<dyn FileListingService> = match config.listing_mode {
            ListingMode::Direct => Arc::new(GoogleDriveClient::new(config)?),
            ListingMode::Relay => Arc::new(RelayClient::new(config)?),
        };
        let fetcher: Arc<dyn ImageFetcher> = Arc::new(DriveContentFetcher::new(config)?);
        let comparer: Arc<dyn FaceComparisonService> = match config.backend {
            BackendKind::SearchApi => Arc::new(SearchApiClient::new(config)?),
            BackendKind::Descriptor => Arc::new(DescriptorClient::new(config)?),
        };
        log::debug!(
            "Listing via {:?}, comparing with {}",
            config.listing_mode,
            comparer.name()
        );

        let options = CompareOptions {
            threshold: config.threshold(),
            max_faces: config.max_faces,
        };
        let scanner = FaceMatchScanner::new(fetcher, comparer, options)
            .with_delay(config.scan_delay())
            .with_timeout(config.request_timeout());
        Ok(Self::new(
            DriveImageLister::new(listing, config.request_timeout()),
            scanner,
        ))
    }

    /// Lists the folder behind `folder_url` into `ctx`, replacing what it held.
    pub async fn process_folder(
        &self,
        ctx: &mut RunContext,
        folder_url: &str,
        cancel: &CancellationToken,
    ) -> Result<FolderSummary, AppError> {
        let folder_id = extract_folder_id(folder_url)?;
        ctx.replace_images(folder_id.clone(), ImageCollection::new());

        let images = self.lister.list_images(&folder_id, cancel).await?;
        let summary = FolderSummary {
            folder_id: folder_id.clone(),
            image_count: images.len(),
        };
        if images.is_empty() {
            log::info!("No images found in folder {}", folder_id);
        }
        ctx.replace_images(folder_id, images);
        Ok(summary)
    }

    pub async fn run_scan(&self, job: ScanJob, events: Option<&Sender<ScanEvent>>) -> ScanReport {
        let report = self
            .scanner
            .scan(&job.reference, &job.images, &job.cancel, events)
            .await;
        job.finished.store(true, Ordering::SeqCst);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::MatchThreshold;
    use crate::scanner::{Counters, MatchOutcome};
    use crate::test_support::{drive_file, reference, FakeComparer, FakeFetcher, FakeListing, Scripted};
    use std::time::Duration;

    const FOLDER_URL: &str = "https://drive.google.com/drive/folders/folder-A?usp=sharing";

    fn finder(listing: Arc<FakeListing>, comparer: Arc<FakeComparer>) -> Finder {
        let scanner = FaceMatchScanner::new(
            Arc::new(FakeFetcher::default()),
            comparer,
            CompareOptions {
                threshold: MatchThreshold::MinConfidence(70.0),
                max_faces: 1,
            },
        )
        .with_delay(Duration::from_millis(1));
        Finder::new(DriveImageLister::new(listing, Duration::from_secs(5)), scanner)
    }

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("face-finder-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn two_pages_three_images_two_matches() {
        let listing = Arc::new(FakeListing::with_pages(vec![
            vec![drive_file("file1", "image/jpeg"), drive_file("doc1", "application/pdf")],
            vec![
                drive_file("file2", "image/png"),
                drive_file("doc2", "text/plain"),
                drive_file("file3", "image/jpeg"),
            ],
        ]));
        let comparer = Arc::new(
            FakeComparer::default()
                .with("file1", Scripted::Match)
                .with("file3", Scripted::Match),
        );
        let finder = finder(listing, comparer);
        let mut ctx = RunContext::new();

        let summary = finder
            .process_folder(&mut ctx, FOLDER_URL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            summary,
            FolderSummary {
                folder_id: "folder-A".into(),
                image_count: 3
            }
        );

        ctx.set_reference(reference());
        let report = finder.run_scan(ctx.start_scan().unwrap(), None).await;
        let outcomes: Vec<(&str, MatchOutcome)> = report
            .results
            .iter()
            .map(|r| (r.file.id.as_str(), r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("file1", MatchOutcome::Matched),
                ("file2", MatchOutcome::NotMatched),
                ("file3", MatchOutcome::Matched),
            ]
        );
        assert_eq!(
            report.counters,
            Counters {
                matched: 2,
                not_matched: 1
            }
        );
    }

    #[tokio::test]
    async fn empty_folder_never_reaches_the_scanner() {
        let listing = Arc::new(FakeListing::with_pages(vec![vec![drive_file(
            "doc",
            "application/pdf",
        )]]));
        let comparer = Arc::new(FakeComparer::default());
        let finder = finder(listing, comparer.clone());
        let mut ctx = RunContext::new();
        ctx.set_reference(reference());

        let summary = finder
            .process_folder(&mut ctx, FOLDER_URL, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.image_count, 0);
        assert!(matches!(ctx.start_scan(), Err(AppError::InvalidInput(_))));
        assert!(comparer.seen().is_empty());
    }

    #[tokio::test]
    async fn invalid_folder_url_makes_no_remote_call() {
        let listing = Arc::new(FakeListing::with_pages(vec![vec![]]));
        let finder = finder(listing.clone(), Arc::new(FakeComparer::default()));
        let mut ctx = RunContext::new();

        let err = finder
            .process_folder(&mut ctx, "https://drive.google.com/file/d/abc/view", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(listing.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_listing_leaves_no_stale_images() {
        let listing = Arc::new(
            FakeListing::with_pages(vec![vec![drive_file("a", "image/png")], vec![]])
                .failing_at(1, "quota exceeded"),
        );
        let finder = finder(listing, Arc::new(FakeComparer::default()));
        let mut ctx = RunContext::new();

        let err = finder
            .process_folder(&mut ctx, FOLDER_URL, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Listing(_)));
        assert!(ctx.images().is_empty());
    }

    #[tokio::test]
    async fn new_reference_cancels_the_running_scan() {
        let listing = Arc::new(FakeListing::with_pages(vec![vec![
            drive_file("a", "image/png"),
            drive_file("b", "image/png"),
        ]]));
        let comparer = Arc::new(FakeComparer::default().with("a", Scripted::Hang));
        let finder = Arc::new(finder(listing, comparer));
        let mut ctx = RunContext::new();
        finder
            .process_folder(&mut ctx, FOLDER_URL, &CancellationToken::new())
            .await
            .unwrap();
        ctx.set_reference(reference());

        let job = ctx.start_scan().unwrap();
        let running = {
            let finder = finder.clone();
            tokio::spawn(async move { finder.run_scan(job, None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let change = ctx.set_reference(ReferenceFace::Image {
            file_name: "other.jpg".into(),
            bytes: b"someone else".to_vec(),
        });
        assert_eq!(change, ReferenceChange::Replaced);

        let report = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("scan stopped")
            .unwrap();
        assert!(report.cancelled);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn new_reference_after_a_finished_scan_cancels_nothing() {
        let listing = Arc::new(FakeListing::with_pages(vec![vec![drive_file("a", "image/png")]]));
        let finder = finder(listing, Arc::new(FakeComparer::default()));
        let mut ctx = RunContext::new();
        finder
            .process_folder(&mut ctx, FOLDER_URL, &CancellationToken::new())
            .await
            .unwrap();
        ctx.set_reference(reference());

        let job = ctx.start_scan().unwrap();
        let token = job.cancel.clone();
        let report = finder.run_scan(job, None).await;
        assert!(!report.cancelled);

        let change = ctx.set_reference(ReferenceFace::Image {
            file_name: "other.jpg".into(),
            bytes: b"someone else".to_vec(),
        });
        assert_eq!(change, ReferenceChange::Replaced);
        assert!(!token.is_cancelled());
        assert!(!ctx.cancel_scan());
    }

    #[test]
    fn identical_reference_keeps_the_scan_running() {
        let mut ctx = RunContext::new();
        assert_eq!(ctx.set_reference(reference()), ReferenceChange::Replaced);
        ctx.images.extend_images(vec![drive_file("a", "image/png")]);
        let job = ctx.start_scan().unwrap();

        assert_eq!(ctx.set_reference(reference()), ReferenceChange::Unchanged);
        assert!(!job.cancel.is_cancelled());
    }

    #[test]
    fn scan_needs_a_reference() {
        let mut ctx = RunContext::new();
        ctx.images.extend_images(vec![drive_file("a", "image/png")]);
        assert!(matches!(ctx.start_scan(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn reference_files_are_validated() {
        let png_magic = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

        let by_name = read_reference(&temp_file("me.jpg", b"jpeg-ish")).unwrap();
        assert_eq!(by_name.label(), "me.jpg");

        let sniffed = read_reference(&temp_file("upload.bin", png_magic)).unwrap();
        assert!(matches!(sniffed, ReferenceFace::Image { .. }));

        let descriptor = read_reference(&temp_file("reference.json", b"[0.1, 0.2, 0.3]")).unwrap();
        assert_eq!(
            descriptor,
            ReferenceFace::Descriptor(FaceDescriptor::new(vec![0.1, 0.2, 0.3]))
        );

        for path in [
            temp_file("notes.txt", b"just text"),
            temp_file("empty.jpg", b""),
            temp_file("bad.json", b"{\"not\": \"a list\"}"),
            std::env::temp_dir().join("face-finder-missing.jpg"),
        ] {
            assert!(
                matches!(read_reference(&path), Err(AppError::InvalidInput(_))),
                "accepted {}",
                path.display()
            );
        }
    }
}
