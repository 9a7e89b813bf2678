use crate::drive::{DriveFile, ImageCollection, ImageFetcher};
use crate::error::AppError;
use crate::face::{CompareOptions, Comparison, FaceComparisonService, ReferenceFace, TargetImage};
use crossbeam_channel::Sender;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NotMatched,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub file: DriveFile,
    pub outcome: MatchOutcome,
    /// Matched identifier for `Matched`, error message for `Errored`.
    pub detail: Option<String>,
}

impl MatchResult {
    fn matched(file: &DriveFile, identifier: String) -> Self {
        Self {
            file: file.clone(),
            outcome: MatchOutcome::Matched,
            detail: Some(identifier),
        }
    }

    fn not_matched(file: &DriveFile) -> Self {
        Self {
            file: file.clone(),
            outcome: MatchOutcome::NotMatched,
            detail: None,
        }
    }

    fn errored(file: &DriveFile, error: AppError) -> Self {
        Self {
            file: file.clone(),
            outcome: MatchOutcome::Errored,
            detail: Some(error.to_string()),
        }
    }
}

/// Running totals; errored results count as not matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub matched: usize,
    pub not_matched: usize,
}

impl Counters {
    pub fn record(&mut self, outcome: MatchOutcome) {
        match outcome {
            MatchOutcome::Matched => self.matched += 1,
            MatchOutcome::NotMatched | MatchOutcome::Errored => self.not_matched += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.matched + self.not_matched
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub results: Vec<MatchResult>,
    pub counters: Counters,
    pub cancelled: bool,
}

/// Progress published while a scan runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Result {
        result: MatchResult,
        counters: Counters,
    },
    Finished {
        counters: Counters,
        cancelled: bool,
    },
}

pub struct FaceMatchScanner {
    fetcher: Arc<dyn ImageFetcher>,
    comparer: Arc<dyn FaceComparisonService>,
    options: CompareOptions,
    delay: Duration,
    timeout: Duration,
}

impl FaceMatchScanner {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        comparer: Arc<dyn FaceComparisonService>,
        options: CompareOptions,
    ) -> Self {
        Self {
            fetcher,
            comparer,
            options,
            delay: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compares `reference` against every image, strictly in collection order.
    ///
    /// Per-image failures become `Errored` results. Cancellation stops the
    /// scan at the next suspend point; the image in flight gets no result.
    pub async fn scan(
        &self,
        reference: &ReferenceFace,
        images: &ImageCollection,
        cancel: &CancellationToken,
        events: Option<&Sender<ScanEvent>>,
    ) -> ScanReport {
        log::info!(
            "Scanning {} images with the {} backend",
            images.len(),
            self.comparer.name()
        );
        let mut report = ScanReport::default();

        for (index, file) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                result = self.scan_one(reference, file) => result,
            };

            report.counters.record(result.outcome);
            match result.outcome {
                MatchOutcome::Matched => log::debug!(
                    "Match found in {} ({})",
                    file.name,
                    result.detail.as_deref().unwrap_or_default()
                ),
                MatchOutcome::NotMatched => log::debug!("No match in {}", file.name),
                MatchOutcome::Errored => log::warn!(
                    "Error processing {}: {}",
                    file.name,
                    result.detail.as_deref().unwrap_or_default()
                ),
            }
            publish(
                events,
                ScanEvent::Result {
                    result: result.clone(),
                    counters: report.counters,
                },
            );
            report.results.push(result);

            // Throttle between remote calls.
            if index + 1 < images.len() && !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }

        log::info!(
            "Scan {}: {} matched, {} not matched",
            if report.cancelled { "cancelled" } else { "finished" },
            report.counters.matched,
            report.counters.not_matched
        );
        publish(
            events,
            ScanEvent::Finished {
                counters: report.counters,
                cancelled: report.cancelled,
            },
        );
        report
    }

    async fn scan_one(&self, reference: &ReferenceFace, file: &DriveFile) -> MatchResult {
        log::trace!("Fetching {} ({})", file.name, file.id);
        let bytes = match self.timed(self.fetcher.fetch(file)).await {
            Ok(bytes) => bytes,
            Err(e) => return MatchResult::errored(file, e),
        };

        let target = TargetImage {
            file,
            bytes: &bytes,
        };
        match self
            .timed(self.comparer.compare(reference, target, self.options))
            .await
        {
            Ok(Comparison::Match { identifier, score }) => {
                log::trace!("{} matched {} with score {}", file.name, identifier, score);
                MatchResult::matched(file, identifier)
            }
            Ok(Comparison::NoMatch) | Ok(Comparison::NoFace) => MatchResult::not_matched(file),
            Err(e) => MatchResult::errored(file, e),
        }
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(AppError::Timeout(self.timeout)))
    }
}

fn publish(events: Option<&Sender<ScanEvent>>, event: ScanEvent) {
    if let Some(tx) = events {
        if tx.send(event).is_err() {
            log::trace!("Scan progress receiver is gone");
        }
    }
}
