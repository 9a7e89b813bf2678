use crate::drive::DriveFile;
use crate::error::AppError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Fixed-length embedding of one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance, or `None` when the lengths disagree.
    pub fn distance(&self, other: &FaceDescriptor) -> Option<f32> {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }
}

/// The reference face a run compares every image against.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceFace {
    Image { file_name: String, bytes: Vec<u8> },
    Descriptor(FaceDescriptor),
}

impl ReferenceFace {
    /// Name reported as the matched identifier by local comparisons.
    pub fn label(&self) -> &str {
        match self {
            ReferenceFace::Image { file_name, .. } => file_name,
            ReferenceFace::Descriptor(_) => "reference descriptor",
        }
    }

    /// Hex SHA-256 of the reference content; equal references share a digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            ReferenceFace::Image { bytes, .. } => hasher.update(bytes),
            ReferenceFace::Descriptor(descriptor) => {
                for v in &descriptor.values {
                    hasher.update(v.to_le_bytes());
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchThreshold {
    /// Match when the reported confidence (0-100) is at least this value.
    MinConfidence(f32),
    /// Match when the descriptor distance is at most this value.
    MaxDistance(f32),
}

/// Parameters sent along with every comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareOptions {
    pub threshold: MatchThreshold,
    pub max_faces: u32,
}

/// Clean answer from a comparison backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Match { identifier: String, score: f32 },
    NoMatch,
    NoFace,
}

/// A target image as handed to a comparison backend.
pub struct TargetImage<'a> {
    pub file: &'a DriveFile,
    pub bytes: &'a [u8],
}

#[async_trait]
pub trait FaceComparisonService: Send + Sync {
    /// Backend name used in log lines.
    fn name(&self) -> &'static str;

    async fn compare(
        &self,
        reference: &ReferenceFace,
        target: TargetImage<'_>,
        options: CompareOptions,
    ) -> Result<Comparison, AppError>;
}
