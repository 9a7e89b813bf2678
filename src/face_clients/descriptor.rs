use crate::config::AppConfig;
use crate::error::AppError;
use crate::face::{
    CompareOptions, Comparison, FaceComparisonService, FaceDescriptor, MatchThreshold,
    ReferenceFace, TargetImage,
};
use crate::face_clients::{endpoint, image_part, read_reply};
use crate::listing_clients::http_client;
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Deserialize)]
struct AnalyzeReply {
    #[serde(default)]
    faces: Vec<AnalyzedFace>,
}

#[derive(Debug, Deserialize)]
struct AnalyzedFace {
    descriptor: Vec<f32>,
}

/// Extracts descriptors through `/analyze_face` and compares them locally by
/// Euclidean distance.
pub struct DescriptorClient {
    client: reqwest::Client,
    analyze_url: Url,
    /// Descriptor of the last reference image, keyed by its digest.
    reference_cache: Mutex<Option<(String, FaceDescriptor)>>,
}

impl DescriptorClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let analyze_url = endpoint(&config.face_api_url, "analyze_face")?;
        log::debug!("Creating face analysis client for URL: {}", analyze_url);
        Ok(Self {
            client: http_client(config.request_timeout())?,
            analyze_url,
            reference_cache: Mutex::new(None),
        })
    }

    /// Descriptor of the first face found, if any.
    async fn analyze(
        &self,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
        max_faces: u32,
    ) -> Result<Option<FaceDescriptor>, AppError> {
        let form = Form::new()
            .part("image", image_part(bytes, file_name, mime_type)?)
            .text("max_faces", max_faces.to_string());
        let response = self
            .client
            .post(self.analyze_url.clone())
            .multipart(form)
            .send()
            .await?;
        let reply: AnalyzeReply = serde_json::from_value(read_reply(response).await?)?;
        Ok(reply
            .faces
            .into_iter()
            .next()
            .map(|face| FaceDescriptor::new(face.descriptor)))
    }

    async fn reference_descriptor(
        &self,
        reference: &ReferenceFace,
        max_faces: u32,
    ) -> Result<FaceDescriptor, AppError> {
        let (file_name, bytes) = match reference {
            ReferenceFace::Descriptor(descriptor) => return Ok(descriptor.clone()),
            ReferenceFace::Image { file_name, bytes } => (file_name, bytes),
        };

        let digest = reference.digest();
        if let Some((cached_digest, descriptor)) = self.cached() {
            if cached_digest == digest {
                return Ok(descriptor);
            }
        }

        let mime_type = mime_guess::from_path(file_name).first_or_octet_stream();
        let descriptor = self
            .analyze(bytes, file_name, mime_type.as_ref(), max_faces)
            .await?
            .ok_or_else(|| AppError::Comparison("no face detected in the reference image".into()))?;
        log::debug!("Computed descriptor for reference {}", file_name);

        if let Ok(mut cache) = self.reference_cache.lock() {
            *cache = Some((digest, descriptor.clone()));
        }
        Ok(descriptor)
    }

    fn cached(&self) -> Option<(String, FaceDescriptor)> {
        self.reference_cache.lock().ok().and_then(|c| c.clone())
    }
}

#[async_trait]
impl FaceComparisonService for DescriptorClient {
    fn name(&self) -> &'static str {
        "descriptor"
    }

    async fn compare(
        &self,
        reference: &ReferenceFace,
        target: TargetImage<'_>,
        options: CompareOptions,
    ) -> Result<Comparison, AppError> {
        let max_distance = match options.threshold {
            MatchThreshold::MaxDistance(d) => d,
            MatchThreshold::MinConfidence(_) => {
                return Err(AppError::Comparison(
                    "descriptor backend expects a distance threshold".into(),
                ))
            }
        };

        let wanted = self.reference_descriptor(reference, options.max_faces).await?;
        let candidate = match self
            .analyze(
                target.bytes,
                &target.file.name,
                &target.file.mime_type,
                options.max_faces,
            )
            .await?
        {
            Some(descriptor) => descriptor,
            None => return Ok(Comparison::NoFace),
        };

        let distance = wanted.distance(&candidate).ok_or_else(|| {
            AppError::Comparison(format!(
                "descriptor length mismatch: {} vs {}",
                wanted.values.len(),
                candidate.values.len()
            ))
        })?;
        log::trace!("{} is at distance {:.4}", target.file.name, distance);

        Ok(if distance <= max_distance {
            Comparison::Match {
                identifier: reference.label().to_string(),
                score: distance,
            }
        } else {
            Comparison::NoMatch
        })
    }
}
