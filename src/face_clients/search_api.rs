use crate::config::AppConfig;
use crate::error::AppError;
use crate::face::{
    CompareOptions, Comparison, FaceComparisonService, MatchThreshold, ReferenceFace, TargetImage,
};
use crate::face_clients::{endpoint, image_part, read_reply};
use crate::listing_clients::http_client;
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default = "face_detected_default")]
    face_detected: bool,
    #[serde(default)]
    matches: Vec<FaceMatch>,
}

fn face_detected_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FaceMatch {
    face_id: String,
    /// Confidence percentage, 0-100.
    similarity: f32,
}

/// Custom HTTP backend: posts both images to `/search_faces`.
pub struct SearchApiClient {
    client: reqwest::Client,
    search_url: Url,
}

impl SearchApiClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let search_url = endpoint(&config.face_api_url, "search_faces")?;
        log::debug!("Creating face search client for URL: {}", search_url);
        Ok(Self {
            client: http_client(config.request_timeout())?,
            search_url,
        })
    }
}

#[async_trait]
impl FaceComparisonService for SearchApiClient {
    fn name(&self) -> &'static str {
        "search_api"
    }

    async fn compare(
        &self,
        reference: &ReferenceFace,
        target: TargetImage<'_>,
        options: CompareOptions,
    ) -> Result<Comparison, AppError> {
        let min_confidence = match options.threshold {
            MatchThreshold::MinConfidence(c) => c,
            MatchThreshold::MaxDistance(_) => {
                return Err(AppError::Comparison(
                    "search_api expects a confidence threshold".into(),
                ))
            }
        };
        let (reference_name, reference_bytes) = match reference {
            ReferenceFace::Image { file_name, bytes } => (file_name, bytes),
            ReferenceFace::Descriptor(_) => {
                return Err(AppError::Comparison(
                    "search_api needs a reference image, not a descriptor".into(),
                ))
            }
        };

        let reference_mime = mime_guess::from_path(reference_name).first_or_octet_stream();
        let form = Form::new()
            .part(
                "reference",
                image_part(reference_bytes, reference_name, reference_mime.as_ref())?,
            )
            .part(
                "image",
                image_part(target.bytes, &target.file.name, &target.file.mime_type)?,
            )
            .text("threshold", min_confidence.to_string())
            .text("max_faces", options.max_faces.to_string());

        let response = self
            .client
            .post(self.search_url.clone())
            .multipart(form)
            .send()
            .await?;
        let reply: SearchReply = serde_json::from_value(read_reply(response).await?)?;

        if !reply.face_detected {
            return Ok(Comparison::NoFace);
        }
        let best = reply
            .matches
            .into_iter()
            .filter(|m| m.similarity >= min_confidence)
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));
        Ok(match best {
            Some(m) => Comparison::Match {
                identifier: m.face_id,
                score: m.similarity,
            },
            None => Comparison::NoMatch,
        })
    }
}
