//! A [`GenerationGateway`] backed by the Gemini `generateContent` image API.
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{config::ConfigError, job::Image};

use super::{FailureKind, GenerationFailure, GenerationGateway, GenerationRequest};

const API_KEY: &str = "GEMINI_API_KEY";
const MODEL: &str = "GEMINI_MODEL";
const BASE_URL: &str = "GEMINI_BASE_URL";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub const DEFAULT_MODEL: &'static str = "gemini-2.5-flash-image";
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_owned(),
            base_url: Self::DEFAULT_BASE_URL.to_owned(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Read the configuration from the environment.
    ///
    /// A missing `GEMINI_API_KEY` is a fatal configuration error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var(API_KEY)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing(API_KEY))?;
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var(MODEL) {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var(BASE_URL) {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_model(self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

pub struct GeminiGateway {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ConfigError::Invalid {
                name: "http client",
                reason: err.to_string(),
            })?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(GeminiConfig::from_env()?)
    }
}

#[async_trait]
impl GenerationGateway for GeminiGateway {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn generate(&self, request: GenerationRequest) -> Result<Image, GenerationFailure> {
        let response = self
            .client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&GenerateContentRequest::from(&request))
            .send()
            .await
            .map_err(|err| GenerationFailure::classified(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%status, "Image provider returned an error");
            return Err(GenerationFailure::classified(format!(
                "HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| GenerationFailure::new(FailureKind::Unknown, err.to_string()))?;
        body.into_image()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart {
    InlineData(InlineData),
    Text(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

impl From<&GenerationRequest> for GenerateContentRequest {
    fn from(request: &GenerationRequest) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    RequestPart::InlineData(InlineData {
                        mime_type: request.image.mime_type.clone(),
                        data: base64::engine::general_purpose::STANDARD.encode(&request.image.data),
                    }),
                    RequestPart::Text(request.prompt.clone()),
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE"],
                image_config: request
                    .aspect_ratio
                    .clone()
                    .map(|aspect_ratio| ImageConfig { aspect_ratio }),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_image(self) -> Result<Image, GenerationFailure> {
        if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return Err(GenerationFailure::new(
                FailureKind::SafetyFiltered,
                format!("Prompt blocked: {reason}"),
            ));
        }
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(GenerationFailure::new(
                FailureKind::NoResponse,
                "Response contained no candidates",
            ));
        };
        let finish_reason = candidate.finish_reason;
        let mut text = Vec::new();
        for part in candidate.content.into_iter().flat_map(|content| content.parts) {
            if let Some(inline) = part.inline_data {
                let data = base64::engine::general_purpose::STANDARD
                    .decode(inline.data)
                    .map_err(|err| GenerationFailure::new(FailureKind::Unknown, err.to_string()))?;
                return Ok(Image::new(data, inline.mime_type));
            }
            text.extend(part.text);
        }
        match finish_reason {
            Some(reason) if reason != "STOP" => Err(GenerationFailure::classified(format!(
                "Generation stopped: {reason}"
            ))),
            _ if text.is_empty() => Err(GenerationFailure::new(
                FailureKind::NoResponse,
                "Response contained no image",
            )),
            _ => Err(GenerationFailure::new(
                FailureKind::NoResponse,
                format!("Response contained no image: {}", text.join(" ")),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Image, GenerationFailure> {
        serde_json::from_value::<GenerateContentResponse>(value)
            .unwrap()
            .into_image()
    }

    #[test]
    fn request_carries_image_prompt_and_aspect_ratio() {
        let request = GenerationRequest {
            image: Image::new(vec![1, 2, 3], "image/png"),
            prompt: "enhance".to_owned(),
            aspect_ratio: Some("16:9".to_owned()),
        };

        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();

        assert_eq!(
            body,
            json!({
                "contents": [{
                    "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                        {"text": "enhance"},
                    ]
                }],
                "generationConfig": {
                    "responseModalities": ["IMAGE"],
                    "imageConfig": {"aspectRatio": "16:9"},
                }
            })
        );
    }

    #[test]
    fn request_omits_missing_aspect_ratio() {
        let request = GenerationRequest {
            image: Image::new(vec![1], "image/jpeg"),
            prompt: "enhance".to_owned(),
            aspect_ratio: None,
        };

        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();

        assert!(body["generationConfig"].get("imageConfig").is_none());
    }

    #[test]
    fn response_with_inline_image() {
        let image = parse(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                ]},
                "finishReason": "STOP",
            }]
        }))
        .unwrap();

        assert_eq!(image, Image::new(vec![1, 2, 3], "image/png"));
    }

    #[test]
    fn blocked_prompt_is_safety_filtered() {
        let failure = parse(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap_err();

        assert_eq!(failure.kind, FailureKind::SafetyFiltered);
    }

    #[test]
    fn safety_finish_reason_is_safety_filtered() {
        let failure = parse(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "IMAGE_SAFETY"}]
        }))
        .unwrap_err();

        assert_eq!(failure.kind, FailureKind::SafetyFiltered);
    }

    #[test]
    fn text_only_response_is_no_response() {
        let failure = parse(json!({
            "candidates": [{
                "content": {"parts": [{"text": "I can't do that"}]},
                "finishReason": "STOP",
            }]
        }))
        .unwrap_err();

        assert_matches!(
            failure,
            GenerationFailure { kind: FailureKind::NoResponse, ref message }
                if message.contains("I can't do that")
        );
    }

    #[test]
    fn empty_response_is_no_response() {
        let failure = parse(json!({})).unwrap_err();

        assert_eq!(failure.kind, FailureKind::NoResponse);
    }

    #[test]
    fn endpoint_includes_model() {
        let config = GeminiConfig::new("key")
            .with_base_url("http://localhost:8080/")
            .with_model("test-model");

        assert_eq!(
            config.endpoint(),
            "http://localhost:8080/v1beta/models/test-model:generateContent"
        );
    }
}
