use crate::{
    error::{GenError, Result},
    gemini::traits::{ImageGenerator, VariationResponse},
    models::{gemini::GeminiResponse, ModelInfo, ModelStage, VariationRequest},
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

#[derive(Clone)]
pub struct ImageClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl ImageClient {
    pub fn new(client: Client, api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn supported_models() -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "gemini-2.0-flash-exp".to_string(),
                name: "Gemini 2.0 Flash (experimental)".to_string(),
                stage: ModelStage::Experimental,
                description: "Native image output through responseModalities".to_string(),
            },
            ModelInfo {
                id: "gemini-2.0-flash-preview-image-generation".to_string(),
                name: "Gemini 2.0 Flash image generation".to_string(),
                stage: ModelStage::Preview,
                description: "Conversational image generation and editing".to_string(),
            },
            ModelInfo {
                id: "gemini-2.5-flash-image-preview".to_string(),
                name: "Gemini 2.5 Flash Image (preview)".to_string(),
                stage: ModelStage::Preview,
                description: "Multi-image fusion and reference-guided edits".to_string(),
            },
            ModelInfo {
                id: "gemini-2.5-flash-image".to_string(),
                name: "Gemini 2.5 Flash Image".to_string(),
                stage: ModelStage::Stable,
                description: "Generally available image generation model".to_string(),
            },
        ]
    }

    pub fn generate_url(&self, model: &str) -> String {
        let model = model.trim();
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            model
        )
    }

    /// Reference images go first, the prompt text last.
    pub fn build_request_body(request: &VariationRequest) -> Value {
        let mut parts: Vec<Value> = request
            .reference_images
            .iter()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": image.data
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.prompt }));

        json!({
            "contents": [{
                "role": "user",
                "parts": parts
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"]
            }
        })
    }

    pub async fn generate_content(&self, request: &VariationRequest) -> Result<GeminiResponse> {
        let url = self.generate_url(&request.model);
        let body = Self::build_request_body(request);

        log::debug!(
            "Variation {} -> {} ({} reference image(s), prompt: {:?})",
            request.index + 1,
            url,
            request.reference_images.len(),
            request.prompt
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GenError::HttpError)?;

        let status = response.status();
        let response_text = response.text().await.map_err(GenError::HttpError)?;

        if !status.is_success() {
            log::warn!(
                "Gemini returned HTTP {} for variation {}",
                status.as_u16(),
                request.index + 1
            );
            return Err(GenError::ServiceError {
                status: status.as_u16(),
                body: response_text,
            });
        }

        serde_json::from_str(&response_text).map_err(|e| {
            GenError::ResponseError(format!(
                "Failed to decode Gemini response JSON: {}. Raw response: {}",
                e, response_text
            ))
        })
    }
}

#[async_trait]
impl ImageGenerator for ImageClient {
    async fn generate(&self, request: &VariationRequest) -> Result<VariationResponse> {
        let response = self.generate_content(request).await?;
        let image = response.first_image();
        if image.is_none() {
            log::debug!(
                "Variation {} returned no inline image (finish reason: {:?})",
                request.index + 1,
                response
                    .candidates
                    .first()
                    .and_then(|candidate| candidate.finish_reason.as_deref())
            );
        }

        Ok(VariationResponse {
            image,
            usage: response.usage(),
            text: response.first_text(),
        })
    }
}
