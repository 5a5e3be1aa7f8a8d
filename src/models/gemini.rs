//! Wire types for the `generateContent` endpoint.

use serde::{Deserialize, Serialize};

use super::{GeneratedImage, UsageRecord};

pub const FALLBACK_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub usage_metadata: Option<UsageMetadata>,
    pub model_version: Option<String>,
    pub response_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    // absent when the candidate was blocked
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
    pub index: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: Option<u64>,
    pub candidates_token_count: Option<u64>,
    pub total_token_count: Option<u64>,
}

impl GeminiResponse {
    /// First inline image of the first candidate.
    pub fn first_image(&self) -> Option<GeneratedImage> {
        let content = self.candidates.first()?.content.as_ref()?;
        content.parts.iter().find_map(|part| {
            let inline = part.inline_data.as_ref()?;
            let data = inline.data.trim();
            if data.is_empty() {
                return None;
            }
            let mime_type = inline.mime_type.trim();
            Some(GeneratedImage {
                data: data.to_string(),
                mime_type: if mime_type.is_empty() {
                    FALLBACK_IMAGE_MIME.to_string()
                } else {
                    mime_type.to_string()
                },
            })
        })
    }

    /// Accompanying text of the first candidate, if the model said anything.
    pub fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    pub fn usage(&self) -> Option<UsageRecord> {
        self.usage_metadata.as_ref().map(|meta| {
            let prompt_tokens = meta.prompt_token_count.unwrap_or(0);
            let candidate_tokens = meta.candidates_token_count.unwrap_or(0);
            UsageRecord {
                prompt_tokens,
                candidate_tokens,
                total_tokens: meta
                    .total_token_count
                    .unwrap_or(prompt_tokens + candidate_tokens),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE_RESPONSE: &str = r#"{
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [
                    {"text": "Here is your cat."},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}},
                    {"inlineData": {"mimeType": "image/png", "data": "c2Vjb25k"}}
                ]
            },
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 1295, "totalTokenCount": 1304},
        "modelVersion": "gemini-2.0-flash-exp"
    }"#;

    #[test]
    fn test_first_image_and_usage() {
        let response: GeminiResponse = serde_json::from_str(IMAGE_RESPONSE).unwrap();
        let image = response.first_image().unwrap();
        assert_eq!(image.data, "iVBORw0KGgo=");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(response.first_text().as_deref(), Some("Here is your cat."));
        assert_eq!(
            response.usage(),
            Some(UsageRecord {
                prompt_tokens: 9,
                candidate_tokens: 1295,
                total_tokens: 1304,
            })
        );
    }

    #[test]
    fn test_text_only_response_has_no_image() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"I can't draw that."}]}}]}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert!(response.first_image().is_none());
        assert!(response.usage().is_none());
    }

    #[test]
    fn test_blocked_candidate_and_missing_mime() {
        let blocked = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let response: GeminiResponse = serde_json::from_str(blocked).unwrap();
        assert!(response.first_image().is_none());

        let raw = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"data":"AAAA"}}]}}]}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.first_image().unwrap().mime_type, FALLBACK_IMAGE_MIME);
    }

    #[test]
    fn test_empty_body_parses() {
        let response: GeminiResponse = serde_json::from_str("{}").unwrap();
        assert!(response.candidates.is_empty());
        assert!(response.first_image().is_none());
    }

    #[test]
    fn test_total_tokens_derived_when_missing() {
        let raw = r#"{"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":6}}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.usage().unwrap().total_tokens, 10);
    }
}
