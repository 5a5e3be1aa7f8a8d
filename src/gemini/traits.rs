use crate::{
    error::Result,
    models::{GeneratedImage, UsageRecord, VariationRequest},
};
use async_trait::async_trait;

/// What one successful call produced. `image` is `None` when the service
/// answered without an inline image part.
#[derive(Debug, Clone, Default)]
pub struct VariationResponse {
    pub image: Option<GeneratedImage>,
    pub usage: Option<UsageRecord>,
    pub text: Option<String>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &VariationRequest) -> Result<VariationResponse>;
}
