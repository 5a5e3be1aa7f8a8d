pub mod image_client;
pub mod traits;

use crate::{
    config::GeminiConfig,
    error::{GenError, Result},
    orchestrator::GenerationOrchestrator,
    pricing::PricingTable,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

pub use image_client::ImageClient;
pub use traits::{ImageGenerator, VariationResponse};

#[derive(Clone)]
pub struct GeminiClient {
    image_client: ImageClient,
    model: String,
}

impl GeminiClient {
    /// Fails without a credential or when the http client cannot be built.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| GenError::ValidationError("API key is required".into()))?
            .to_string();

        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| GenError::ClientError(format!("Failed to build HTTP client: {}", e)))?;

        log::debug!(
            "Gemini client ready (endpoint: {}, model: {})",
            config.endpoint,
            config.model
        );

        Ok(Self {
            image_client: ImageClient::new(client, api_key, config.endpoint),
            model: config.model,
        })
    }

    pub fn image(&self) -> &ImageClient {
        &self.image_client
    }

    pub fn default_model(&self) -> &str {
        &self.model
    }

    pub fn orchestrator(&self, pricing: PricingTable) -> GenerationOrchestrator {
        GenerationOrchestrator::new(Arc::new(self.image_client.clone()), pricing)
    }
}
