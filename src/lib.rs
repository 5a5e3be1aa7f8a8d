//! Gemini image generation with concurrent prompt variations.
//!
//! ```no_run
//! use gemgen::{GeminiClient, GeminiConfig, GenerationRequest, PricingTable};
//!
//! # async fn demo() -> gemgen::Result<()> {
//! let client = GeminiClient::new(GeminiConfig::from_env())?;
//! let report = client
//!     .orchestrator(PricingTable::default())
//!     .run(&GenerationRequest::new("a cat").with_count(2))
//!     .await?;
//! println!("{} image(s)", report.images.len());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod gemini;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod pricing;
pub mod store;

pub use config::{AppConfig, GeminiConfig};
pub use error::{GenError, Result};
pub use gemini::{GeminiClient, ImageClient, ImageGenerator, VariationResponse};
pub use models::{
    AggregateUsage, AspectRatio, GeneratedImage, GenerationRequest, ModelInfo, ReferenceImage,
    UsageRecord, VariationRequest, MAX_VARIATIONS,
};
pub use orchestrator::{
    GenerationOrchestrator, OutcomeKind, ProgressEvent, RunReport, VariationOutcome,
    NO_IMAGE_MESSAGE,
};
pub use pricing::{ModelPricing, PricingTable};
pub use store::{CredentialStore, FileStore, KeyValueStore, MemoryStore, PreferenceStore};
