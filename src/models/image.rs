use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_IMAGE_MODEL;
use crate::error::{GenError, Result};

/// Upper bound on variations per run.
pub const MAX_VARIATIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "3:4")]
    ClassicPortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Classic,
        AspectRatio::ClassicPortrait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Classic => "4:3",
            AspectRatio::ClassicPortrait => "3:4",
        }
    }

    pub fn is_default(&self) -> bool {
        *self == AspectRatio::Square
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = GenError;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == tag)
            .ok_or_else(|| {
                GenError::ValidationError(format!(
                    "Unsupported aspect ratio '{}', expected one of 1:1, 16:9, 9:16, 4:3, 3:4",
                    tag
                ))
            })
    }
}

/// An inline image attached to a request, ahead of the prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub count: usize,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: DEFAULT_IMAGE_MODEL.to_string(),
            count: 1,
            aspect_ratio: AspectRatio::default(),
            reference_images: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_images.push(image);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(GenError::ValidationError("A prompt is required".into()));
        }
        if !(1..=MAX_VARIATIONS).contains(&self.count) {
            return Err(GenError::ValidationError(format!(
                "Image count must be between 1 and {}, got {}",
                MAX_VARIATIONS, self.count
            )));
        }
        if self.model.trim().is_empty() {
            return Err(GenError::ValidationError("A model identifier is required".into()));
        }
        Ok(())
    }

    /// Prompt sent for variation `index` (0-based).
    pub fn variation_prompt(&self, index: usize) -> String {
        let mut prompt = self.prompt.clone();
        if !self.aspect_ratio.is_default() {
            prompt.push_str(&format!(" (aspect ratio: {})", self.aspect_ratio));
        }
        if self.count > 1 {
            prompt.push_str(&format!(" (variation {})", index + 1));
        }
        prompt
    }

    pub fn variations(&self) -> Vec<VariationRequest> {
        let references: Arc<[ReferenceImage]> = self.reference_images.clone().into();
        (0..self.count)
            .map(|index| VariationRequest {
                index,
                model: self.model.clone(),
                prompt: self.variation_prompt(index),
                reference_images: Arc::clone(&references),
            })
            .collect()
    }
}

/// One call to the generation service.
#[derive(Debug, Clone)]
pub struct VariationRequest {
    pub index: usize,
    pub model: String,
    pub prompt: String,
    pub reference_images: Arc<[ReferenceImage]>,
}
