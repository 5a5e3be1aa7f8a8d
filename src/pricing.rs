use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GenError, Result};
use crate::models::{AggregateUsage, TokenTotals};

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_text_per_million: f64,
    pub output_image_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output_text: f64, output_image: f64) -> Self {
        Self {
            input_per_million: input,
            output_text_per_million: output_text,
            output_image_per_million: output_image,
        }
    }

    /// Candidate tokens are billed at the image-output rate, text-output rate unused.
    pub fn cost(&self, totals: &TokenTotals) -> f64 {
        (totals.prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (totals.candidate_tokens as f64 / 1_000_000.0) * self.output_image_per_million
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "gemini-2.0-flash-exp".to_string(),
            ModelPricing::new(0.10, 0.40, 30.0),
        );
        models.insert(
            "gemini-2.0-flash-preview-image-generation".to_string(),
            ModelPricing::new(0.10, 0.40, 30.0),
        );
        models.insert(
            "gemini-2.5-flash-image".to_string(),
            ModelPricing::new(0.30, 2.50, 30.0),
        );
        models.insert(
            "gemini-2.5-flash-image-preview".to_string(),
            ModelPricing::new(0.30, 2.50, 30.0),
        );
        Self { models }
    }
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.models.insert(model.into(), pricing);
        self
    }

    /// Reads a JSON object of `{ "<model>": { "inputPerMillion": .., .. } }`.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let models: HashMap<String, ModelPricing> = serde_json::from_str(raw)
            .map_err(|e| GenError::ConfigError(format!("Invalid pricing table: {}", e)))?;
        Ok(Self { models })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GenError::ConfigError(format!(
                "Unable to read pricing table '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        let model = model.strip_prefix("models/").unwrap_or(model);
        self.models.get(model)
    }

    pub fn models(&self) -> impl Iterator<Item = (&String, &ModelPricing)> {
        self.models.iter()
    }

    /// `None` when the model is unpriced or nothing was counted.
    pub fn aggregate(
        &self,
        model: &str,
        totals: &TokenTotals,
        image_count: usize,
    ) -> Option<AggregateUsage> {
        if totals.total_tokens == 0 {
            return None;
        }
        let pricing = self.get(model)?;
        Some(AggregateUsage {
            prompt_tokens: totals.prompt_tokens,
            candidate_tokens: totals.candidate_tokens,
            total_tokens: totals.total_tokens,
            image_count,
            estimated_cost_usd: pricing.cost(totals),
        })
    }
}
