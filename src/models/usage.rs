use serde::{Deserialize, Serialize};

/// Token counters reported by the service for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
    pub total_tokens: u64,
}

/// Running sums across every call of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTotals {
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
    pub total_tokens: u64,
}

impl TokenTotals {
    pub fn add(&mut self, usage: &UsageRecord) {
        self.prompt_tokens += usage.prompt_tokens;
        self.candidate_tokens += usage.candidate_tokens;
        self.total_tokens += usage.total_tokens;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateUsage {
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
    pub total_tokens: u64,
    pub image_count: usize,
    pub estimated_cost_usd: f64,
}
