//! Static per-model price table.
//!
//! Prices are ordinary config data (USD per 1k tokens, split by input and
//! output). Unknown models resolve to zero cost with a warning rather than
//! failing the invocation; deployments are expected to seed the table with
//! every model id their router can produce.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Per-1k-token pricing for one model endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPricing {
    #[must_use]
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost of one invocation in USD.
    #[must_use]
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Lookup table from model id to pricing.
#[derive(Clone, Debug)]
pub struct PricingTable {
    prices: FxHashMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut prices = FxHashMap::default();
        prices.insert("gpt-4o-mini".to_string(), ModelPricing::new(0.00015, 0.0006));
        prices.insert("gpt-4o".to_string(), ModelPricing::new(0.0025, 0.01));
        prices.insert("o3".to_string(), ModelPricing::new(0.01, 0.04));
        Self { prices }
    }
}

impl PricingTable {
    /// An empty table; every model prices at zero until seeded.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            prices: FxHashMap::default(),
        }
    }

    /// Seed or replace pricing for one model id.
    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>, pricing: ModelPricing) -> Self {
        self.prices.insert(model_id.into(), pricing);
        self
    }

    /// Compute the cost of one invocation.
    ///
    /// Unknown models cost zero; this is logged so misconfigured tables
    /// show up in traces instead of silently under-billing.
    #[must_use]
    pub fn cost(&self, model_id: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        match self.prices.get(model_id) {
            Some(pricing) => pricing.cost(input_tokens, output_tokens),
            None => {
                tracing::warn!(model_id, "no pricing for model; billing zero");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_with_tokens() {
        let pricing = ModelPricing::new(1.0, 2.0);
        let cost = pricing.cost(500, 1000);
        assert!((cost - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_model_is_free() {
        let table = PricingTable::empty();
        assert_eq!(table.cost("mystery-model", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn seeded_model_overrides_default() {
        let table = PricingTable::default().with_model("gpt-4o", ModelPricing::new(1.0, 1.0));
        assert!((table.cost("gpt-4o", 1000, 1000) - 2.0).abs() < f64::EPSILON);
    }
}
