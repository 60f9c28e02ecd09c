//! Per-model token pricing used to estimate the cost of a comparison.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::openai::TokenUsage;

/// USD rates per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        usage.input as f64 / 1_000_000.0 * self.input_per_million
            + usage.output as f64 / 1_000_000.0 * self.output_per_million
    }
}

/// Pricing keyed by model identifier. Unknown models are billed at the
/// default model's rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    pub default_model: String,
    pub models: HashMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "gpt-4o-mini".to_string(),
            ModelPricing {
                input_per_million: 0.15,
                output_per_million: 0.60,
            },
        );
        models.insert(
            "gpt-4o".to_string(),
            ModelPricing {
                input_per_million: 2.50,
                output_per_million: 10.00,
            },
        );

        Self {
            default_model: "gpt-4o-mini".to_string(),
            models,
        }
    }
}

impl PricingTable {
    /// Load a pricing table from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pricing file: {:?}", path))?;

        let table: PricingTable = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pricing file: {:?}", path))?;

        if !table.models.contains_key(&table.default_model) {
            anyhow::bail!(
                "Pricing file {:?} has no rates for its default model '{}'",
                path,
                table.default_model
            );
        }

        info!("Loaded pricing for {} models from {:?}", table.models.len(), path);
        Ok(table)
    }

    /// Rates for `model`, falling back to the default model.
    pub fn rates(&self, model: &str) -> ModelPricing {
        if let Some(pricing) = self.models.get(model) {
            return *pricing;
        }

        warn!("No pricing for model '{}', using '{}' rates", model, self.default_model);
        self.models
            .get(&self.default_model)
            .copied()
            .unwrap_or(ModelPricing {
                input_per_million: 0.0,
                output_per_million: 0.0,
            })
    }

    pub fn cost(&self, model: &str, usage: TokenUsage) -> f64 {
        self.rates(model).cost(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_million_tokens_each_way() {
        let table = PricingTable::default();
        let cost = table.cost(
            "gpt-4o-mini",
            TokenUsage {
                input: 1_000_000,
                output: 1_000_000,
            },
        );
        assert!((cost - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model_uses_default_rates() {
        let table = PricingTable::default();
        let usage = TokenUsage {
            input: 2_000_000,
            output: 0,
        };
        assert_eq!(table.cost("some-future-model", usage), table.cost("gpt-4o-mini", usage));
    }

    #[test]
    fn test_zero_usage_costs_nothing() {
        let table = PricingTable::default();
        assert_eq!(table.cost("gpt-4o", TokenUsage::default()), 0.0);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"default_model":"vision-x","models":{{"vision-x":{{"input_per_million":1.0,"output_per_million":4.0}}}}}}"#
        )
        .unwrap();

        let table = PricingTable::load_from_file(file.path()).unwrap();
        let cost = table.cost(
            "vision-x",
            TokenUsage {
                input: 500_000,
                output: 250_000,
            },
        );
        assert!((cost - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_load_rejects_missing_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"default_model":"absent","models":{{}}}}"#).unwrap();
        assert!(PricingTable::load_from_file(file.path()).is_err());
    }
}
