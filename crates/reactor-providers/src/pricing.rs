//! Internal pricing table keyed by `(provider, model)` (§4.7): unknown model
//! costs `0` plus a warning rather than failing the ledger write.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

pub struct PricingTable {
    rates: HashMap<(String, String), ModelRate>,
}

#[derive(Debug, Clone)]
pub struct UnknownModelWarning {
    pub provider: String,
    pub model: String,
}

impl PricingTable {
    pub fn with_defaults() -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            ("anthropic".to_string(), "claude-opus".to_string()),
            ModelRate {
                input_per_million: 15.0,
                output_per_million: 75.0,
            },
        );
        rates.insert(
            ("anthropic".to_string(), "claude-sonnet".to_string()),
            ModelRate {
                input_per_million: 3.0,
                output_per_million: 15.0,
            },
        );
        rates.insert(
            ("anthropic".to_string(), "claude-haiku".to_string()),
            ModelRate {
                input_per_million: 0.8,
                output_per_million: 4.0,
            },
        );
        rates.insert(
            ("openai".to_string(), "gpt-4o".to_string()),
            ModelRate {
                input_per_million: 2.5,
                output_per_million: 10.0,
            },
        );
        rates.insert(
            ("openai".to_string(), "gpt-4o-mini".to_string()),
            ModelRate {
                input_per_million: 0.15,
                output_per_million: 0.6,
            },
        );
        Self { rates }
    }

    /// Returns `(cost, warning)`; `warning` is `Some` when the model was not
    /// in the table and the cost is conservatively `0`.
    pub fn estimate_cost(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> (f64, Option<UnknownModelWarning>) {
        match self.rates.get(&(provider.to_string(), model.to_string())) {
            Some(rate) => {
                let cost = (input_tokens as f64 / 1_000_000.0) * rate.input_per_million
                    + (output_tokens as f64 / 1_000_000.0) * rate.output_per_million;
                (cost, None)
            }
            None => (
                0.0,
                Some(UnknownModelWarning {
                    provider: provider.to_string(),
                    model: model.to_string(),
                }),
            ),
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_computes_cost() {
        let table = PricingTable::with_defaults();
        let (cost, warning) = table.estimate_cost("anthropic", "claude-sonnet", 1_000_000, 1_000_000);
        assert!(warning.is_none());
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_is_free_with_warning() {
        let table = PricingTable::with_defaults();
        let (cost, warning) = table.estimate_cost("mystery", "model-x", 1000, 1000);
        assert_eq!(cost, 0.0);
        assert!(warning.is_some());
    }
}
