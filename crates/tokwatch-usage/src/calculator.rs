//! Token cost calculation.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::warn;

use crate::models::{ModelPricing, TokenCounts};
use crate::pricing::RateTable;

/// Rates applied to models with no pricing entry: standard mid-tier
/// ($3 / $15 / $3.75 / $0.30 per million input / output / cache write / cache read).
pub fn default_pricing() -> ModelPricing {
    ModelPricing::new("default", 3e-6, 15e-6).with_cache(Some(3.75e-6), Some(0.3e-6))
}

/// Cost in USD of `tokens` at `pricing`. Missing cache rates count as zero.
pub fn calculate_cost(tokens: &TokenCounts, pricing: &ModelPricing) -> f64 {
    tokens.input as f64 * pricing.input_cost_per_token
        + tokens.output as f64 * pricing.output_cost_per_token
        + tokens.cache_creation as f64 * pricing.cache_creation_cost_per_token.unwrap_or(0.0)
        + tokens.cache_read as f64 * pricing.cache_read_cost_per_token.unwrap_or(0.0)
}

/// Prices token counts against a rate table, falling back to
/// [`default_pricing`] for unknown models.
pub struct CostCalculator<'a> {
    rates: &'a RateTable,
    fallback: ModelPricing,
    warned: Mutex<HashSet<String>>,
}

impl<'a> CostCalculator<'a> {
    pub fn new(rates: &'a RateTable) -> Self {
        Self {
            rates,
            fallback: default_pricing(),
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Pricing used for `model`, the fallback when nothing resolves.
    pub fn pricing_for(&self, model: &str) -> &ModelPricing {
        match self.rates.resolve(model) {
            Some(pricing) => pricing,
            None => {
                if let Ok(mut warned) = self.warned.lock()
                    && warned.insert(model.to_string())
                {
                    warn!(model, "Unknown model, using default pricing");
                }
                &self.fallback
            }
        }
    }

    /// Cost of `tokens` used by `model`.
    pub fn cost(&self, model: &str, tokens: &TokenCounts) -> f64 {
        calculate_cost(tokens, self.pricing_for(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> ModelPricing {
        ModelPricing::new("claude-sonnet-4-20250514", 3e-6, 15e-6).with_cache(None, Some(0.3e-6))
    }

    #[test]
    fn test_calculate_cost() {
        let tokens = TokenCounts::new(15_000, 500, 0, 12_000);
        let cost = calculate_cost(&tokens, &sonnet());
        // 0.045 + 0.0075 + 0.0036
        assert!((cost - 0.0561).abs() < 1e-12);
    }

    #[test]
    fn test_missing_cache_rate_is_free() {
        let tokens = TokenCounts::new(0, 0, 1_000_000, 0);
        assert_eq!(calculate_cost(&tokens, &sonnet()), 0.0);
    }

    #[test]
    fn test_cost_is_linear() {
        let pricing = default_pricing();
        let a = TokenCounts::new(1_234, 567, 89, 10_000);
        let b = TokenCounts::new(4_321, 765, 98, 20_000);

        let separate = calculate_cost(&a, &pricing) + calculate_cost(&b, &pricing);
        let combined = calculate_cost(&(a + b), &pricing);
        assert!((separate - combined).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_model_uses_default_not_zero() {
        let rates = RateTable::from_entries([sonnet()]);
        let calculator = CostCalculator::new(&rates);
        let tokens = TokenCounts::new(1_000_000, 1_000_000, 0, 0);

        let cost = calculator.cost("mystery-model", &tokens);
        assert!((cost - 18.0).abs() < 1e-9);
        assert_eq!(calculator.pricing_for("mystery-model").model_id, "default");
    }

    #[test]
    fn test_known_model_resolves_through_table() {
        let rates = RateTable::from_entries([sonnet()]);
        let calculator = CostCalculator::new(&rates);

        let pricing = calculator.pricing_for("anthropic/claude-sonnet-4-20250514");
        assert_eq!(pricing.model_id, "claude-sonnet-4-20250514");
    }
}
