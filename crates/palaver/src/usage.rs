use crate::errors::PricingError;
use crate::pricing::PricingTable;

/// Running token and cost totals for one agent.
///
/// Totals only ever grow; `reset` is the single way back to zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageAccountant {
    running_tokens: u64,
    running_cost: f64,
    unpriced_tokens: u64,
}

impl UsageAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the tokens of one completion. The tokens are always counted; when the model has no
    /// known rate they are also tracked as unpriced and the lookup error is returned.
    pub fn record(
        &mut self,
        pricing: &PricingTable,
        model: &str,
        tokens: u64,
    ) -> Result<f64, PricingError> {
        self.running_tokens += tokens;
        match pricing.cost_for(model, tokens) {
            Ok(cost) => {
                self.running_cost += cost;
                Ok(cost)
            }
            Err(e) => {
                self.unpriced_tokens += tokens;
                Err(e)
            }
        }
    }

    pub fn running_tokens(&self) -> u64 {
        self.running_tokens
    }

    pub fn running_cost(&self) -> f64 {
        self.running_cost
    }

    /// Tokens that were counted but could not be priced
    pub fn unpriced_tokens(&self) -> u64 {
        self.unpriced_tokens
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
