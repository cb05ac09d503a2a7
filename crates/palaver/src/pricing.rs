use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::errors::PricingError;

const USD_TO_GBP: f64 = 0.79;

/// Currency that running costs are reported in. Rates are stored in USD.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Currency {
    #[default]
    Usd,
    Gbp,
}

impl Currency {
    fn convert_usd(&self, amount: f64) -> f64 {
        match self {
            Currency::Usd => amount,
            Currency::Gbp => amount * USD_TO_GBP,
        }
    }
}

/// Cost per 1000 tokens for each known model
#[derive(Debug, Clone)]
pub struct PricingTable {
    usd_per_1k: HashMap<String, f64>,
    currency: Currency,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(Currency::default())
    }
}

impl PricingTable {
    /// A table with the built-in model rates, reporting in `currency`
    pub fn new(currency: Currency) -> Self {
        let usd_per_1k = [
            ("gpt-4", 0.045),
            ("gpt-4-0613", 0.045),
            ("gpt-4-32k", 0.090),
            ("gpt-4-32k-0613", 0.090),
            ("gpt-3.5-turbo", 0.00175),
            ("gpt-3.5-turbo-16k", 0.00350),
            ("gpt-3.5-turbo-0613", 0.00175),
            ("gpt-3.5-turbo-16k-0613", 0.00350),
        ]
        .into_iter()
        .map(|(model, rate)| (model.to_string(), rate))
        .collect();

        Self {
            usd_per_1k,
            currency,
        }
    }

    /// A table with no rates at all
    pub fn empty(currency: Currency) -> Self {
        Self {
            usd_per_1k: HashMap::new(),
            currency,
        }
    }

    /// Add or override the USD rate per 1000 tokens for `model`
    pub fn with_rate<S: AsRef<str>>(mut self, model: S, usd_per_1k: f64) -> Self {
        self.usd_per_1k
            .insert(model.as_ref().to_lowercase(), usd_per_1k);
        self
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Rate per 1000 tokens in the table's currency
    pub fn rate(&self, model: &str) -> Result<f64, PricingError> {
        self.usd_per_1k
            .get(&model.to_lowercase())
            .map(|usd| self.currency.convert_usd(*usd))
            .ok_or_else(|| PricingError::UnknownModel(model.to_string()))
    }

    pub fn cost_for(&self, model: &str, token_count: u64) -> Result<f64, PricingError> {
        Ok(self.rate(model)? * token_count as f64 / 1000.0)
    }
}
