use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::agent::{
    AgentConfig, DEFAULT_MAX_FUNCTION_ROUNDS, DEFAULT_MODEL, DEFAULT_SYSTEM_MESSAGE,
    DEFAULT_USER_TEMPLATE,
};
use crate::errors::{to_env_var, ConfigError};
use crate::models::function::FunctionCallPolicy;
use crate::pricing::Currency;
use crate::providers::configs::{OpenAiProviderConfig, DEFAULT_TIMEOUT, OPENAI_HOST};
use crate::retry::RetryPolicy;

/// Read when `PALAVER_PROVIDER__API_KEY` is not set
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_openai_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            host: default_openai_host(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_system_message")]
    pub system_message: String,
    #[serde(default = "default_user_template")]
    pub user_template: String,
    /// `auto`, `none`, or the name of a function the model must call
    #[serde(default = "default_function_call")]
    pub function_call: String,
    #[serde(default = "default_max_function_rounds")]
    pub max_function_rounds: u32,
    #[serde(default = "default_reject_repeated_calls")]
    pub reject_repeated_calls: bool,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            system_message: default_system_message(),
            user_template: default_user_template(),
            function_call: default_function_call(),
            max_function_rounds: default_max_function_rounds(),
            reject_repeated_calls: default_reject_repeated_calls(),
            currency: default_currency(),
            retry: RetrySettings::default(),
        }
    }
}

/// Settings layered from defaults, an optional TOML file and `PALAVER_*` environment variables
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate(None)
    }

    /// Like `new`, with values from `path` underneath the environment
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_and_validate(Some(path.as_ref()))
    }

    fn load_and_validate(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("provider.host", default_openai_host())?
            .set_default("agent.model", default_model())?;

        if let Ok(api_key) = env::var(OPENAI_API_KEY_VAR) {
            builder = builder.set_default("provider.api_key", api_key)?;
        }
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("PALAVER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize::<Self>().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            ConfigError::Other(err)
        })
    }

    /// Connection settings for the OpenAI provider. The API key is required.
    pub fn provider_config(&self) -> Result<OpenAiProviderConfig, ConfigError> {
        let api_key = self
            .provider
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                env_var: to_env_var("provider.api_key"),
            })?;

        Ok(OpenAiProviderConfig::new(api_key)
            .with_host(self.provider.host.clone())
            .with_timeout(Duration::from_secs(self.provider.timeout_secs)))
    }

    pub fn agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let agent = &self.agent;
        let currency =
            Currency::from_str(&agent.currency).map_err(|_| ConfigError::InvalidValue {
                env_var: to_env_var("agent.currency"),
                message: format!("unknown currency '{}'", agent.currency),
            })?;

        Ok(AgentConfig {
            model: agent.model.clone(),
            temperature: agent.temperature,
            system_message: agent.system_message.clone(),
            user_template: agent.user_template.clone(),
            function_call: FunctionCallPolicy::from(agent.function_call.as_str()),
            max_function_rounds: agent.max_function_rounds,
            retry: agent.retry.policy(),
            reject_repeated_calls: agent.reject_repeated_calls,
            currency,
        })
    }
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_max_attempts() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_initial_delay_ms() -> u64 {
    RetryPolicy::default().initial_delay.as_millis() as u64
}

fn default_max_delay_ms() -> u64 {
    RetryPolicy::default().max_delay.as_millis() as u64
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_system_message() -> String {
    DEFAULT_SYSTEM_MESSAGE.to_string()
}

fn default_user_template() -> String {
    DEFAULT_USER_TEMPLATE.to_string()
}

fn default_function_call() -> String {
    "auto".to_string()
}

fn default_max_function_rounds() -> u32 {
    DEFAULT_MAX_FUNCTION_ROUNDS
}

fn default_reject_repeated_calls() -> bool {
    true
}

fn default_currency() -> String {
    Currency::default().to_string()
}
