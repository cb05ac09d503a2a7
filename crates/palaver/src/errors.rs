use thiserror::Error;

/// Raised when a message is constructed in a shape the chat endpoint would reject
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessageError {
    #[error("Function messages must carry the name of the function that produced them")]
    MissingFunctionName,
}

/// Raised while substituting values into a message template
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("No substitution provided for placeholder '{{{key}}}'")]
    MissingSubstitution { key: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("No pricing known for model: {0}")]
    UnknownModel(String),
}

/// Failures of the remote completion boundary.
///
/// The first three are transient and worth retrying; the rest describe a request
/// the endpoint will keep refusing.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundaryError {
    #[error("Could not reach the completion endpoint: {0}")]
    Connectivity(String),

    #[error("Completion endpoint rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Malformed completion response: {0}")]
    Protocol(String),

    #[error("Completion request rejected ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Context length exceeded. Message: {0}")]
    ContextLengthExceeded(String),
}

impl BoundaryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BoundaryError::Connectivity(_) | BoundaryError::RateLimit(_) | BoundaryError::Protocol(_)
        )
    }
}

/// Terminal outcome of a single `Agent::run` call. The agent stays usable afterwards.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Completion failed after {attempts} attempt(s): {source}")]
    Boundary {
        attempts: u32,
        #[source]
        source: BoundaryError,
    },

    #[error("Function call limit of {rounds} round(s) exceeded")]
    LoopLimitExceeded { rounds: u32 },

    #[error("Run cancelled")]
    Cancelled,
}

pub type RunResult<T> = Result<T, RunError>;

/// Raised while loading `Settings`
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration value, set {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid value for {env_var}: {message}")]
    InvalidValue { env_var: String, message: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a dotted configuration key,
/// e.g. `provider.api_key` is read from `PALAVER_PROVIDER__API_KEY`
pub fn to_env_var(field: &str) -> String {
    let path: Vec<String> = field.split('.').map(|part| part.to_uppercase()).collect();
    format!("PALAVER_{}", path.join("__"))
}
