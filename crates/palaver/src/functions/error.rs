use thiserror::Error;

/// Failures while dispatching a function call. These are reported back to the model rather
/// than ending the run.
#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("Function not found: {0}")]
    NotFound(String),

    #[error("Could not decode arguments for {name}: {source}")]
    ArgumentDecode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Function {name} failed: {source:#}")]
    Handler {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Raised while assembling a registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Function '{name}' is provided by both '{first}' and '{second}'")]
    DuplicateFunction {
        name: String,
        first: String,
        second: String,
    },
}
