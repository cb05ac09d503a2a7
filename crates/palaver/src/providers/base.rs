use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::BoundaryError;
use crate::models::function::{FunctionCall, FunctionCallPolicy, FunctionSchema};
use crate::models::message::Message;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: Option<u64>, output_tokens: Option<u64>, total_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    pub fn total(total_tokens: u64) -> Self {
        Self::new(None, None, total_tokens)
    }
}

/// Why the model stopped producing output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A normal, complete answer
    Finish,
    /// The model wants a function called before it continues
    FunctionCall,
    /// Truncated by the token limit
    Length,
    ContentFilter,
    Other(String),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Finish => write!(f, "finish"),
            FinishReason::FunctionCall => write!(f, "function_call"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::ContentFilter => write!(f, "content_filter"),
            FinishReason::Other(reason) => write!(f, "{}", reason),
        }
    }
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "stop" | "finish" => FinishReason::Finish,
            "function_call" => FinishReason::FunctionCall,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Everything sent to the completion endpoint for one round
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    /// Omitted from the request when empty
    pub functions: Vec<FunctionSchema>,
    /// Only sent alongside a non-empty function list
    pub function_call: Option<FunctionCallPolicy>,
}

/// A validated completion: the first choice of the endpoint's response plus its usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub finish_reason: FinishReason,
    pub function_call: Option<FunctionCall>,
    pub usage: Usage,
}

impl Completion {
    /// A plain answer that ends the round
    pub fn text<S: Into<String>>(content: S, usage: Usage) -> Self {
        Self {
            content: content.into(),
            finish_reason: FinishReason::Finish,
            function_call: None,
            usage,
        }
    }

    /// A request to call `call`
    pub fn function_call(call: FunctionCall, usage: Usage) -> Self {
        Self {
            content: String::new(),
            finish_reason: FinishReason::FunctionCall,
            function_call: Some(call),
            usage,
        }
    }

    /// The completion as it is stored in conversation memory
    pub fn to_message(&self) -> Message {
        let message = Message::assistant(self.content.clone());
        match &self.function_call {
            Some(call) => message.with_function_call(call.clone()),
            None => message,
        }
    }
}

/// The remote chat-completion endpoint
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send one request and return the first choice of the response
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BoundaryError>;
}
