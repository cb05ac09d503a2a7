use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{RunError, RunResult};
use crate::functions::FunctionRegistry;
use crate::memory::Conversation;
use crate::models::function::{FunctionCall, FunctionCallPolicy, FunctionSchema};
use crate::models::message::{render_messages, Message, Substitutions};
use crate::pricing::{Currency, PricingTable};
use crate::providers::base::{Completion, CompletionRequest, FinishReason, Provider};
use crate::retry::RetryPolicy;
use crate::usage::UsageAccountant;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant. Answer the user query";
pub const DEFAULT_USER_TEMPLATE: &str = "{query}";
pub const DEFAULT_MAX_FUNCTION_ROUNDS: u32 = 8;

/// Everything that shapes how an agent talks to the model
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f32,
    pub system_message: String,
    /// Template for the user message; `{query}` receives the text passed to `run`
    pub user_template: String,
    pub function_call: FunctionCallPolicy,
    /// Function calls allowed within one `run` before it is abandoned
    pub max_function_rounds: u32,
    pub retry: RetryPolicy,
    /// Answer a repeated identical call from the earlier result instead of invoking again
    pub reject_repeated_calls: bool,
    pub currency: Currency,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            user_template: DEFAULT_USER_TEMPLATE.to_string(),
            function_call: FunctionCallPolicy::Auto,
            max_function_rounds: DEFAULT_MAX_FUNCTION_ROUNDS,
            retry: RetryPolicy::default(),
            reject_repeated_calls: true,
            currency: Currency::default(),
        }
    }
}

/// What the caller asks
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Fill the configured user template, binding this text to `{query}`
    Text(String),
    /// Fill the configured user template from the run's substitutions alone
    Template,
    /// Send these messages, each rendered with the run's substitutions
    Messages(Vec<Message>),
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::Text(text.to_string())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::Text(text)
    }
}

impl From<Vec<Message>> for Query {
    fn from(messages: Vec<Message>) -> Self {
        Query::Messages(messages)
    }
}

impl From<Message> for Query {
    fn from(message: Message) -> Self {
        Query::Messages(vec![message])
    }
}

/// Per-call options for `Agent::run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub substitutions: Substitutions,
    /// Keep the existing history; by default it is cleared before the query is sent
    pub keep_memory: bool,
    /// Overrides the configured function-call policy for this run
    pub function_call: Option<FunctionCallPolicy>,
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_memory(mut self, keep_memory: bool) -> Self {
        self.keep_memory = keep_memory;
        self
    }

    pub fn substitute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.substitutions.insert(key.into(), value.into());
        self
    }

    pub fn with_substitutions(mut self, substitutions: Substitutions) -> Self {
        self.substitutions.extend(substitutions);
        self
    }

    pub fn function_call(mut self, policy: FunctionCallPolicy) -> Self {
        self.function_call = Some(policy);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// The model's final answer to a query, with the agent's running totals after it
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    pub finish_reason: FinishReason,
    /// Function calls dispatched while answering
    pub function_rounds: u32,
    pub running_tokens: u64,
    pub running_cost: f64,
}

/// Agent integrates a foundational LLM with the functions it may call.
///
/// An agent holds one conversation. `run` takes `&mut self`, so a single agent can only be
/// driven by one caller at a time; run separate agents to hold separate conversations
/// concurrently. They can share one `FunctionRegistry`.
pub struct Agent {
    provider: Box<dyn Provider>,
    registry: Arc<FunctionRegistry>,
    functions: Vec<FunctionSchema>,
    config: AgentConfig,
    system_message: Message,
    pricing: PricingTable,
    memory: Conversation,
    usage: UsageAccountant,
    last_completion: Option<Completion>,
}

impl Agent {
    /// Create a new Agent with the specified provider and no functions
    pub fn new(provider: Box<dyn Provider>, config: AgentConfig) -> Self {
        Self {
            provider,
            registry: Arc::new(FunctionRegistry::new()),
            functions: Vec::new(),
            system_message: Message::system(config.system_message.clone()),
            pricing: PricingTable::new(config.currency),
            config,
            memory: Conversation::new(),
            usage: UsageAccountant::new(),
            last_completion: None,
        }
    }

    /// Offer every function in `registry` to the model
    pub fn with_functions(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.functions = registry.schemas();
        self.registry = registry;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn system_message(&self) -> &Message {
        &self.system_message
    }

    pub fn functions(&self) -> &[FunctionSchema] {
        &self.functions
    }

    pub fn memory(&self) -> &Conversation {
        &self.memory
    }

    pub fn running_tokens(&self) -> u64 {
        self.usage.running_tokens()
    }

    pub fn running_cost(&self) -> f64 {
        self.usage.running_cost()
    }

    /// Tokens used by a model the pricing table does not know
    pub fn unpriced_tokens(&self) -> u64 {
        self.usage.unpriced_tokens()
    }

    pub fn last_completion(&self) -> Option<&Completion> {
        self.last_completion.as_ref()
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
    }

    pub fn add_messages<I: IntoIterator<Item = Message>>(&mut self, messages: I) {
        self.memory.extend(messages);
    }

    /// Forget the conversation and zero the usage totals
    pub fn reset(&mut self) {
        self.memory.clear();
        self.usage.reset();
        self.last_completion = None;
    }

    /// Answer a query, calling functions as the model requests until it gives a final answer.
    ///
    /// The messages of the query are added to memory before they are sent, followed by one
    /// function-role message per dispatched call and finally the assistant's answer. When the
    /// run fails, memory keeps everything that was actually sent.
    pub async fn run(&mut self, query: impl Into<Query>, options: RunOptions) -> RunResult<Reply> {
        let RunOptions {
            substitutions,
            keep_memory,
            function_call,
            cancel,
        } = options;
        let cancel = cancel.unwrap_or_default();
        let mut policy = function_call.unwrap_or_else(|| self.config.function_call.clone());

        if !keep_memory {
            self.memory.clear();
        }

        let mut pending = self.render_query(query.into(), substitutions);
        let mut rounds = 0;
        let mut dispatched: HashMap<CallKey, Message> = HashMap::new();

        loop {
            if cancel.is_cancelled() {
                tracing::info!(rounds, "run cancelled");
                return Err(RunError::Cancelled);
            }

            let request = self.compose_request(&pending, &policy);
            // a forced function applies to the first round only
            if let FunctionCallPolicy::Force(_) = policy {
                policy = FunctionCallPolicy::Auto;
            }
            self.memory.extend(std::mem::take(&mut pending));

            let completion = match self.complete_with_retry(&request, &cancel).await {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::error!(rounds, error = %e, "run failed");
                    return Err(e);
                }
            };
            self.record_usage(&completion);
            self.last_completion = Some(completion.clone());

            let requested = match completion.finish_reason {
                FinishReason::FunctionCall => completion.function_call.clone(),
                _ => None,
            };

            if let Some(call) = requested {
                if rounds >= self.config.max_function_rounds {
                    tracing::error!(rounds, function = %call.name, "function call limit exceeded");
                    return Err(RunError::LoopLimitExceeded { rounds });
                }
                rounds += 1;
                let message = self.dispatch(&call, &mut dispatched).await;
                self.memory.push(message);
                continue;
            }

            self.memory.push(completion.to_message());
            tracing::info!(
                finish_reason = %completion.finish_reason,
                rounds,
                running_tokens = self.running_tokens(),
                running_cost = self.running_cost(),
                "run finished"
            );
            return Ok(Reply {
                content: completion.content,
                finish_reason: completion.finish_reason,
                function_rounds: rounds,
                running_tokens: self.running_tokens(),
                running_cost: self.running_cost(),
            });
        }
    }

    fn render_query(&self, query: Query, mut substitutions: Substitutions) -> Vec<Message> {
        let messages = match query {
            Query::Text(text) => {
                substitutions.insert("query".to_string(), text);
                vec![Message::user(self.config.user_template.clone())]
            }
            Query::Template => vec![Message::user(self.config.user_template.clone())],
            Query::Messages(messages) => messages,
        };
        render_messages(&messages, &substitutions)
    }

    fn compose_request(&self, pending: &[Message], policy: &FunctionCallPolicy) -> CompletionRequest {
        let mut messages = Vec::with_capacity(1 + self.memory.len() + pending.len());
        messages.push(self.system_message.clone());
        messages.extend(self.memory.iter().cloned());
        messages.extend(pending.iter().cloned());

        CompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            functions: self.functions.clone(),
            function_call: (!self.functions.is_empty()).then(|| policy.clone()),
        }
    }

    async fn complete_with_retry(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> RunResult<Completion> {
        let retry = self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
                result = self.provider.complete(request) => result,
            };

            match result {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && retry.allows_retry(attempt) => {
                    let delay = retry.delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "completion failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RunError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(source) => {
                    return Err(RunError::Boundary {
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    fn record_usage(&mut self, completion: &Completion) {
        let tokens = completion.usage.total_tokens;
        match self.usage.record(&self.pricing, &self.config.model, tokens) {
            Ok(cost) => tracing::debug!(tokens, cost, "recorded usage"),
            Err(e) => tracing::warn!(tokens, error = %e, "usage could not be priced"),
        }
    }

    /// Run one function call and build the message that reports its outcome to the model.
    /// Failures become part of that message so the model can recover.
    async fn dispatch(
        &self,
        call: &FunctionCall,
        dispatched: &mut HashMap<CallKey, Message>,
    ) -> Message {
        let key = CallKey::new(call);
        if self.config.reject_repeated_calls {
            if let Some(previous) = dispatched.get(&key) {
                tracing::warn!(function = %call.name, "declined repeated function call");
                let mut message = previous.clone();
                message.content.push_str(
                    "\nThis call was already made with the same arguments. \
                     Use the result above instead of calling it again.",
                );
                return message;
            }
        }

        tracing::debug!(function = %call.name, arguments = %call.arguments, "calling function");
        let message = match self.registry.invoke(&call.name, &call.arguments).await {
            Ok(value) => Message::function_result(call, &value_to_text(&value)),
            Err(e) => {
                tracing::warn!(function = %call.name, error = %e, "function call failed");
                Message::function_error(call, &e.to_string())
            }
        };
        dispatched.insert(key, message.clone());
        message
    }
}

/// Identifies a function call by name and arguments, ignoring how the arguments JSON is
/// formatted. Arguments that are not valid JSON are compared as written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CallKey {
    name: String,
    arguments: String,
}

impl CallKey {
    fn new(call: &FunctionCall) -> Self {
        let raw = call.arguments.trim();
        let raw = if raw.is_empty() { "{}" } else { raw };
        let arguments = serde_json::from_str::<Value>(raw)
            .map(|value| value.to_string())
            .unwrap_or_else(|_| raw.to_string());
        Self {
            name: call.name.clone(),
            arguments,
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
