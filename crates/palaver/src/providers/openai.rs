use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::Value;

use super::base::{Completion, CompletionRequest, Provider};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_openai_context_length_error, openai_response_to_completion, request_to_openai_spec,
};
use crate::errors::BoundaryError;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: Value) -> Result<Value, BoundaryError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BoundaryError::Connectivity(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| BoundaryError::Protocol(format!("Could not decode response: {}", e))),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(BoundaryError::RateLimit(error_message(response).await))
            }
            status if status.is_server_error() => Err(BoundaryError::Connectivity(format!(
                "Server error: {}",
                status
            ))),
            status => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                if let Some(err) = body.get("error").and_then(check_openai_context_length_error) {
                    return Err(err);
                }
                Err(BoundaryError::Api {
                    status: status.as_u16(),
                    message: body
                        .pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(String::from)
                        .unwrap_or_else(|| body.to_string()),
                })
            }
        }
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<Value>().await {
        Ok(body) => body
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BoundaryError> {
        let payload = request_to_openai_spec(request);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            functions = request.functions.len(),
            "sending completion request"
        );

        let response = self.post(payload).await?;

        // Some compatible endpoints report errors in a 200 body
        if let Some(error) = response.get("error") {
            if let Some(err) = check_openai_context_length_error(error) {
                return Err(err);
            }
            return Err(BoundaryError::Protocol(format!("OpenAI API error: {}", error)));
        }

        openai_response_to_completion(&response)
    }
}
