use serde_json::{json, Value};

use super::base::{Completion, CompletionRequest, FinishReason, Usage};
use crate::errors::BoundaryError;
use crate::models::function::{FunctionCall, FunctionSchema};
use crate::models::message::Message;

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut converted = json!({
                "role": message.role,
                "content": message.content,
            });
            if let Some(name) = &message.name {
                converted["name"] = json!(name);
            }
            if let Some(call) = &message.function_call {
                converted["function_call"] = json!({
                    "name": call.name,
                    "arguments": call.arguments,
                });
            }
            converted
        })
        .collect()
}

/// Convert function schemas to OpenAI's `functions` request field
pub fn functions_to_openai_spec(functions: &[FunctionSchema]) -> Vec<Value> {
    functions
        .iter()
        .map(|function| {
            json!({
                "name": function.name,
                "description": function.description,
                "parameters": function.parameters,
            })
        })
        .collect()
}

/// Build the chat-completions payload for a request
pub fn request_to_openai_spec(request: &CompletionRequest) -> Value {
    let mut payload = json!({
        "model": request.model,
        "messages": messages_to_openai_spec(&request.messages),
        "temperature": request.temperature,
    });

    if !request.functions.is_empty() {
        payload["functions"] = json!(functions_to_openai_spec(&request.functions));
        if let Some(policy) = &request.function_call {
            payload["function_call"] = json!(policy);
        }
    }

    payload
}

/// Read token usage from a response, deriving the total when only the parts are present
pub fn openai_usage(response: &Value) -> Result<Usage, BoundaryError> {
    let usage = response
        .get("usage")
        .ok_or_else(|| BoundaryError::Protocol("No usage data in response".to_string()))?;

    let input_tokens = usage.get("prompt_tokens").and_then(|v| v.as_u64());
    let output_tokens = usage.get("completion_tokens").and_then(|v| v.as_u64());

    let total_tokens = match usage.get("total_tokens").and_then(|v| v.as_u64()) {
        Some(total) => total,
        None => match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => input.checked_add(output).ok_or_else(|| {
                BoundaryError::Protocol("Token counts in response overflow".to_string())
            })?,
            _ => {
                return Err(BoundaryError::Protocol(
                    "No total token count in response".to_string(),
                ))
            }
        },
    };

    Ok(Usage::new(input_tokens, output_tokens, total_tokens))
}

/// Validate an OpenAI response and convert its first choice into a `Completion`
pub fn openai_response_to_completion(response: &Value) -> Result<Completion, BoundaryError> {
    let choice = response
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .ok_or_else(|| BoundaryError::Protocol("Response contained no choices".to_string()))?;

    let message = choice
        .get("message")
        .filter(|message| message.is_object())
        .ok_or_else(|| BoundaryError::Protocol("First choice has no message".to_string()))?;

    // content is null when the model calls a function
    let content = message
        .get("content")
        .and_then(|content| content.as_str())
        .unwrap_or_default()
        .to_string();

    let function_call = match message.get("function_call") {
        None | Some(Value::Null) => None,
        Some(call) => Some(parse_function_call(call)?),
    };

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|reason| reason.as_str())
        .map(FinishReason::from)
        .ok_or_else(|| BoundaryError::Protocol("First choice has no finish_reason".to_string()))?;

    if finish_reason == FinishReason::FunctionCall && function_call.is_none() {
        return Err(BoundaryError::Protocol(
            "finish_reason is function_call but no function_call was returned".to_string(),
        ));
    }

    Ok(Completion {
        content,
        finish_reason,
        function_call,
        usage: openai_usage(response)?,
    })
}

fn parse_function_call(call: &Value) -> Result<FunctionCall, BoundaryError> {
    let name = call
        .get("name")
        .and_then(|name| name.as_str())
        .ok_or_else(|| BoundaryError::Protocol("function_call has no name".to_string()))?;

    // arguments should be a JSON string, but keep structured arguments usable too
    let arguments = match call.get("arguments") {
        Some(Value::String(arguments)) => arguments.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    };

    Ok(FunctionCall::new(name, arguments))
}

pub fn check_openai_context_length_error(error: &Value) -> Option<BoundaryError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(BoundaryError::ContextLengthExceeded(message))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::function::FunctionCallPolicy;
    use anyhow::Result;

    const OPENAI_FUNCTION_CALL_RESPONSE: &str = r#"{
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "function_call": {
                    "name": "add",
                    "arguments": "{\"a\": 2, \"b\": 3}"
                }
            },
            "finish_reason": "function_call"
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 25,
            "total_tokens": 35
        }
    }"#;

    fn add_schema() -> FunctionSchema {
        FunctionSchema::new(
            "add",
            "Add two numbers",
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                },
                "required": ["a", "b"]
            }),
        )
    }

    fn request(functions: Vec<FunctionSchema>, policy: Option<FunctionCallPolicy>) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-3.5-turbo".to_string(),
            messages: vec![Message::system("Be brief."), Message::user("Hello")],
            temperature: 1.0,
            functions,
            function_call: policy,
        }
    }

    #[test]
    fn test_messages_to_openai_spec() {
        let call = FunctionCall::new("add", r#"{"a":2,"b":3}"#);
        let messages = vec![
            Message::user("What is 2 + 3?"),
            Message::function_result(&call, "5"),
            Message::assistant("").with_function_call(call),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 3);
        assert_eq!(spec[0], json!({"role": "user", "content": "What is 2 + 3?"}));
        assert_eq!(spec[1]["role"], "function");
        assert_eq!(spec[1]["name"], "add");
        assert_eq!(spec[2]["function_call"]["arguments"], r#"{"a":2,"b":3}"#);
    }

    #[test]
    fn test_request_without_functions_omits_policy() {
        let payload = request_to_openai_spec(&request(vec![], Some(FunctionCallPolicy::Auto)));
        assert_eq!(payload["model"], "gpt-3.5-turbo");
        assert_eq!(payload["temperature"], json!(1.0));
        assert_eq!(payload["messages"][0]["role"], "system");
        assert!(payload.get("functions").is_none());
        assert!(payload.get("function_call").is_none());
    }

    #[test]
    fn test_request_with_functions() {
        let payload = request_to_openai_spec(&request(
            vec![add_schema()],
            Some(FunctionCallPolicy::Force("add".into())),
        ));
        assert_eq!(payload["functions"][0]["name"], "add");
        assert_eq!(payload["functions"][0]["parameters"]["required"], json!(["a", "b"]));
        assert_eq!(payload["function_call"], json!({"name": "add"}));
    }

    #[test]
    fn test_response_to_completion_text() -> Result<()> {
        let response = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello from the model"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 5}
        });

        let completion = openai_response_to_completion(&response)?;
        assert_eq!(completion.content, "Hello from the model");
        assert_eq!(completion.finish_reason, FinishReason::Finish);
        assert_eq!(completion.function_call, None);
        assert_eq!(completion.usage, Usage::new(Some(4), Some(5), 9));
        Ok(())
    }

    #[test]
    fn test_response_to_completion_function_call() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_FUNCTION_CALL_RESPONSE)?;
        let completion = openai_response_to_completion(&response)?;

        assert_eq!(completion.finish_reason, FinishReason::FunctionCall);
        assert_eq!(completion.content, "");
        assert_eq!(
            completion.function_call,
            Some(FunctionCall::new("add", r#"{"a": 2, "b": 3}"#))
        );
        assert_eq!(completion.usage.total_tokens, 35);
        Ok(())
    }

    #[test]
    fn test_response_without_choices() {
        let err = openai_response_to_completion(&json!({
            "choices": [],
            "usage": {"total_tokens": 1}
        }))
        .unwrap_err();
        assert!(matches!(err, BoundaryError::Protocol(_)));
    }

    #[test]
    fn test_response_without_usage() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_FUNCTION_CALL_RESPONSE)?;
        if let Some(object) = response.as_object_mut() {
            object.remove("usage");
        }
        let err = openai_response_to_completion(&response).unwrap_err();
        assert_eq!(
            err,
            BoundaryError::Protocol("No usage data in response".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_usage_parts_that_overflow() {
        let err = openai_usage(&json!({
            "usage": {"prompt_tokens": u64::MAX, "completion_tokens": 1}
        }))
        .unwrap_err();
        assert_eq!(
            err,
            BoundaryError::Protocol("Token counts in response overflow".to_string())
        );
    }

    #[test]
    fn test_function_call_reason_without_payload() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_FUNCTION_CALL_RESPONSE)?;
        response["choices"][0]["message"]["function_call"] = Value::Null;
        let err = openai_response_to_completion(&response).unwrap_err();
        assert!(matches!(err, BoundaryError::Protocol(_)));
        Ok(())
    }

    #[test]
    fn test_structured_arguments_are_reencoded() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_FUNCTION_CALL_RESPONSE)?;
        response["choices"][0]["message"]["function_call"]["arguments"] = json!({"a": 1});
        let completion = openai_response_to_completion(&response)?;
        assert_eq!(
            completion.function_call.map(|c| c.arguments),
            Some(r#"{"a":1}"#.to_string())
        );
        Ok(())
    }

    #[test]
    fn test_check_openai_context_length_error() {
        let error = json!({
            "code": "context_length_exceeded",
            "message": "This message is too long"
        });

        let result = check_openai_context_length_error(&error);
        assert_eq!(
            result.map(|e| e.to_string()),
            Some("Context length exceeded. Message: This message is too long".to_string())
        );

        let error = json!({
            "code": "other_error",
            "message": "Some other error"
        });
        assert!(check_openai_context_length_error(&error).is_none());
    }
}
