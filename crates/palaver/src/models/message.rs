use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::function::FunctionCall;
use super::role::Role;
use crate::errors::{MessageError, TemplateError};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid");
}

/// Values substituted into `{key}` placeholders
pub type Substitutions = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    /// Build a message, checking that function messages say which function produced them
    pub fn new<S: Into<String>>(
        role: Role,
        content: S,
        name: Option<String>,
        function_call: Option<FunctionCall>,
    ) -> Result<Self, MessageError> {
        if role == Role::Function && name.is_none() {
            return Err(MessageError::MissingFunctionName);
        }
        Ok(Message {
            role,
            content: content.into(),
            name,
            function_call,
        })
    }

    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn function<N: Into<String>, S: Into<String>>(name: N, content: S) -> Self {
        Message {
            role: Role::Function,
            content: content.into(),
            name: Some(name.into()),
            function_call: None,
        }
    }

    /// The message fed back to the model after dispatching `call`: the call description
    /// followed by what it returned
    pub fn function_result(call: &FunctionCall, result: &str) -> Self {
        Self::function(
            call.name.clone(),
            format!("{}\nFunction Result: {}", call.describe(), result),
        )
    }

    /// Like `function_result`, for a call that could not be completed
    pub fn function_error(call: &FunctionCall, error: &str) -> Self {
        Self::function(
            call.name.clone(),
            format!("{}\nFunction Error: {}", call.describe(), error),
        )
    }

    pub fn with_function_call(mut self, function_call: FunctionCall) -> Self {
        self.function_call = Some(function_call);
        self
    }

    fn plain<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            role,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }

    /// Return a copy with every `{key}` placeholder replaced by `substitutions[key]`.
    /// `{{` and `}}` produce literal braces.
    pub fn render(&self, substitutions: &Substitutions) -> Result<Message, TemplateError> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&self.content, |caps: &Captures| {
            match &caps[0] {
                "{{" => "{".to_string(),
                "}}" => "}".to_string(),
                whole => match caps.get(1).and_then(|key| substitutions.get(key.as_str())) {
                    Some(value) => value.clone(),
                    None => {
                        if let Some(key) = caps.get(1) {
                            missing.get_or_insert_with(|| key.as_str().to_string());
                        }
                        whole.to_string()
                    }
                },
            }
        });

        if let Some(key) = missing {
            return Err(TemplateError::MissingSubstitution { key });
        }

        Ok(Message {
            content: rendered.into_owned(),
            ..self.clone()
        })
    }
}

/// Render a batch of messages. A message that fails to render is logged and kept with its
/// content untouched; the rest of the batch is still rendered.
///
/// Without substitutions the messages are returned as written, braces included.
pub fn render_messages(messages: &[Message], substitutions: &Substitutions) -> Vec<Message> {
    if substitutions.is_empty() {
        return messages.to_vec();
    }
    messages
        .iter()
        .map(|message| match message.render(substitutions) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(role = %message.role, content = %message.content, "{}", e);
                message.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subs(pairs: &[(&str, &str)]) -> Substitutions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_function_message_requires_name() {
        let err = Message::new(Role::Function, "42", None, None).unwrap_err();
        assert_eq!(err, MessageError::MissingFunctionName);

        let message = Message::new(Role::Function, "42", Some("answer".into()), None).unwrap();
        assert_eq!(message.name.as_deref(), Some("answer"));
    }

    #[test]
    fn test_other_roles_do_not_need_name() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert!(Message::new(role, "hi", None, None).is_ok());
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let message = Message::user("Answer the query from {name}: {user_query}");
        let rendered = message
            .render(&subs(&[("name", "Ada"), ("user_query", "what is 2+3?")]))
            .unwrap();
        assert_eq!(rendered.content, "Answer the query from Ada: what is 2+3?");
        assert_eq!(rendered.role, Role::User);
        // the original is untouched
        assert_eq!(message.content, "Answer the query from {name}: {user_query}");
    }

    #[test]
    fn test_render_without_placeholders_is_noop() {
        let message = Message::user("plain text, nothing to fill in");
        let rendered = message.render(&subs(&[("unused", "x")])).unwrap();
        assert_eq!(rendered, message);
    }

    #[test]
    fn test_render_escaped_braces() {
        let message = Message::user("{{literal}} and {value}");
        let rendered = message.render(&subs(&[("value", "v")])).unwrap();
        assert_eq!(rendered.content, "{literal} and v");
    }

    #[test]
    fn test_render_missing_key() {
        let message = Message::user("Hello {name}, you asked {query}");
        let err = message.render(&subs(&[("query", "q")])).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingSubstitution {
                key: "name".to_string()
            }
        );
    }

    #[test]
    fn test_render_messages_keeps_going_after_failure() {
        let messages = vec![
            Message::user("first {missing}"),
            Message::user("second {present}"),
        ];
        let rendered = render_messages(&messages, &subs(&[("present", "ok")]));
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].content, "first {missing}");
        assert_eq!(rendered[1].content, "second ok");
    }

    #[test]
    fn test_render_keeps_unmatched_brace_text() {
        let message = Message::user("{value} then {1} and { spaced }");
        let rendered = message.render(&subs(&[("value", "v")])).unwrap();
        assert_eq!(rendered.content, "v then {1} and { spaced }");
    }

    #[test]
    fn test_render_messages_without_substitutions_is_verbatim() {
        let messages = vec![
            Message::user("Return JSON like {{\"city\": {name}}}"),
            Message::system("plain"),
        ];
        let rendered = render_messages(&messages, &Substitutions::new());
        assert_eq!(rendered, messages);
    }

    #[test]
    fn test_function_result_composition() {
        let call = FunctionCall::new("add", r#"{"a":2,"b":3}"#);
        let message = Message::function_result(&call, "5");
        assert_eq!(message.role, Role::Function);
        assert_eq!(message.name.as_deref(), Some("add"));
        assert_eq!(
            message.content,
            "Function Name: add, Arguments: {\"a\":2,\"b\":3}\nFunction Result: 5"
        );
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let value = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));

        let call = FunctionCall::new("add", "{}");
        let value = serde_json::to_value(Message::assistant("").with_function_call(call)).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "assistant",
                "content": "",
                "function_call": {"name": "add", "arguments": "{}"}
            })
        );
    }
}
