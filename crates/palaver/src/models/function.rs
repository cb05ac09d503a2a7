use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// The part of a registered function that is sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionSchema {
    /// The name of the function
    pub name: String,
    /// A description of what the function does
    pub description: String,
    /// JSON schema for the arguments the function accepts
    pub parameters: Value,
}

impl FunctionSchema {
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        FunctionSchema {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A function call requested by the model.
///
/// `arguments` is kept exactly as the model produced it (JSON encoded as text); decoding
/// happens in the registry so a malformed payload can be reported back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    pub fn new<N: Into<String>, A: Into<String>>(name: N, arguments: A) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Human readable description used in function-result messages
    pub fn describe(&self) -> String {
        format!(
            "Function Name: {}, Arguments: {}",
            self.name, self.arguments
        )
    }
}

/// Whether and how the model may call functions on a given request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FunctionCallPolicy {
    /// The model decides
    #[default]
    Auto,
    /// The model must answer without calling a function
    None,
    /// The model must call the named function
    Force(String),
}

impl Serialize for FunctionCallPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FunctionCallPolicy::Auto => serializer.serialize_str("auto"),
            FunctionCallPolicy::None => serializer.serialize_str("none"),
            FunctionCallPolicy::Force(name) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("name", name)?;
                map.end()
            }
        }
    }
}

impl From<&str> for FunctionCallPolicy {
    fn from(value: &str) -> Self {
        match value {
            "auto" => FunctionCallPolicy::Auto,
            "none" => FunctionCallPolicy::None,
            name => FunctionCallPolicy::Force(name.to_string()),
        }
    }
}
