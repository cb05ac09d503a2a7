use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::{FunctionError, RegistryError};
use super::provider::FunctionProvider;
use crate::models::function::FunctionSchema;

/// Future returned by a type-erased function handler
pub type HandlerFuture = BoxFuture<'static, Result<Value, FunctionError>>;

type Handler = Arc<dyn Fn(&str) -> HandlerFuture + Send + Sync>;

/// A function the model may call: its schema plus the handler that runs it
#[derive(Clone)]
pub struct FunctionDescriptor {
    schema: FunctionSchema,
    handler: Handler,
}

impl FunctionDescriptor {
    /// Wrap a typed async handler. The model's arguments are decoded into `A` before the
    /// handler runs and the handler's output is encoded back to JSON.
    pub fn new<N, D, A, R, F, Fut>(name: N, description: D, parameters: Value, handler: F) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let schema = FunctionSchema::new(name, description, parameters);
        let name = schema.name.clone();

        let erased: Handler = Arc::new(move |arguments: &str| -> HandlerFuture {
            let name = name.clone();
            let decoded = match decode_arguments::<A>(arguments) {
                Ok(decoded) => decoded,
                Err(source) => {
                    return Box::pin(future::ready(Err(FunctionError::ArgumentDecode {
                        name,
                        source,
                    })))
                }
            };
            let running = handler(decoded);
            Box::pin(async move {
                let output = running.await.map_err(|source| FunctionError::Handler {
                    name: name.clone(),
                    source,
                })?;
                serde_json::to_value(output).map_err(|e| FunctionError::Handler {
                    name,
                    source: e.into(),
                })
            })
        });

        Self {
            schema,
            handler: erased,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &FunctionSchema {
        &self.schema
    }

    pub async fn call(&self, arguments: &str) -> Result<Value, FunctionError> {
        (self.handler)(arguments).await
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

// Models send an empty string for functions without parameters
fn decode_arguments<A: DeserializeOwned>(arguments: &str) -> Result<A, serde_json::Error> {
    if arguments.trim().is_empty() {
        serde_json::from_str("{}")
    } else {
        serde_json::from_str(arguments)
    }
}

/// Functions available to an agent, keyed by name and kept in registration order.
///
/// A registry is read-only once built and is meant to be shared between agents behind an
/// `Arc`; whatever side effects a handler has are its own business.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    functions: Vec<FunctionDescriptor>,
    index: HashMap<String, usize>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the functions of several providers. A name offered by two providers is a
    /// configuration error.
    pub fn from_providers(providers: &[&dyn FunctionProvider]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        let mut origin: HashMap<String, String> = HashMap::new();

        for provider in providers {
            for descriptor in provider.functions() {
                if let Some(first) = origin.get(descriptor.name()) {
                    return Err(RegistryError::DuplicateFunction {
                        name: descriptor.name().to_string(),
                        first: first.clone(),
                        second: provider.source().to_string(),
                    });
                }
                origin.insert(descriptor.name().to_string(), provider.source().to_string());
                registry.register(descriptor);
            }
            tracing::debug!(source = provider.source(), "loaded function provider");
        }

        Ok(registry)
    }

    /// Add a function, replacing any function of the same name in place.
    /// Returns the replaced descriptor.
    pub fn register(&mut self, descriptor: FunctionDescriptor) -> Option<FunctionDescriptor> {
        match self.index.get(descriptor.name()).copied() {
            Some(position) => Some(std::mem::replace(
                &mut self.functions[position],
                descriptor,
            )),
            None => {
                self.index
                    .insert(descriptor.name().to_string(), self.functions.len());
                self.functions.push(descriptor);
                None
            }
        }
    }

    pub fn with_function(mut self, descriptor: FunctionDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// The schemas handed to the model, in registration order
    pub fn schemas(&self) -> Vec<FunctionSchema> {
        self.functions.iter().map(|f| f.schema().clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.index.get(name).map(|&position| &self.functions[position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Decode `arguments` and run the named function
    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<Value, FunctionError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| FunctionError::NotFound(name.to_string()))?;
        descriptor.call(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Greeting {
        name: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("the kettle is empty")]
    struct KettleEmpty;

    fn greet() -> FunctionDescriptor {
        FunctionDescriptor::new(
            "greet",
            "Greet someone by name",
            json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
            |args: Greeting| async move { Ok::<_, anyhow::Error>(format!("hello {}", args.name)) },
        )
    }

    fn brew() -> FunctionDescriptor {
        FunctionDescriptor::new(
            "brew",
            "Brew tea",
            json!({"type": "object", "properties": {}}),
            |_: Value| async move { Err::<String, _>(anyhow::Error::new(KettleEmpty)) },
        )
    }

    struct StaticProvider {
        source: &'static str,
        functions: Vec<FunctionDescriptor>,
    }

    impl FunctionProvider for StaticProvider {
        fn source(&self) -> &str {
            self.source
        }

        fn functions(&self) -> Vec<FunctionDescriptor> {
            self.functions.clone()
        }
    }

    #[tokio::test]
    async fn test_invoke_decodes_arguments() {
        let registry = FunctionRegistry::new().with_function(greet());
        let result = registry.invoke("greet", r#"{"name": "Ada"}"#).await.unwrap();
        assert_eq!(result, json!("hello Ada"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_function() {
        let registry = FunctionRegistry::new().with_function(greet());
        let err = registry.invoke("wave", "{}").await.unwrap_err();
        assert!(matches!(err, FunctionError::NotFound(name) if name == "wave"));
    }

    #[tokio::test]
    async fn test_invoke_bad_arguments() {
        let registry = FunctionRegistry::new().with_function(greet());

        let err = registry.invoke("greet", "{name: Ada").await.unwrap_err();
        assert!(matches!(err, FunctionError::ArgumentDecode { ref name, .. } if name == "greet"));

        // well formed JSON of the wrong shape is a decode failure too
        let err = registry.invoke("greet", r#"{"nom": "Ada"}"#).await.unwrap_err();
        assert!(matches!(err, FunctionError::ArgumentDecode { .. }));
    }

    #[tokio::test]
    async fn test_handler_error_keeps_original() {
        let registry = FunctionRegistry::new().with_function(brew());
        let err = registry.invoke("brew", "").await.unwrap_err();

        match err {
            FunctionError::Handler { name, source } => {
                assert_eq!(name, "brew");
                assert!(source.downcast_ref::<KettleEmpty>().is_some());
            }
            other => panic!("Expected handler error, got {other:?}"),
        }
    }

    #[test]
    fn test_register_overwrites_in_place() {
        let mut registry = FunctionRegistry::new().with_function(greet()).with_function(brew());
        let replacement = FunctionDescriptor::new(
            "greet",
            "Greet someone loudly",
            json!({"type": "object"}),
            |args: Greeting| async move { Ok::<_, anyhow::Error>(args.name.to_uppercase()) },
        );

        let previous = registry.register(replacement);
        assert_eq!(
            previous.map(|d| d.schema().description.clone()),
            Some("Greet someone by name".to_string())
        );

        let schemas = registry.schemas();
        assert_eq!(registry.len(), 2);
        assert_eq!(schemas[0].name, "greet");
        assert_eq!(schemas[0].description, "Greet someone loudly");
        assert_eq!(schemas[1].name, "brew");
    }

    #[test]
    fn test_schemas_serialize_without_handlers() {
        let registry = FunctionRegistry::new().with_function(greet());
        let value = serde_json::to_value(registry.schemas()).unwrap();
        assert_eq!(
            value[0].as_object().map(|o| {
                let mut keys: Vec<_> = o.keys().cloned().collect();
                keys.sort();
                keys
            }),
            Some(vec![
                "description".to_string(),
                "name".to_string(),
                "parameters".to_string()
            ])
        );
    }

    #[test]
    fn test_from_providers_rejects_duplicates() {
        let first = StaticProvider {
            source: "greetings",
            functions: vec![greet()],
        };
        let second = StaticProvider {
            source: "more_greetings",
            functions: vec![brew(), greet()],
        };

        let err = FunctionRegistry::from_providers(&[&first, &second]).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateFunction {
                name: "greet".into(),
                first: "greetings".into(),
                second: "more_greetings".into(),
            }
        );
    }

    #[test]
    fn test_from_providers_merges_in_order() {
        let first = StaticProvider {
            source: "greetings",
            functions: vec![greet()],
        };
        let second = StaticProvider {
            source: "kitchen",
            functions: vec![brew()],
        };

        let registry = FunctionRegistry::from_providers(&[&first, &second]).unwrap();
        let names: Vec<_> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["greet", "brew"]);
    }
}
