use anyhow::bail;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::FunctionProvider;
use super::registry::FunctionDescriptor;

#[derive(Debug, Deserialize)]
struct Operands {
    a: f64,
    b: f64,
}

/// Basic arithmetic on two numbers
#[derive(Debug, Clone, Default)]
pub struct MathFunctions;

impl MathFunctions {
    pub fn new() -> Self {
        Self
    }

    fn operands_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": {
                    "type": "number",
                    "description": "The first operand"
                },
                "b": {
                    "type": "number",
                    "description": "The second operand"
                }
            },
            "required": ["a", "b"]
        })
    }
}

impl FunctionProvider for MathFunctions {
    fn source(&self) -> &str {
        "math"
    }

    fn functions(&self) -> Vec<FunctionDescriptor> {
        vec![
            FunctionDescriptor::new(
                "add",
                "Add two numbers together",
                Self::operands_schema(),
                |Operands { a, b }: Operands| async move { Ok::<_, anyhow::Error>(a + b) },
            ),
            FunctionDescriptor::new(
                "subtract",
                "Subtract b from a",
                Self::operands_schema(),
                |Operands { a, b }: Operands| async move { Ok::<_, anyhow::Error>(a - b) },
            ),
            FunctionDescriptor::new(
                "multiply",
                "Multiply two numbers",
                Self::operands_schema(),
                |Operands { a, b }: Operands| async move { Ok::<_, anyhow::Error>(a * b) },
            ),
            FunctionDescriptor::new(
                "divide",
                "Divide a by b",
                Self::operands_schema(),
                |Operands { a, b }: Operands| async move {
                    if b == 0.0 {
                        bail!("cannot divide {} by zero", a);
                    }
                    Ok(a / b)
                },
            ),
        ]
    }
}
