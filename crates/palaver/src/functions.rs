mod error;
mod math;
mod provider;
mod registry;

pub use error::{FunctionError, RegistryError};
pub use math::MathFunctions;
pub use provider::FunctionProvider;
pub use registry::{FunctionDescriptor, FunctionRegistry, HandlerFuture};
