use super::registry::FunctionDescriptor;

/// A source of functions, such as a module of related tools.
///
/// Several providers can be merged into one `FunctionRegistry` with
/// `FunctionRegistry::from_providers`.
pub trait FunctionProvider: Send + Sync {
    /// Where the functions come from, used when reporting name collisions
    fn source(&self) -> &str;

    /// The functions offered, in the order they should be presented to the model
    fn functions(&self) -> Vec<FunctionDescriptor>;
}
