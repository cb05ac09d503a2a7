//! These models represent the objects passed around by the agent
//!
//! Messages and function calls are shaped after the OpenAI chat-completions format with
//! `functions`, since that is what gets replayed to the endpoint on every round. The same
//! structs are used for conversation memory, for outgoing requests, and for the typed
//! completion produced at the boundary.
pub mod function;
pub mod message;
pub mod role;
