pub mod agent;
pub mod configuration;
pub mod errors;
pub mod functions;
pub mod memory;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod retry;
pub mod usage;
