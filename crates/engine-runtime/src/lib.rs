pub mod error;
pub mod factory;
pub mod orchestrator;
