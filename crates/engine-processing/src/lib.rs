pub mod args;
pub mod artifacts;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod retry;
pub mod trigger;
