pub mod error;
pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod process;
pub mod retry;
pub mod runner;
