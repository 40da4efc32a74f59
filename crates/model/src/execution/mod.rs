pub mod decision;
pub mod ledger;
pub mod stats;
pub mod step;
pub mod summary;
