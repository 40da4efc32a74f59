pub mod identifiers;
pub mod identity;
