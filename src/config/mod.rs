/// Database configuration and connection management
pub mod database;

/// Checkout and negotiation policy loading from policy.toml
pub mod policy;
