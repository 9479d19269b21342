//! Negotiation and checkout policy loading from policy.toml
//!
//! This module provides the tunable numbers the engine runs on: service fee
//! rate and floor, the flat standard-shipping charge, the three passive TTLs
//! (reservation, offer, checkout session), and the redirect destinations
//! handed to the payment processor. Values come from a TOML file with serde
//! defaults, so a missing file or a partial file both yield a working policy.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Tunable policy for fees, TTLs, and payment redirects.
///
/// Every field has a default, so `Policy::default()` is a complete,
/// sensible configuration for tests and local runs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Policy {
    /// Service fee rate in basis points (250 = 2.5%)
    pub service_fee_bps: i64,
    /// Lower bound on the service fee, in minor units
    pub min_service_fee_minor: i64,
    /// Flat charge for standard shipping, in minor units
    pub standard_shipping_minor: i64,
    /// How long an accepted offer holds the listing's stock, in hours
    pub reservation_ttl_hours: i64,
    /// How long a pending offer stays actionable, in hours
    pub offer_ttl_hours: i64,
    /// How long a checkout session stays consumable, in minutes
    pub session_ttl_minutes: i64,
    /// Where the processor sends the buyer after payment
    pub success_url: String,
    /// Where the processor sends the buyer on abandonment
    pub cancel_url: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            service_fee_bps: 250,
            min_service_fee_minor: 50,
            standard_shipping_minor: 399,
            reservation_ttl_hours: 48,
            offer_ttl_hours: 72,
            session_ttl_minutes: 60,
            success_url: "https://localhost/checkout/success".to_string(),
            cancel_url: "https://localhost/checkout/cancel".to_string(),
        }
    }
}

/// Loads policy configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
pub fn load_policy<P: AsRef<Path>>(path: P) -> Result<Policy> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read policy file: {e}"),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse policy.toml: {e}"),
    })
}

/// Loads policy from the location named by `HAGGLE_POLICY`, or the built-in
/// defaults when the variable is unset.
///
/// A `.env` file is honored before the environment is read, matching how the
/// rest of the application resolves its configuration.
pub fn load_default_policy() -> Result<Policy> {
    dotenvy::dotenv().ok();
    match std::env::var("HAGGLE_POLICY") {
        Ok(path) => load_policy(path),
        Err(_) => Ok(Policy::default()),
    }
}
