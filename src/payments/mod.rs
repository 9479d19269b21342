//! Payment processor seam.
//!
//! The checkout builder hands the processor a list of line items and the two
//! redirect destinations, and gets back a hosted session: an identifier (which
//! becomes the local snapshot's primary key) and a URL to send the buyer to.
//! The concrete client lives with the application; this crate only defines the
//! trait and the wire-shaped types, which keeps the whole checkout path
//! testable against canned gateways.

use crate::errors::Result;
use serde::{Deserialize, Serialize};

/// One billable line handed to the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    /// Display name shown on the hosted payment page
    pub name: String,
    /// Unit amount in integer minor units
    pub unit_amount_minor: i64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Number of units
    pub quantity: i32,
}

/// Everything the processor needs to mint a hosted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Billable lines, including fee and shipping lines
    pub line_items: Vec<SessionLineItem>,
    /// Where the buyer lands after paying
    pub success_url: String,
    /// Where the buyer lands after abandoning
    pub cancel_url: String,
    /// Opaque reference tying the session back to the buyer
    pub client_reference: String,
}

/// The processor's answer: a session id and somewhere to send the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedSession {
    /// Processor-assigned session identifier
    pub session_id: String,
    /// Hosted payment page for the buyer
    pub redirect_url: String,
}

/// Creates hosted payment sessions with the external processor.
///
/// Implementations map their transport failures to [`crate::errors::Error::Payment`].
#[allow(async_fn_in_trait)]
pub trait PaymentGateway {
    /// Creates a hosted session for the given line items and redirect targets.
    async fn create_session(&self, request: SessionRequest) -> Result<HostedSession>;
}
