//! Unified error types for the negotiation and checkout engine.
//!
//! A single [`Error`] enum covers every failure the engine can surface, and
//! [`Error::category`] maps each variant onto the stable taxonomy the API layer
//! exposes to callers. Conflict vocabulary ([`Unavailable`], [`LineProblem`]) is
//! defined here so the reservation predicate and the checkout builder speak the
//! same language.

use serde::Serialize;
use thiserror::Error;

/// Why a listing cannot be purchased right now.
///
/// Produced by the reservation predicate and carried inside [`Error::ListingUnavailable`]
/// and per-line cart problems. Serialized with stable snake_case codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum Unavailable {
    /// The listing is a draft or already sold
    Inactive,
    /// An active reservation held by another buyer blocks cart checkout
    Reserved,
    /// The listing is reserved for a different buyer
    ReservedByOther,
    /// The reservation belongs to this buyer but references a different offer
    ReservationMismatch,
    /// Requested quantity exceeds what is in stock
    InsufficientStock {
        /// Quantity the buyer asked for
        requested: i32,
        /// Quantity actually available
        available: i32,
    },
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Reserved => write!(f, "reserved"),
            Self::ReservedByOther => write!(f, "reserved_by_other"),
            Self::ReservationMismatch => write!(f, "reservation_mismatch"),
            Self::InsufficientStock {
                requested,
                available,
            } => write!(
                f,
                "insufficient_stock (requested {requested}, available {available})"
            ),
        }
    }
}

/// Why a single cart line failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineReason {
    /// The referenced listing does not exist
    NotFound,
    /// Quantity was zero or negative
    InvalidQuantity,
    /// No price representation could be resolved for the listing
    NoPrice,
    /// The listing exists but is not purchasable
    Unavailable(Unavailable),
}

impl std::fmt::Display for LineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidQuantity => write!(f, "invalid_quantity"),
            Self::NoPrice => write!(f, "no_price"),
            Self::Unavailable(reason) => write!(f, "{reason}"),
        }
    }
}

/// One failing cart line, reported alongside every other failing line so the
/// caller can fix a multi-item cart in a single round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineProblem {
    /// The listing the problem applies to
    pub listing_id: i64,
    /// Why this line was refused
    pub reason: LineReason,
}

/// Stable error categories exposed to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Caller identity is missing or the actor is the wrong party for the action
    Unauthorized,
    /// Authenticated but not a party to this offer/conversation
    Forbidden,
    /// Offer, conversation, or listing absent
    NotFound,
    /// Action not valid for the current status
    InvalidState,
    /// Malformed amount, address, or shipping method
    InvalidInput,
    /// Listing unavailable or cart rejected
    Conflict,
    /// Data store or payment processor failure
    Upstream,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("user {user_id} is not a party to this conversation")]
    Forbidden { user_id: String },

    #[error("offer {id} not found")]
    OfferNotFound { id: i64 },

    #[error("no conversation found for listing {listing_id}")]
    ConversationNotFound { listing_id: i64 },

    #[error("listing {id} not found")]
    ListingNotFound { id: i64 },

    #[error("cannot {action} an offer in status {status}")]
    InvalidState { action: String, status: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("listing {listing_id} unavailable: {reason}")]
    ListingUnavailable { listing_id: i64, reason: Unavailable },

    #[error("{} cart line(s) failed validation", problems.len())]
    CartRejected { problems: Vec<LineProblem> },

    #[error("payment provider error: {message}")]
    Payment { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Maps this error onto the stable category the API layer reports.
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Unauthorized { .. } => Category::Unauthorized,
            Self::Forbidden { .. } => Category::Forbidden,
            Self::OfferNotFound { .. }
            | Self::ConversationNotFound { .. }
            | Self::ListingNotFound { .. } => Category::NotFound,
            Self::InvalidState { .. } => Category::InvalidState,
            Self::InvalidInput { .. } => Category::InvalidInput,
            Self::ListingUnavailable { .. } | Self::CartRejected { .. } => Category::Conflict,
            Self::Payment { .. }
            | Self::Config { .. }
            | Self::Database(_)
            | Self::Serialization(_) => Category::Upstream,
        }
    }
}

/// Translates a small set of recognized database failure signatures into
/// actionable hints for operators. This is a diagnostic aid emitted at logging
/// sites, not a stable contract.
#[must_use]
pub fn db_error_hint(err: &sea_orm::DbErr) -> Option<&'static str> {
    let message = err.to_string();
    if message.contains("no such table") {
        Some("schema missing; run config::database::create_tables against this database")
    } else if message.contains("UNIQUE constraint failed") {
        Some("constraint violation; a conflicting row already exists")
    } else {
        None
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
