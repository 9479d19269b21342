//! Core business logic for offer negotiation, reservation, and checkout.
//!
//! These modules are framework-agnostic: they take a database connection, a
//! policy, and plain inputs, and return domain models or structured errors.
//! The transport layer above decides how requests arrive; the entities below
//! decide how rows are shaped.

/// Checkout session builder - validation, totals, snapshot persistence
pub mod checkout;
/// Conversation binding - role resolution and idempotent system events
pub mod conversation;
/// Minor-unit money arithmetic and formatting
pub mod money;
/// Offer ledger - the negotiation state machine
pub mod offer;
/// Pure purchasability predicate over listing inventory
pub mod reservation;
