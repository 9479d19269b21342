//! Checkout session entity - Local snapshot of a hosted payment session.
//!
//! The primary key is the session id assigned by the external payment
//! processor, which makes the local write a natural idempotent upsert. The
//! payload column stores the full charge snapshot (lines, shipping, totals,
//! redirect URL) so a delayed settlement step can reproduce the total without
//! re-querying listing prices. `consumed_at` and `order_id` are written only by
//! the settlement webhook, never by this engine.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Checkout session database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_sessions")]
pub struct Model {
    /// Session id assigned by the payment processor
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    /// Buyer the session was created for
    pub user_id: String,
    /// Originating accepted offer, when this is an offer-path checkout
    pub offer_id: Option<i64>,
    /// Full charge snapshot as JSON (see `core::checkout::CheckoutSnapshot`)
    pub payload: Json,
    /// Short-lived expiry, about one hour after creation
    pub expires_at: DateTimeUtc,
    /// Set once by the settlement webhook when the session is consumed
    pub consumed_at: Option<DateTimeUtc>,
    /// Order created by the settlement webhook, if any
    pub order_id: Option<String>,
    /// When the snapshot was first persisted
    pub created_at: DateTimeUtc,
}

/// Defines relationships between CheckoutSession and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
