//! Offer entity - One row per proposed price in a negotiation chain.
//!
//! Offers are always anchored to a conversation; `created_by_user_id` and
//! `offered_to_user_id` are resolved from the conversation row, never from the
//! client. A counter-offer links back to the row it superseded via
//! `parent_offer_id`. Status is stored as a string; the typed state machine
//! lives in [`crate::core::offer::OfferStatus`].

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Offer database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "offers")]
pub struct Model {
    /// Unique identifier for the offer
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Conversation this offer is negotiated in
    pub conversation_id: i64,
    /// Listing the offer is for
    pub listing_id: i64,
    /// User who proposed this amount
    pub created_by_user_id: String,
    /// User who may accept, reject, or counter it
    pub offered_to_user_id: String,
    /// Proposed price in integer minor units (always positive)
    pub amount_minor: i64,
    /// ISO 4217 currency code, e.g. `"GBP"`
    pub currency: String,
    /// Current status: `"pending"`, `"accepted"`, `"rejected"`, `"countered"`,
    /// `"cancelled"`, or `"expired"`
    pub status: String,
    /// The offer this one superseded, when it was created as a counter
    pub parent_offer_id: Option<i64>,
    /// When a still-pending offer stops being actionable (checked lazily)
    pub expires_at: Option<DateTimeUtc>,
    /// When the offer was created
    pub created_at: DateTimeUtc,
    /// When the offer last changed status
    pub updated_at: DateTimeUtc,
    /// Set once on acceptance
    pub accepted_at: Option<DateTimeUtc>,
    /// Set once on rejection
    pub rejected_at: Option<DateTimeUtc>,
    /// Set once on withdrawal
    pub cancelled_at: Option<DateTimeUtc>,
}

/// Defines relationships between Offer and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each offer belongs to one conversation
    #[sea_orm(
        belongs_to = "super::conversation::Entity",
        from = "Column::ConversationId",
        to = "super::conversation::Column::Id"
    )]
    Conversation,
    /// Each offer targets one listing
    #[sea_orm(
        belongs_to = "super::listing::Entity",
        from = "Column::ListingId",
        to = "super::listing::Column::Id"
    )]
    Listing,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl Related<super::listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Listing.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
