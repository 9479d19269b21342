//! Conversation entity - The two-party thread an offer is negotiated in.
//!
//! The conversation row is the source of truth for who the buyer and seller
//! are. Authorization for every offer action is derived from these two columns.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Conversation database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    /// Unique identifier for the conversation
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Listing this conversation is about
    pub listing_id: i64,
    /// The prospective buyer
    pub buyer_user_id: String,
    /// The listing's seller
    pub seller_user_id: String,
    /// When the conversation was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Conversation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each conversation is about one listing
    #[sea_orm(
        belongs_to = "super::listing::Entity",
        from = "Column::ListingId",
        to = "super::listing::Column::Id"
    )]
    Listing,
    /// A conversation can hold many offers
    #[sea_orm(has_many = "super::offer::Entity")]
    Offer,
    /// A conversation accumulates system events
    #[sea_orm(has_many = "super::conversation_event::Entity")]
    ConversationEvent,
}

impl Related<super::listing::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Listing.def()
    }
}

impl Related<super::offer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offer.def()
    }
}

impl Related<super::conversation_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConversationEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
