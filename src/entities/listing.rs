//! Listing entity - The reservation-relevant slice of a marketplace listing.
//!
//! Listing rows are owned by the wider application; this engine reads status,
//! stock, and price, and writes the reservation triple (`reserved_by`,
//! `reserved_until`, `reserved_offer_id`). A reservation is active only while
//! `reserved_until` lies in the future; once passed it is inert even if the
//! columns remain populated. The three price columns are generations of the
//! same fact - not every row carries the newest representation, so the
//! checkout builder resolves them in order.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Listing database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "listings")]
pub struct Model {
    /// Unique identifier for the listing
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who owns and sells this listing
    pub seller_id: String,
    /// Display title, passed through as payment line-item metadata
    pub title: String,
    /// ISO 4217 currency code for the price fields
    pub currency: String,
    /// Lifecycle status: `"active"`, `"draft"`, or `"sold"`
    pub status: String,
    /// Units in stock (never negative)
    pub quantity: i32,
    /// Price in integer minor units - the newest representation
    pub price_minor: Option<i64>,
    /// Price as a decimal major-unit amount, e.g. `12.5` for £12.50
    pub price: Option<f64>,
    /// Formatted display price, e.g. `"£12.50"` - the oldest representation
    pub price_display: Option<String>,
    /// Buyer currently holding the reservation, if any
    pub reserved_by: Option<String>,
    /// Moment the reservation lapses; meaningful only while in the future
    pub reserved_until: Option<DateTimeUtc>,
    /// Offer that granted the current reservation
    pub reserved_offer_id: Option<i64>,
}

/// Defines relationships between Listing and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// A listing can be the subject of many conversations
    #[sea_orm(has_many = "super::conversation::Entity")]
    Conversation,
    /// A listing can receive many offers
    #[sea_orm(has_many = "super::offer::Entity")]
    Offer,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl Related<super::offer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Offer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
