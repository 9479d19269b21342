//! Conversation event entity - Human-readable system messages in a thread.
//!
//! Every offer transition appends one of these. Appends are idempotent on the
//! (`offer_id`, `offer_status`) pair so a retried transition never produces a
//! duplicate message.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Conversation event database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversation_events")]
pub struct Model {
    /// Unique identifier for the event
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Conversation the event belongs to
    pub conversation_id: i64,
    /// Offer whose transition produced this event
    pub offer_id: i64,
    /// The resulting offer status, e.g. `"accepted"`
    pub offer_status: String,
    /// Human-readable message shown in the thread
    pub body: String,
    /// When the event was appended
    pub created_at: DateTimeUtc,
}

/// Defines relationships between ConversationEvent and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each event belongs to one conversation
    #[sea_orm(
        belongs_to = "super::conversation::Entity",
        from = "Column::ConversationId",
        to = "super::conversation::Column::Id"
    )]
    Conversation,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
