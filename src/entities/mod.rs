//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod checkout_session;
pub mod conversation;
pub mod conversation_event;
pub mod listing;
pub mod offer;

// Re-export specific types to avoid conflicts
pub use checkout_session::{
    Column as CheckoutSessionColumn, Entity as CheckoutSession, Model as CheckoutSessionModel,
};
pub use conversation::{
    Column as ConversationColumn, Entity as Conversation, Model as ConversationModel,
};
pub use conversation_event::{
    Column as ConversationEventColumn, Entity as ConversationEvent, Model as ConversationEventModel,
};
pub use listing::{Column as ListingColumn, Entity as Listing, Model as ListingModel};
pub use offer::{Column as OfferColumn, Entity as Offer, Model as OfferModel};
