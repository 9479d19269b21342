//! Conversation binding - Role resolution and idempotent system events.
//!
//! Buyer and seller identity for an offer is always resolved from its bound
//! conversation row, never from client-supplied role claims, so a participant
//! cannot impersonate the counterparty. This module also owns the idempotent
//! system-event append that every offer transition goes through.

use crate::{
    entities::{Conversation, ConversationEvent, conversation, conversation_event, listing},
    errors::{Error, Result},
};
use sea_orm::{Set, prelude::*};
use tracing::warn;

/// Which side of a conversation a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The prospective buyer
    Buyer,
    /// The listing's seller
    Seller,
}

/// Resolves a user's role in a conversation, or None for non-participants.
#[must_use]
pub fn role_of(conversation: &conversation::Model, user_id: &str) -> Option<Role> {
    if conversation.buyer_user_id == user_id {
        Some(Role::Buyer)
    } else if conversation.seller_user_id == user_id {
        Some(Role::Seller)
    } else {
        None
    }
}

/// Finds a conversation by its unique ID.
pub async fn get_conversation_by_id(
    db: &DatabaseConnection,
    conversation_id: i64,
) -> Result<Option<conversation::Model>> {
    Conversation::find_by_id(conversation_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds the buyer's conversation for a listing.
pub async fn find_for_buyer(
    db: &DatabaseConnection,
    listing_id: i64,
    buyer_user_id: &str,
) -> Result<Option<conversation::Model>> {
    Conversation::find()
        .filter(conversation::Column::ListingId.eq(listing_id))
        .filter(conversation::Column::BuyerUserId.eq(buyer_user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Returns the buyer's conversation for a listing, rebuilding it once if the
/// thread is missing.
///
/// The rebuild derives the seller from the listing row and takes the supplied
/// peer as the buyer. It exists to paper over eventual-consistency gaps where
/// the messaging side has not materialized the thread yet; it is not a normal
/// code path, and a peer who turns out to be the seller is refused.
pub async fn find_or_rebuild(
    db: &DatabaseConnection,
    listing: &listing::Model,
    peer_user_id: &str,
) -> Result<conversation::Model> {
    if let Some(found) = find_for_buyer(db, listing.id, peer_user_id).await? {
        return Ok(found);
    }

    if listing.seller_id == peer_user_id {
        return Err(Error::InvalidInput {
            message: "cannot open a negotiation on your own listing".to_string(),
        });
    }

    warn!(
        listing_id = listing.id,
        peer = peer_user_id,
        "conversation missing, rebuilding thread from listing"
    );

    let rebuilt = conversation::ActiveModel {
        listing_id: Set(listing.id),
        buyer_user_id: Set(peer_user_id.to_string()),
        seller_user_id: Set(listing.seller_id.clone()),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };

    rebuilt.insert(db).await.map_err(Into::into)
}

/// Appends a human-readable system event to a conversation, at most once per
/// (offer, resulting status) pair.
///
/// Offer transitions can be retried by callers; the (offer, status) key makes
/// the retry append a no-op instead of a duplicate thread message. Runs on any
/// connection so transitions can include it in their transaction.
pub async fn ensure_system_event<C>(
    conn: &C,
    conversation_id: i64,
    offer_id: i64,
    offer_status: &str,
    body: String,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let existing = ConversationEvent::find()
        .filter(conversation_event::Column::OfferId.eq(offer_id))
        .filter(conversation_event::Column::OfferStatus.eq(offer_status))
        .one(conn)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let event = conversation_event::ActiveModel {
        conversation_id: Set(conversation_id),
        offer_id: Set(offer_id),
        offer_status: Set(offer_status.to_string()),
        body: Set(body),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    };

    event.insert(conn).await?;
    Ok(())
}
