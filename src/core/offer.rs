//! Offer ledger - The negotiation state machine.
//!
//! Offers move through a fixed lifecycle: created `pending`, then exactly one
//! of `accepted`, `rejected`, `cancelled`, `expired`, or `countered` - the last
//! being non-terminal for the chain, since countering atomically spawns a new
//! pending offer with the roles swapped. Every transition is a conditional
//! UPDATE guarded on the current status, so two concurrent accepts resolve to
//! one winner and one `InvalidState`; the loser never double-applies side
//! effects. Accepting an offer grants the conversation's buyer a time-boxed
//! reservation on the listing's stock in the same database transaction.

use crate::{
    config::policy::Policy,
    core::{conversation as binding, money, reservation},
    entities::{Conversation, Listing, Offer, conversation, listing, offer},
    errors::{Error, Result, Unavailable},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::info;

/// The offer lifecycle states, stored as strings in the `offers` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStatus {
    /// Awaiting a response from the recipient
    Pending,
    /// Agreed; grants the buyer a stock reservation
    Accepted,
    /// Declined by the recipient
    Rejected,
    /// Superseded by a counter-offer in the same chain
    Countered,
    /// Withdrawn by its creator
    Cancelled,
    /// Lapsed past its expiry without a response
    Expired,
}

impl OfferStatus {
    /// The string stored in the database for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Countered => "countered",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parses a stored status string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "countered" => Some(Self::Countered),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a participant may do to a pending offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    /// Recipient agrees to the proposed amount
    Accept,
    /// Recipient declines the proposed amount
    Reject,
    /// Recipient proposes a different amount, superseding this offer
    Counter,
    /// Creator withdraws the offer
    Withdraw,
    /// Accept that also admits a superseded (`countered`) offer, resuming its chain
    AcceptCounter,
}

impl OfferAction {
    /// Short action name used in error reporting.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Counter => "counter",
            Self::Withdraw => "withdraw",
            Self::AcceptCounter => "accept_counter",
        }
    }
}

/// The result of a transition: the updated offer, plus the successor when the
/// action was a counter.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferOutcome {
    /// The offer the action was applied to, re-read after the transition
    pub offer: offer::Model,
    /// The new pending offer spawned by a counter
    pub counter_offer: Option<offer::Model>,
}

/// Creates a new pending offer on a listing, anchored to the buyer's
/// conversation.
///
/// Offers cannot exist outside a conversation: the thread is resolved (or
/// rebuilt once, see [`binding::find_or_rebuild`]) before the offer row is
/// inserted, and the recipient is always the conversation's seller. Rejects
/// non-positive amounts, offers on one's own listing, a currency that differs
/// from the listing's, and a second pending offer in the same conversation.
pub async fn create_offer(
    db: &DatabaseConnection,
    policy: &Policy,
    listing_id: i64,
    buyer_user_id: &str,
    amount_minor: i64,
    currency: &str,
) -> Result<offer::Model> {
    if amount_minor <= 0 {
        return Err(Error::InvalidInput {
            message: format!("offer amount must be positive, got {amount_minor}"),
        });
    }

    let listing = Listing::find_by_id(listing_id)
        .one(db)
        .await?
        .ok_or(Error::ListingNotFound { id: listing_id })?;

    if currency != listing.currency {
        return Err(Error::InvalidInput {
            message: format!(
                "offer currency {currency} does not match listing currency {}",
                listing.currency
            ),
        });
    }

    let conversation = binding::find_or_rebuild(db, &listing, buyer_user_id).await?;

    let txn = db.begin().await?;

    let open = Offer::find()
        .filter(offer::Column::ConversationId.eq(conversation.id))
        .filter(offer::Column::Status.eq(OfferStatus::Pending.as_str()))
        .one(&txn)
        .await?;
    if open.is_some() {
        return Err(Error::InvalidState {
            action: "create".to_string(),
            status: OfferStatus::Pending.as_str().to_string(),
        });
    }

    let now = Utc::now();
    let inserted = offer::ActiveModel {
        conversation_id: Set(conversation.id),
        listing_id: Set(listing_id),
        created_by_user_id: Set(buyer_user_id.to_string()),
        offered_to_user_id: Set(conversation.seller_user_id.clone()),
        amount_minor: Set(amount_minor),
        currency: Set(currency.to_string()),
        status: Set(OfferStatus::Pending.as_str().to_string()),
        parent_offer_id: Set(None),
        expires_at: Set(Some(now + Duration::hours(policy.offer_ttl_hours))),
        created_at: Set(now),
        updated_at: Set(now),
        accepted_at: Set(None),
        rejected_at: Set(None),
        cancelled_at: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    binding::ensure_system_event(
        &txn,
        conversation.id,
        inserted.id,
        OfferStatus::Pending.as_str(),
        format!(
            "New offer: {}",
            money::format_minor(amount_minor, currency)
        ),
    )
    .await?;

    txn.commit().await?;

    info!(
        offer_id = inserted.id,
        listing_id,
        buyer = buyer_user_id,
        amount_minor,
        "offer created"
    );

    Ok(inserted)
}

/// Applies an action to an offer on behalf of an actor.
///
/// Authorization is derived from the bound conversation: a non-participant is
/// `Forbidden`; a participant acting from the wrong side is `Unauthorized`
/// (accept, reject, and counter belong to the recipient; withdraw to the
/// creator). A pending offer observed past its expiry is written back as
/// `expired` on the spot and the action fails with `InvalidState` - the lazy
/// expiry policy, no sweeper involved.
pub async fn respond(
    db: &DatabaseConnection,
    policy: &Policy,
    offer_id: i64,
    actor_user_id: &str,
    action: OfferAction,
    counter_amount_minor: Option<i64>,
) -> Result<OfferOutcome> {
    let offer = Offer::find_by_id(offer_id)
        .one(db)
        .await?
        .ok_or(Error::OfferNotFound { id: offer_id })?;

    let conversation = Conversation::find_by_id(offer.conversation_id)
        .one(db)
        .await?
        .ok_or(Error::ConversationNotFound {
            listing_id: offer.listing_id,
        })?;

    if binding::role_of(&conversation, actor_user_id).is_none() {
        return Err(Error::Forbidden {
            user_id: actor_user_id.to_string(),
        });
    }

    let now = Utc::now();

    if offer.status == OfferStatus::Pending.as_str()
        && offer.expires_at.is_some_and(|at| at <= now)
    {
        expire_offer(db, &offer, &conversation, now).await?;
        return Err(Error::InvalidState {
            action: action.as_str().to_string(),
            status: OfferStatus::Expired.as_str().to_string(),
        });
    }

    match action {
        OfferAction::Accept => {
            authorize_recipient(&offer, actor_user_id, action)?;
            accept_offer(db, policy, &offer, &conversation, now, false).await
        }
        OfferAction::AcceptCounter => {
            authorize_recipient(&offer, actor_user_id, action)?;
            accept_offer(db, policy, &offer, &conversation, now, true).await
        }
        OfferAction::Reject => {
            authorize_recipient(&offer, actor_user_id, action)?;
            close_offer(db, &offer, &conversation, OfferStatus::Rejected, action, now).await
        }
        OfferAction::Withdraw => {
            if actor_user_id != offer.created_by_user_id {
                return Err(Error::Unauthorized {
                    message: "only the offer's creator may withdraw it".to_string(),
                });
            }
            close_offer(db, &offer, &conversation, OfferStatus::Cancelled, action, now).await
        }
        OfferAction::Counter => {
            authorize_recipient(&offer, actor_user_id, action)?;
            let amount = counter_amount_minor.ok_or_else(|| Error::InvalidInput {
                message: "counter requires an amount".to_string(),
            })?;
            if amount <= 0 {
                return Err(Error::InvalidInput {
                    message: format!("counter amount must be positive, got {amount}"),
                });
            }
            counter_offer(db, policy, &offer, &conversation, amount, now).await
        }
    }
}

fn authorize_recipient(
    offer: &offer::Model,
    actor_user_id: &str,
    action: OfferAction,
) -> Result<()> {
    if actor_user_id == offer.offered_to_user_id {
        Ok(())
    } else {
        Err(Error::Unauthorized {
            message: format!(
                "only the offer's recipient may {}",
                action.as_str()
            ),
        })
    }
}

/// Conditionally moves an offer from one status to another, stamping the
/// transition timestamp. Returns false when the guard missed, i.e. another
/// caller already moved the row.
async fn transition_status<C>(
    conn: &C,
    offer_id: i64,
    from: OfferStatus,
    to: OfferStatus,
    now: DateTime<Utc>,
) -> Result<bool>
where
    C: ConnectionTrait,
{
    let update = Offer::update_many()
        .col_expr(offer::Column::Status, Expr::value(to.as_str()))
        .col_expr(offer::Column::UpdatedAt, Expr::value(now));

    let update = match to {
        OfferStatus::Accepted => update.col_expr(offer::Column::AcceptedAt, Expr::value(Some(now))),
        OfferStatus::Rejected => update.col_expr(offer::Column::RejectedAt, Expr::value(Some(now))),
        OfferStatus::Cancelled => {
            update.col_expr(offer::Column::CancelledAt, Expr::value(Some(now)))
        }
        _ => update,
    };

    let result = update
        .filter(offer::Column::Id.eq(offer_id))
        .filter(offer::Column::Status.eq(from.as_str()))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}

async fn observed_status<C>(conn: &C, offer_id: i64) -> Result<String>
where
    C: ConnectionTrait,
{
    Offer::find_by_id(offer_id)
        .one(conn)
        .await?
        .map(|offer| offer.status)
        .ok_or(Error::OfferNotFound { id: offer_id })
}

async fn reread(db: &DatabaseConnection, offer_id: i64) -> Result<offer::Model> {
    Offer::find_by_id(offer_id)
        .one(db)
        .await?
        .ok_or(Error::OfferNotFound { id: offer_id })
}

/// Marks a pending offer expired, lazily, at the moment it is observed past
/// its expiry. The conditional update keeps this safe under races.
async fn expire_offer(
    db: &DatabaseConnection,
    offer: &offer::Model,
    conversation: &conversation::Model,
    now: DateTime<Utc>,
) -> Result<()> {
    let txn = db.begin().await?;
    if transition_status(&txn, offer.id, OfferStatus::Pending, OfferStatus::Expired, now).await? {
        binding::ensure_system_event(
            &txn,
            conversation.id,
            offer.id,
            OfferStatus::Expired.as_str(),
            format!(
                "Offer of {} expired",
                money::format_minor(offer.amount_minor, &offer.currency)
            ),
        )
        .await?;
        txn.commit().await?;
        info!(offer_id = offer.id, "pending offer expired lazily");
    }
    Ok(())
}

async fn accept_offer(
    db: &DatabaseConnection,
    policy: &Policy,
    offer: &offer::Model,
    conversation: &conversation::Model,
    now: DateTime<Utc>,
    allow_countered: bool,
) -> Result<OfferOutcome> {
    let txn = db.begin().await?;

    let mut resumed_chain = false;
    if !transition_status(&txn, offer.id, OfferStatus::Pending, OfferStatus::Accepted, now).await? {
        if allow_countered
            && transition_status(&txn, offer.id, OfferStatus::Countered, OfferStatus::Accepted, now)
                .await?
        {
            resumed_chain = true;
        } else {
            let status = observed_status(&txn, offer.id).await?;
            return Err(Error::InvalidState {
                action: "accept".to_string(),
                status,
            });
        }
    }

    if resumed_chain {
        // accepting a superseded offer closes the counter that superseded it,
        // keeping a single live offer per chain
        if let Some(successor) = Offer::find()
            .filter(offer::Column::ParentOfferId.eq(offer.id))
            .filter(offer::Column::Status.eq(OfferStatus::Pending.as_str()))
            .one(&txn)
            .await?
        {
            transition_status(
                &txn,
                successor.id,
                OfferStatus::Pending,
                OfferStatus::Cancelled,
                now,
            )
            .await?;
            binding::ensure_system_event(
                &txn,
                conversation.id,
                successor.id,
                OfferStatus::Cancelled.as_str(),
                format!(
                    "Offer of {} withdrawn",
                    money::format_minor(successor.amount_minor, &successor.currency)
                ),
            )
            .await?;
        }
    }

    let listing = Listing::find_by_id(offer.listing_id)
        .one(&txn)
        .await?
        .ok_or(Error::ListingNotFound {
            id: offer.listing_id,
        })?;

    // an accept never steals another buyer's live reservation
    if reservation::reservation_active(listing.reserved_until, now)
        && listing.reserved_by.as_deref() != Some(conversation.buyer_user_id.as_str())
    {
        return Err(Error::ListingUnavailable {
            listing_id: listing.id,
            reason: Unavailable::ReservedByOther,
        });
    }

    let listing_id = listing.id;
    let mut hold: listing::ActiveModel = listing.into();
    hold.reserved_by = Set(Some(conversation.buyer_user_id.clone()));
    hold.reserved_until = Set(Some(now + Duration::hours(policy.reservation_ttl_hours)));
    hold.reserved_offer_id = Set(Some(offer.id));
    hold.update(&txn).await?;

    binding::ensure_system_event(
        &txn,
        conversation.id,
        offer.id,
        OfferStatus::Accepted.as_str(),
        format!(
            "Offer of {} accepted",
            money::format_minor(offer.amount_minor, &offer.currency)
        ),
    )
    .await?;

    txn.commit().await?;

    info!(
        offer_id = offer.id,
        listing_id,
        buyer = %conversation.buyer_user_id,
        "offer accepted, stock reserved"
    );

    Ok(OfferOutcome {
        offer: reread(db, offer.id).await?,
        counter_offer: None,
    })
}

async fn close_offer(
    db: &DatabaseConnection,
    offer: &offer::Model,
    conversation: &conversation::Model,
    to: OfferStatus,
    action: OfferAction,
    now: DateTime<Utc>,
) -> Result<OfferOutcome> {
    let txn = db.begin().await?;

    if !transition_status(&txn, offer.id, OfferStatus::Pending, to, now).await? {
        let status = observed_status(&txn, offer.id).await?;
        return Err(Error::InvalidState {
            action: action.as_str().to_string(),
            status,
        });
    }

    let verb = match to {
        OfferStatus::Rejected => "declined",
        _ => "withdrawn",
    };
    binding::ensure_system_event(
        &txn,
        conversation.id,
        offer.id,
        to.as_str(),
        format!(
            "Offer of {} {verb}",
            money::format_minor(offer.amount_minor, &offer.currency)
        ),
    )
    .await?;

    txn.commit().await?;

    info!(offer_id = offer.id, status = to.as_str(), "offer closed");

    Ok(OfferOutcome {
        offer: reread(db, offer.id).await?,
        counter_offer: None,
    })
}

/// The two-write counter transition: supersede the pending offer AND insert
/// its successor with the roles swapped, inside one database transaction, so a
/// crash can never leave a countered offer with no successor.
async fn counter_offer(
    db: &DatabaseConnection,
    policy: &Policy,
    offer: &offer::Model,
    conversation: &conversation::Model,
    amount_minor: i64,
    now: DateTime<Utc>,
) -> Result<OfferOutcome> {
    let txn = db.begin().await?;

    if !transition_status(&txn, offer.id, OfferStatus::Pending, OfferStatus::Countered, now).await?
    {
        let status = observed_status(&txn, offer.id).await?;
        return Err(Error::InvalidState {
            action: OfferAction::Counter.as_str().to_string(),
            status,
        });
    }

    let successor = offer::ActiveModel {
        conversation_id: Set(conversation.id),
        listing_id: Set(offer.listing_id),
        created_by_user_id: Set(offer.offered_to_user_id.clone()),
        offered_to_user_id: Set(offer.created_by_user_id.clone()),
        amount_minor: Set(amount_minor),
        currency: Set(offer.currency.clone()),
        status: Set(OfferStatus::Pending.as_str().to_string()),
        parent_offer_id: Set(Some(offer.id)),
        expires_at: Set(Some(now + Duration::hours(policy.offer_ttl_hours))),
        created_at: Set(now),
        updated_at: Set(now),
        accepted_at: Set(None),
        rejected_at: Set(None),
        cancelled_at: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    binding::ensure_system_event(
        &txn,
        conversation.id,
        offer.id,
        OfferStatus::Countered.as_str(),
        format!(
            "Offer of {} countered with {}",
            money::format_minor(offer.amount_minor, &offer.currency),
            money::format_minor(amount_minor, &offer.currency)
        ),
    )
    .await?;
    binding::ensure_system_event(
        &txn,
        conversation.id,
        successor.id,
        OfferStatus::Pending.as_str(),
        format!(
            "New offer: {}",
            money::format_minor(amount_minor, &offer.currency)
        ),
    )
    .await?;

    txn.commit().await?;

    info!(
        offer_id = offer.id,
        successor_id = successor.id,
        amount_minor,
        "offer countered"
    );

    Ok(OfferOutcome {
        offer: reread(db, offer.id).await?,
        counter_offer: Some(successor),
    })
}
