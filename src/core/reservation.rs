//! Purchasability predicate over listing inventory.
//!
//! A reservation is a time-boxed claim on a listing's stock, granted when an
//! offer is accepted. Expiry is lazy: nothing sweeps lapsed reservations, so
//! "is there a reservation" must always be computed fresh against the clock,
//! never cached. Both checkout paths (accepted offer and multi-item cart) call
//! [`check_purchasable`] with identical semantics; the only difference is
//! whether an offer id is supplied.

use crate::entities::listing;
use crate::errors::Unavailable;
use chrono::{DateTime, Utc};

/// Returns true while `reserved_until` lies strictly in the future.
///
/// This is the one definition of "active reservation" in the engine. Once the
/// instant passes, the reservation is inert even though the listing columns
/// remain populated.
#[must_use]
pub fn reservation_active(reserved_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    reserved_until.is_some_and(|until| until > now)
}

/// Checks whether `buyer_id` can purchase `requested_qty` units of a listing
/// right now.
///
/// Deterministic and side-effect-free; `now` is a parameter so verdicts are
/// testable without a clock. With an offer id (offer checkout), any active
/// reservation must belong to this buyer and reference exactly that offer.
/// Without one (cart checkout), someone else's active reservation blocks the
/// purchase outright.
pub fn check_purchasable(
    listing: &listing::Model,
    buyer_id: &str,
    requested_qty: i32,
    offer_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<(), Unavailable> {
    if listing.status != "active" {
        return Err(Unavailable::Inactive);
    }

    if reservation_active(listing.reserved_until, now) {
        let held_by_buyer = listing.reserved_by.as_deref() == Some(buyer_id);
        match offer_id {
            Some(offer_id) => {
                if !held_by_buyer {
                    return Err(Unavailable::ReservedByOther);
                }
                if listing.reserved_offer_id != Some(offer_id) {
                    return Err(Unavailable::ReservationMismatch);
                }
            }
            None => {
                if !held_by_buyer {
                    return Err(Unavailable::Reserved);
                }
            }
        }
    }

    if listing.quantity < requested_qty {
        return Err(Unavailable::InsufficientStock {
            requested: requested_qty,
            available: listing.quantity,
        });
    }

    Ok(())
}
