//! Checkout session builder.
//!
//! Turns either an accepted offer or a list of cart lines into a hosted
//! payment session plus a locally persisted, idempotent snapshot of the exact
//! charge. Cart validation deliberately accumulates every failing line before
//! reporting, so the caller can fix a multi-item cart in one round trip.
//! Totals are pure integer arithmetic over the validated lines and can be
//! recomputed later from the stored snapshot alone, which is what lets the
//! delayed settlement step trust the recorded total even if listing prices
//! moved in the meantime.

use crate::{
    config::policy::Policy,
    core::{conversation as binding, money, reservation},
    entities::{CheckoutSession, Conversation, Listing, Offer, checkout_session, listing},
    errors::{Error, LineProblem, LineReason, Result},
    payments::{PaymentGateway, SessionLineItem, SessionRequest},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{Set, prelude::*, sea_query::OnConflict};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// One requested cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    /// Listing to purchase
    pub listing_id: i64,
    /// Units requested (must be positive)
    pub quantity: i32,
}

/// What the buyer is checking out: a single accepted offer, or a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutRequest {
    /// Offer-path checkout at the negotiated price
    Offer {
        /// The accepted offer
        offer_id: i64,
    },
    /// Cart-path checkout at listed prices
    Cart {
        /// Requested lines
        lines: Vec<CartLine>,
    },
}

/// How the purchase reaches the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShippingMethod {
    /// Courier delivery at the flat standard rate
    Standard,
    /// Buyer collects in person, no shipping charge
    Collection,
}

/// Delivery address, required for standard shipping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    /// First address line
    pub line1: String,
    /// Optional second address line
    pub line2: Option<String>,
    /// Town or city
    pub city: String,
    /// Postal code
    pub postcode: String,
    /// Country name or code
    pub country: String,
}

/// A complete checkout request.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutInput {
    /// The buyer checking out
    pub user_id: String,
    /// Offer or cart
    pub request: CheckoutRequest,
    /// Chosen shipping method
    pub shipping_method: ShippingMethod,
    /// Delivery address, when the method requires one
    pub shipping_address: Option<ShippingAddress>,
}

/// One validated, priced line as recorded in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLine {
    /// Listing purchased
    pub listing_id: i64,
    /// Listing title, carried as payment metadata
    pub title: String,
    /// Agreed unit price in minor units
    pub unit_minor: i64,
    /// Units purchased
    pub quantity: i32,
}

/// The computed charge, in minor units throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// Sum of unit price times quantity over all lines
    pub items_subtotal_minor: i64,
    /// Marketplace service fee (rate with a floor)
    pub service_fee_minor: i64,
    /// Flat shipping charge, zero for collection
    pub shipping_minor: i64,
    /// Grand total the buyer pays
    pub total_minor: i64,
}

impl Totals {
    /// Computes totals from validated lines and a shipping method.
    ///
    /// Pure function of its inputs; calling it again on the lines stored in a
    /// snapshot reproduces the recorded totals exactly.
    #[must_use]
    pub fn compute(lines: &[SnapshotLine], shipping_method: ShippingMethod, policy: &Policy) -> Self {
        let items_subtotal_minor: i64 = lines
            .iter()
            .map(|line| line.unit_minor * i64::from(line.quantity))
            .sum();
        let service_fee_minor = money::service_fee(
            items_subtotal_minor,
            policy.service_fee_bps,
            policy.min_service_fee_minor,
        );
        let shipping_minor = if shipping_method == ShippingMethod::Standard && !lines.is_empty() {
            policy.standard_shipping_minor
        } else {
            0
        };
        Self {
            items_subtotal_minor,
            service_fee_minor,
            shipping_minor,
            total_minor: items_subtotal_minor + service_fee_minor + shipping_minor,
        }
    }
}

/// Everything the settlement webhook needs, frozen at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSnapshot {
    /// Buyer the charge belongs to
    pub user_id: String,
    /// Originating offer for offer-path checkouts
    pub offer_id: Option<i64>,
    /// Currency of every amount in the snapshot
    pub currency: String,
    /// The validated, priced lines
    pub lines: Vec<SnapshotLine>,
    /// Chosen shipping method
    pub shipping_method: ShippingMethod,
    /// Delivery address, when one was required
    pub shipping_address: Option<ShippingAddress>,
    /// The computed charge
    pub totals: Totals,
    /// Hosted payment page, kept so a resumed submission can re-serve it
    pub redirect_url: String,
}

/// A successfully created (or resumed) checkout session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutReady {
    /// Processor-assigned session id, also the snapshot's primary key
    pub session_id: String,
    /// Where to send the buyer
    pub redirect_url: String,
    /// The charge the session was built for
    pub totals: Totals,
}

/// Resolves a listing's unit price in minor units, tolerating older rows.
///
/// Preference order: the integer minor-unit column, then the decimal column
/// scaled by 100, then the formatted display string with everything but digits
/// and the decimal point stripped. Rows that predate the newest price column
/// must still check out, so this never fails closed while any representation
/// is present and positive.
#[must_use]
pub fn resolve_unit_price(listing: &listing::Model) -> Option<i64> {
    if let Some(minor) = listing.price_minor {
        if minor > 0 {
            return Some(minor);
        }
    }
    if let Some(decimal) = listing.price {
        if decimal.is_finite() && decimal > 0.0 {
            #[allow(clippy::cast_possible_truncation)]
            return Some((decimal * 100.0).round() as i64);
        }
    }
    listing
        .price_display
        .as_deref()
        .and_then(parse_display_price)
}

fn parse_display_price(display: &str) -> Option<i64> {
    let cleaned: String = display
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some((value * 100.0).round() as i64)
}

/// Creates a hosted checkout session and persists its snapshot.
///
/// The offer path charges the negotiated amount for a single unit and requires
/// the caller to be the conversation's buyer; the cart path validates every
/// line against the reservation predicate and listed prices, accumulating all
/// problems into one `CartRejected` error. On success the snapshot is upserted
/// keyed by the processor's session id, so a retried local write is safe.
pub async fn create_checkout_session<G>(
    db: &DatabaseConnection,
    gateway: &G,
    policy: &Policy,
    input: CheckoutInput,
) -> Result<CheckoutReady>
where
    G: PaymentGateway,
{
    validate_shipping(input.shipping_method, input.shipping_address.as_ref())?;

    let now = Utc::now();
    match &input.request {
        CheckoutRequest::Offer { offer_id } => {
            offer_checkout(db, gateway, policy, &input, *offer_id, now).await
        }
        CheckoutRequest::Cart { lines } => {
            cart_checkout(db, gateway, policy, &input, lines, now).await
        }
    }
}

fn validate_shipping(method: ShippingMethod, address: Option<&ShippingAddress>) -> Result<()> {
    match method {
        ShippingMethod::Collection => Ok(()),
        ShippingMethod::Standard => {
            let Some(address) = address else {
                return Err(Error::InvalidInput {
                    message: "standard shipping requires a delivery address".to_string(),
                });
            };
            if address.line1.trim().is_empty()
                || address.city.trim().is_empty()
                || address.postcode.trim().is_empty()
            {
                return Err(Error::InvalidInput {
                    message: "delivery address must include line1, city, and postcode".to_string(),
                });
            }
            Ok(())
        }
    }
}

async fn offer_checkout<G>(
    db: &DatabaseConnection,
    gateway: &G,
    policy: &Policy,
    input: &CheckoutInput,
    offer_id: i64,
    now: DateTime<Utc>,
) -> Result<CheckoutReady>
where
    G: PaymentGateway,
{
    let offer = Offer::find_by_id(offer_id)
        .one(db)
        .await?
        .ok_or(Error::OfferNotFound { id: offer_id })?;

    if offer.status != "accepted" {
        return Err(Error::InvalidState {
            action: "checkout".to_string(),
            status: offer.status,
        });
    }

    let conversation = Conversation::find_by_id(offer.conversation_id)
        .one(db)
        .await?
        .ok_or(Error::ConversationNotFound {
            listing_id: offer.listing_id,
        })?;

    match binding::role_of(&conversation, &input.user_id) {
        Some(binding::Role::Buyer) => {}
        Some(binding::Role::Seller) => {
            return Err(Error::Unauthorized {
                message: "only the buyer can check out an accepted offer".to_string(),
            });
        }
        None => {
            return Err(Error::Forbidden {
                user_id: input.user_id.clone(),
            });
        }
    }

    // one active session per accepted offer: a repeated submission gets the
    // stored session back instead of minting a sibling
    if let Some(existing) = find_active_session_for_offer(db, offer.id, now).await? {
        let snapshot: CheckoutSnapshot = serde_json::from_value(existing.payload.clone())?;
        info!(
            offer_id = offer.id,
            session_id = %existing.session_id,
            "resuming existing checkout session"
        );
        return Ok(CheckoutReady {
            session_id: existing.session_id,
            redirect_url: snapshot.redirect_url,
            totals: snapshot.totals,
        });
    }

    let listing = Listing::find_by_id(offer.listing_id)
        .one(db)
        .await?
        .ok_or(Error::ListingNotFound {
            id: offer.listing_id,
        })?;

    reservation::check_purchasable(&listing, &input.user_id, 1, Some(offer.id), now).map_err(
        |reason| Error::ListingUnavailable {
            listing_id: listing.id,
            reason,
        },
    )?;

    let lines = vec![SnapshotLine {
        listing_id: listing.id,
        title: listing.title.clone(),
        unit_minor: offer.amount_minor,
        quantity: 1,
    }];

    finalize_session(
        db,
        gateway,
        policy,
        input,
        Some(offer.id),
        offer.currency.clone(),
        lines,
        now,
    )
    .await
}

async fn cart_checkout<G>(
    db: &DatabaseConnection,
    gateway: &G,
    policy: &Policy,
    input: &CheckoutInput,
    lines: &[CartLine],
    now: DateTime<Utc>,
) -> Result<CheckoutReady>
where
    G: PaymentGateway,
{
    if lines.is_empty() {
        return Err(Error::InvalidInput {
            message: "cart is empty".to_string(),
        });
    }

    let mut problems = Vec::new();
    let mut resolved = Vec::new();
    let mut currencies = Vec::new();

    // validate every line and report the full set of failures in one response
    for line in lines {
        if line.quantity <= 0 {
            problems.push(LineProblem {
                listing_id: line.listing_id,
                reason: LineReason::InvalidQuantity,
            });
            continue;
        }

        let Some(listing) = Listing::find_by_id(line.listing_id).one(db).await? else {
            problems.push(LineProblem {
                listing_id: line.listing_id,
                reason: LineReason::NotFound,
            });
            continue;
        };

        if let Err(reason) =
            reservation::check_purchasable(&listing, &input.user_id, line.quantity, None, now)
        {
            problems.push(LineProblem {
                listing_id: line.listing_id,
                reason: LineReason::Unavailable(reason),
            });
            continue;
        }

        let Some(unit_minor) = resolve_unit_price(&listing) else {
            problems.push(LineProblem {
                listing_id: line.listing_id,
                reason: LineReason::NoPrice,
            });
            continue;
        };

        if !currencies.contains(&listing.currency) {
            currencies.push(listing.currency.clone());
        }
        resolved.push(SnapshotLine {
            listing_id: listing.id,
            title: listing.title,
            unit_minor,
            quantity: line.quantity,
        });
    }

    if !problems.is_empty() {
        return Err(Error::CartRejected { problems });
    }

    if currencies.len() > 1 {
        return Err(Error::InvalidInput {
            message: "cart mixes currencies".to_string(),
        });
    }
    let currency = currencies.remove(0);

    finalize_session(db, gateway, policy, input, None, currency, resolved, now).await
}

#[allow(clippy::too_many_arguments)]
async fn finalize_session<G>(
    db: &DatabaseConnection,
    gateway: &G,
    policy: &Policy,
    input: &CheckoutInput,
    offer_id: Option<i64>,
    currency: String,
    lines: Vec<SnapshotLine>,
    now: DateTime<Utc>,
) -> Result<CheckoutReady>
where
    G: PaymentGateway,
{
    let totals = Totals::compute(&lines, input.shipping_method, policy);

    let mut line_items: Vec<SessionLineItem> = lines
        .iter()
        .map(|line| SessionLineItem {
            name: line.title.clone(),
            unit_amount_minor: line.unit_minor,
            currency: currency.clone(),
            quantity: line.quantity,
        })
        .collect();
    if totals.service_fee_minor > 0 {
        line_items.push(SessionLineItem {
            name: "Service fee".to_string(),
            unit_amount_minor: totals.service_fee_minor,
            currency: currency.clone(),
            quantity: 1,
        });
    }
    if totals.shipping_minor > 0 {
        line_items.push(SessionLineItem {
            name: "Standard shipping".to_string(),
            unit_amount_minor: totals.shipping_minor,
            currency: currency.clone(),
            quantity: 1,
        });
    }

    let hosted = gateway
        .create_session(SessionRequest {
            line_items,
            success_url: policy.success_url.clone(),
            cancel_url: policy.cancel_url.clone(),
            client_reference: input.user_id.clone(),
        })
        .await?;

    let snapshot = CheckoutSnapshot {
        user_id: input.user_id.clone(),
        offer_id,
        currency,
        lines,
        shipping_method: input.shipping_method,
        shipping_address: input.shipping_address.clone(),
        totals,
        redirect_url: hosted.redirect_url.clone(),
    };

    let expires_at = now + Duration::minutes(policy.session_ttl_minutes);
    if let Err(err) = upsert_session(db, &hosted.session_id, &snapshot, expires_at, now).await {
        if let Error::Database(db_err) = &err {
            match crate::errors::db_error_hint(db_err) {
                Some(hint) => error!(%db_err, hint, "failed to persist checkout session"),
                None => error!(%db_err, "failed to persist checkout session"),
            }
        }
        return Err(err);
    }

    info!(
        session_id = %hosted.session_id,
        buyer = %input.user_id,
        total_minor = totals.total_minor,
        "checkout session created"
    );

    Ok(CheckoutReady {
        session_id: hosted.session_id,
        redirect_url: hosted.redirect_url,
        totals,
    })
}

/// Upserts the session snapshot keyed by the processor's session id.
///
/// The processor mints the id once; a retried local write for the same id
/// replaces the row instead of failing, which makes the persistence step safe
/// under transient-failure retries.
pub async fn upsert_session(
    db: &DatabaseConnection,
    session_id: &str,
    snapshot: &CheckoutSnapshot,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    let payload = serde_json::to_value(snapshot)?;

    let row = checkout_session::ActiveModel {
        session_id: Set(session_id.to_string()),
        user_id: Set(snapshot.user_id.clone()),
        offer_id: Set(snapshot.offer_id),
        payload: Set(payload),
        expires_at: Set(expires_at),
        consumed_at: Set(None),
        order_id: Set(None),
        created_at: Set(now),
    };

    CheckoutSession::insert(row)
        .on_conflict(
            OnConflict::column(checkout_session::Column::SessionId)
                .update_columns([
                    checkout_session::Column::UserId,
                    checkout_session::Column::OfferId,
                    checkout_session::Column::Payload,
                    checkout_session::Column::ExpiresAt,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    Ok(())
}

/// Finds the unconsumed, unexpired session already minted for an offer, if any.
async fn find_active_session_for_offer(
    db: &DatabaseConnection,
    offer_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<checkout_session::Model>> {
    CheckoutSession::find()
        .filter(checkout_session::Column::OfferId.eq(offer_id))
        .filter(checkout_session::Column::ConsumedAt.is_null())
        .filter(checkout_session::Column::ExpiresAt.gt(now))
        .one(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::offer::{OfferAction, create_offer, respond};
    use crate::errors::Unavailable;
    use crate::test_utils::{
        CannedGateway, FailingGateway, create_custom_listing, create_test_listing,
        setup_negotiation, setup_test_db, test_address, test_policy,
    };
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn cart_input(user_id: &str, lines: Vec<CartLine>) -> CheckoutInput {
        CheckoutInput {
            user_id: user_id.to_string(),
            request: CheckoutRequest::Cart { lines },
            shipping_method: ShippingMethod::Standard,
            shipping_address: Some(test_address()),
        }
    }

    fn offer_input(user_id: &str, offer_id: i64) -> CheckoutInput {
        CheckoutInput {
            user_id: user_id.to_string(),
            request: CheckoutRequest::Offer { offer_id },
            shipping_method: ShippingMethod::Standard,
            shipping_address: Some(test_address()),
        }
    }

    #[test]
    fn test_totals_determinism() {
        let policy = test_policy();
        let lines = vec![SnapshotLine {
            listing_id: 1,
            title: "Bike".to_string(),
            unit_minor: 10_000,
            quantity: 1,
        }];

        // £100.00 at 2.5% with standard shipping
        let totals = Totals::compute(&lines, ShippingMethod::Standard, &policy);
        assert_eq!(totals.items_subtotal_minor, 10_000);
        assert_eq!(totals.service_fee_minor, 250);
        assert_eq!(totals.shipping_minor, policy.standard_shipping_minor);
        assert_eq!(
            totals.total_minor,
            10_000 + 250 + policy.standard_shipping_minor
        );

        // same inputs, same totals
        let again = Totals::compute(&lines, ShippingMethod::Standard, &policy);
        assert_eq!(again, totals);
    }

    #[test]
    fn test_low_value_fee_floor() {
        let policy = test_policy();
        let lines = vec![SnapshotLine {
            listing_id: 1,
            title: "Mug".to_string(),
            unit_minor: 1_000,
            quantity: 1,
        }];

        // £10.00 at 2.5% is 25p, lifted to the 50p floor
        let totals = Totals::compute(&lines, ShippingMethod::Collection, &policy);
        assert_eq!(totals.service_fee_minor, 50);
        assert_eq!(totals.shipping_minor, 0);
        assert_eq!(totals.total_minor, 1_050);
    }

    #[test]
    fn test_price_resolution_prefers_minor_units() {
        let mut listing = listing_with_prices(Some(1_250), Some(99.0), Some("£999.00"));
        assert_eq!(resolve_unit_price(&listing), Some(1_250));

        // a zeroed minor-unit column falls through to the decimal
        listing.price_minor = Some(0);
        assert_eq!(resolve_unit_price(&listing), Some(9_900));
    }

    #[test]
    fn test_price_resolution_decimal_fallback() {
        let listing = listing_with_prices(None, Some(12.5), None);
        assert_eq!(resolve_unit_price(&listing), Some(1_250));
    }

    #[test]
    fn test_price_resolution_display_fallback() {
        let listing = listing_with_prices(None, None, Some("£12.50"));
        assert_eq!(resolve_unit_price(&listing), Some(1_250));

        let listing = listing_with_prices(None, None, Some("1,299.99"));
        assert_eq!(resolve_unit_price(&listing), Some(129_999));

        let listing = listing_with_prices(None, None, Some("about £12"));
        assert_eq!(resolve_unit_price(&listing), Some(1_200));
    }

    #[test]
    fn test_price_resolution_exhausted() {
        let listing = listing_with_prices(None, None, Some("call for price"));
        assert_eq!(resolve_unit_price(&listing), None);

        let listing = listing_with_prices(None, None, None);
        assert_eq!(resolve_unit_price(&listing), None);
    }

    fn listing_with_prices(
        minor: Option<i64>,
        decimal: Option<f64>,
        display: Option<&str>,
    ) -> listing::Model {
        listing::Model {
            id: 1,
            seller_id: "seller_1".to_string(),
            title: "Test Listing".to_string(),
            currency: "GBP".to_string(),
            status: "active".to_string(),
            quantity: 1,
            price_minor: minor,
            price: decimal,
            price_display: display.map(ToString::to_string),
            reserved_by: None,
            reserved_until: None,
            reserved_offer_id: None,
        }
    }

    #[tokio::test]
    async fn test_standard_shipping_requires_address() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let gateway = CannedGateway::new("cs_1");
        let policy = test_policy();

        let input = CheckoutInput {
            user_id: "buyer_1".to_string(),
            request: CheckoutRequest::Cart {
                lines: vec![CartLine {
                    listing_id: 1,
                    quantity: 1,
                }],
            },
            shipping_method: ShippingMethod::Standard,
            shipping_address: None,
        };

        let result = create_checkout_session(&db, &gateway, &policy, input).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidInput { message: _ }
        ));
        assert_eq!(gateway.calls(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        let gateway = CannedGateway::new("cs_1");
        let policy = test_policy();

        let result =
            create_checkout_session(&db, &gateway, &policy, cart_input("buyer_1", vec![])).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidInput { message: _ }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_cart_accumulates_all_problems() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = CannedGateway::new("cs_1");
        let policy = test_policy();

        let draft = create_custom_listing(&db, "seller_1", "Draft", "draft", 1, Some(1_000)).await?;
        let scarce =
            create_custom_listing(&db, "seller_1", "Scarce", "active", 1, Some(2_000)).await?;
        let unpriced =
            create_custom_listing(&db, "seller_1", "Unpriced", "active", 5, None).await?;

        let lines = vec![
            CartLine {
                listing_id: draft.id,
                quantity: 1,
            },
            CartLine {
                listing_id: scarce.id,
                quantity: 3,
            },
            CartLine {
                listing_id: unpriced.id,
                quantity: 1,
            },
            CartLine {
                listing_id: 999,
                quantity: 1,
            },
            CartLine {
                listing_id: scarce.id,
                quantity: 0,
            },
        ];

        let result =
            create_checkout_session(&db, &gateway, &policy, cart_input("buyer_1", lines)).await;

        // every failing line comes back in one response
        let Error::CartRejected { problems } = result.unwrap_err() else {
            panic!("expected CartRejected");
        };
        assert_eq!(problems.len(), 5);
        assert!(problems.contains(&LineProblem {
            listing_id: draft.id,
            reason: LineReason::Unavailable(Unavailable::Inactive),
        }));
        assert!(problems.contains(&LineProblem {
            listing_id: scarce.id,
            reason: LineReason::Unavailable(Unavailable::InsufficientStock {
                requested: 3,
                available: 1,
            }),
        }));
        assert!(problems.contains(&LineProblem {
            listing_id: unpriced.id,
            reason: LineReason::NoPrice,
        }));
        assert!(problems.contains(&LineProblem {
            listing_id: 999,
            reason: LineReason::NotFound,
        }));
        assert!(problems.contains(&LineProblem {
            listing_id: scarce.id,
            reason: LineReason::InvalidQuantity,
        }));

        assert_eq!(gateway.calls(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_cart_checkout_happy_path() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = CannedGateway::new("cs_cart");
        let policy = test_policy();

        let lamp = create_custom_listing(&db, "seller_1", "Lamp", "active", 2, Some(3_000)).await?;
        let desk = create_custom_listing(&db, "seller_2", "Desk", "active", 1, Some(12_000)).await?;

        let lines = vec![
            CartLine {
                listing_id: lamp.id,
                quantity: 2,
            },
            CartLine {
                listing_id: desk.id,
                quantity: 1,
            },
        ];

        let ready =
            create_checkout_session(&db, &gateway, &policy, cart_input("buyer_1", lines)).await?;

        assert_eq!(ready.session_id, "cs_cart");
        assert_eq!(ready.totals.items_subtotal_minor, 18_000);
        assert_eq!(ready.totals.service_fee_minor, 450);
        assert_eq!(ready.totals.shipping_minor, policy.standard_shipping_minor);

        // the snapshot round-trips with the same totals
        let row = CheckoutSession::find_by_id("cs_cart".to_string())
            .one(&db)
            .await?
            .unwrap();
        assert_eq!(row.user_id, "buyer_1");
        assert_eq!(row.offer_id, None);
        assert!(row.consumed_at.is_none());
        let snapshot: CheckoutSnapshot = serde_json::from_value(row.payload).unwrap();
        assert_eq!(snapshot.totals, ready.totals);
        assert_eq!(snapshot.lines.len(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_offer_checkout_full_scenario() -> Result<()> {
        // buyer offers £80 on a £100 listing, seller counters £90, buyer
        // accepts the counter, then checks out through the offer path
        let (db, listing, _conversation) = setup_negotiation().await?;
        let gateway = CannedGateway::new("cs_offer");
        let policy = test_policy();

        let original = create_offer(&db, &policy, listing.id, "buyer_1", 8_000, "GBP").await?;
        let countered = respond(
            &db,
            &policy,
            original.id,
            "seller_1",
            OfferAction::Counter,
            Some(9_000),
        )
        .await?;
        let counter = countered.counter_offer.unwrap();
        respond(&db, &policy, counter.id, "buyer_1", OfferAction::Accept, None).await?;

        // reservation now references the counter-offer
        let reserved = Listing::find_by_id(listing.id).one(&db).await?.unwrap();
        assert_eq!(reserved.reserved_by, Some("buyer_1".to_string()));
        assert_eq!(reserved.reserved_offer_id, Some(counter.id));

        let ready =
            create_checkout_session(&db, &gateway, &policy, offer_input("buyer_1", counter.id))
                .await?;

        // charged at the agreed £90, not the listed £100
        assert_eq!(ready.totals.items_subtotal_minor, 9_000);
        assert_eq!(ready.totals.service_fee_minor, 225);
        assert_eq!(ready.totals.shipping_minor, policy.standard_shipping_minor);
        assert_eq!(
            ready.totals.total_minor,
            9_000 + 225 + policy.standard_shipping_minor
        );

        let row = CheckoutSession::find_by_id("cs_offer".to_string())
            .one(&db)
            .await?
            .unwrap();
        assert_eq!(row.offer_id, Some(counter.id));

        Ok(())
    }

    #[tokio::test]
    async fn test_offer_checkout_requires_accepted_offer() -> Result<()> {
        let (db, listing, _conversation) = setup_negotiation().await?;
        let gateway = CannedGateway::new("cs_1");
        let policy = test_policy();

        let offer = create_offer(&db, &policy, listing.id, "buyer_1", 8_000, "GBP").await?;

        let result =
            create_checkout_session(&db, &gateway, &policy, offer_input("buyer_1", offer.id)).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidState { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_offer_checkout_wrong_user() -> Result<()> {
        let (db, listing, _conversation) = setup_negotiation().await?;
        let gateway = CannedGateway::new("cs_1");
        let policy = test_policy();

        let offer = create_offer(&db, &policy, listing.id, "buyer_1", 8_000, "GBP").await?;
        respond(&db, &policy, offer.id, "seller_1", OfferAction::Accept, None).await?;

        let as_seller =
            create_checkout_session(&db, &gateway, &policy, offer_input("seller_1", offer.id))
                .await;
        assert!(matches!(
            as_seller.unwrap_err(),
            Error::Unauthorized { message: _ }
        ));

        let as_stranger =
            create_checkout_session(&db, &gateway, &policy, offer_input("lurker_9", offer.id))
                .await;
        assert!(matches!(
            as_stranger.unwrap_err(),
            Error::Forbidden { user_id: _ }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_reserved_listing_blocks_other_buyer_cart() -> Result<()> {
        let (db, listing, _conversation) = setup_negotiation().await?;
        let gateway = CannedGateway::new("cs_1");
        let policy = test_policy();

        let offer = create_offer(&db, &policy, listing.id, "buyer_1", 8_000, "GBP").await?;
        respond(&db, &policy, offer.id, "seller_1", OfferAction::Accept, None).await?;

        let lines = vec![CartLine {
            listing_id: listing.id,
            quantity: 1,
        }];
        let result =
            create_checkout_session(&db, &gateway, &policy, cart_input("buyer_2", lines)).await;

        let Error::CartRejected { problems } = result.unwrap_err() else {
            panic!("expected CartRejected");
        };
        assert_eq!(
            problems,
            vec![LineProblem {
                listing_id: listing.id,
                reason: LineReason::Unavailable(Unavailable::Reserved),
            }]
        );

        // while the reservation holder sails through the offer path
        let ready =
            create_checkout_session(&db, &gateway, &policy, offer_input("buyer_1", offer.id))
                .await?;
        assert_eq!(ready.totals.items_subtotal_minor, 8_000);

        Ok(())
    }

    #[tokio::test]
    async fn test_double_submission_returns_existing_session() -> Result<()> {
        let (db, listing, _conversation) = setup_negotiation().await?;
        let gateway = CannedGateway::new("cs_once");
        let policy = test_policy();

        let offer = create_offer(&db, &policy, listing.id, "buyer_1", 8_000, "GBP").await?;
        respond(&db, &policy, offer.id, "seller_1", OfferAction::Accept, None).await?;

        let first =
            create_checkout_session(&db, &gateway, &policy, offer_input("buyer_1", offer.id))
                .await?;
        let second =
            create_checkout_session(&db, &gateway, &policy, offer_input("buyer_1", offer.id))
                .await?;

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.redirect_url, second.redirect_url);
        assert_eq!(first.totals, second.totals);
        // the processor was only asked once
        assert_eq!(gateway.calls(), 1);

        let sessions = CheckoutSession::find().all(&db).await?;
        assert_eq!(sessions.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_retry_safe() -> Result<()> {
        let db = setup_test_db().await?;
        let policy = test_policy();
        let now = Utc::now();

        let lines = vec![SnapshotLine {
            listing_id: 1,
            title: "Bike".to_string(),
            unit_minor: 10_000,
            quantity: 1,
        }];
        let snapshot = CheckoutSnapshot {
            user_id: "buyer_1".to_string(),
            offer_id: Some(7),
            currency: "GBP".to_string(),
            lines: lines.clone(),
            shipping_method: ShippingMethod::Collection,
            shipping_address: None,
            totals: Totals::compute(&lines, ShippingMethod::Collection, &policy),
            redirect_url: "https://pay.test/cs_retry".to_string(),
        };

        let expires_at = now + Duration::minutes(policy.session_ttl_minutes);
        upsert_session(&db, "cs_retry", &snapshot, expires_at, now).await?;
        upsert_session(&db, "cs_retry", &snapshot, expires_at, now).await?;

        let sessions = CheckoutSession::find().all(&db).await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "cs_retry");
        assert_eq!(sessions[0].offer_id, Some(7));

        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_reproducible_after_price_change() -> Result<()> {
        let (db, listing, _conversation) = setup_negotiation().await?;
        let gateway = CannedGateway::new("cs_snap");
        let policy = test_policy();

        let offer = create_offer(&db, &policy, listing.id, "buyer_1", 9_000, "GBP").await?;
        respond(&db, &policy, offer.id, "seller_1", OfferAction::Accept, None).await?;
        let ready =
            create_checkout_session(&db, &gateway, &policy, offer_input("buyer_1", offer.id))
                .await?;

        // the seller re-prices the listing after checkout
        let mut reprice: listing::ActiveModel =
            Listing::find_by_id(listing.id).one(&db).await?.unwrap().into();
        reprice.price_minor = Set(Some(99_999));
        reprice.update(&db).await?;

        // the stored snapshot alone still reproduces the recorded totals
        let row = CheckoutSession::find_by_id("cs_snap".to_string())
            .one(&db)
            .await?
            .unwrap();
        let snapshot: CheckoutSnapshot = serde_json::from_value(row.payload).unwrap();
        let recomputed = Totals::compute(&snapshot.lines, snapshot.shipping_method, &policy);
        assert_eq!(recomputed, snapshot.totals);
        assert_eq!(snapshot.totals, ready.totals);

        Ok(())
    }

    #[tokio::test]
    async fn test_gateway_failure_persists_nothing() -> Result<()> {
        let (db, listing, _conversation) = setup_negotiation().await?;
        let gateway = FailingGateway;
        let policy = test_policy();

        let offer = create_offer(&db, &policy, listing.id, "buyer_1", 8_000, "GBP").await?;
        respond(&db, &policy, offer.id, "seller_1", OfferAction::Accept, None).await?;

        let result =
            create_checkout_session(&db, &gateway, &policy, offer_input("buyer_1", offer.id)).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::Payment { message: _ }
        ));

        let sessions = CheckoutSession::find().all(&db).await?;
        assert!(sessions.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_collection_skips_shipping_cost() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = CannedGateway::new("cs_collect");
        let policy = test_policy();

        let lamp = create_test_listing(&db, "seller_1", 3_000).await?;

        let input = CheckoutInput {
            user_id: "buyer_1".to_string(),
            request: CheckoutRequest::Cart {
                lines: vec![CartLine {
                    listing_id: lamp.id,
                    quantity: 1,
                }],
            },
            shipping_method: ShippingMethod::Collection,
            shipping_address: None,
        };

        let ready = create_checkout_session(&db, &gateway, &policy, input).await?;
        assert_eq!(ready.totals.shipping_minor, 0);
        assert_eq!(ready.totals.total_minor, 3_000 + 75);

        Ok(())
    }
}
