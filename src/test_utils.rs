//! Shared test utilities for `Haggle`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults, plus canned payment
//! gateways for exercising the checkout path without a processor.

use crate::{
    config::policy::Policy,
    core::checkout::ShippingAddress,
    entities::{conversation, listing},
    errors::{Error, Result},
    payments::{HostedSession, PaymentGateway, SessionRequest},
};
use sea_orm::{DatabaseConnection, Set, prelude::*};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Installs a test-writer tracing subscriber once, honoring `RUST_LOG`.
/// Logs stay quiet unless a test run opts in.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    init_test_tracing();
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// The default policy used throughout the tests.
#[must_use]
pub fn test_policy() -> Policy {
    Policy::default()
}

/// A complete delivery address for standard-shipping checkouts.
#[must_use]
pub fn test_address() -> ShippingAddress {
    ShippingAddress {
        line1: "1 Market Row".to_string(),
        line2: None,
        city: "London".to_string(),
        postcode: "E1 6AN".to_string(),
        country: "GB".to_string(),
    }
}

/// Creates an active test listing with sensible defaults.
///
/// # Defaults
/// * `title`: "Test Listing"
/// * `status`: "active"
/// * `quantity`: 1
/// * currency: GBP, priced via the minor-unit column
pub async fn create_test_listing(
    db: &DatabaseConnection,
    seller_id: &str,
    price_minor: i64,
) -> Result<listing::Model> {
    create_custom_listing(db, seller_id, "Test Listing", "active", 1, Some(price_minor)).await
}

/// Creates a test listing with custom parameters.
/// Use this when you need a draft, an unpriced row, or deeper stock.
pub async fn create_custom_listing(
    db: &DatabaseConnection,
    seller_id: &str,
    title: &str,
    status: &str,
    quantity: i32,
    price_minor: Option<i64>,
) -> Result<listing::Model> {
    listing::ActiveModel {
        seller_id: Set(seller_id.to_string()),
        title: Set(title.to_string()),
        currency: Set("GBP".to_string()),
        status: Set(status.to_string()),
        quantity: Set(quantity),
        price_minor: Set(price_minor),
        price: Set(None),
        price_display: Set(None),
        reserved_by: Set(None),
        reserved_until: Set(None),
        reserved_offer_id: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Creates a conversation binding a buyer to a listing's seller.
pub async fn create_test_conversation(
    db: &DatabaseConnection,
    listing: &listing::Model,
    buyer_user_id: &str,
) -> Result<conversation::Model> {
    conversation::ActiveModel {
        listing_id: Set(listing.id),
        buyer_user_id: Set(buyer_user_id.to_string()),
        seller_user_id: Set(listing.seller_id.clone()),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Sets up a complete negotiation environment: a £100.00 listing by
/// `seller_1` and a conversation with `buyer_1`.
/// Returns (db, listing, conversation) for common test scenarios.
pub async fn setup_negotiation() -> Result<(
    DatabaseConnection,
    listing::Model,
    conversation::Model,
)> {
    let db = setup_test_db().await?;
    let listing = create_test_listing(&db, "seller_1", 10_000).await?;
    let conversation = create_test_conversation(&db, &listing, "buyer_1").await?;
    Ok((db, listing, conversation))
}

/// A gateway that always mints the same session and counts how often it is
/// asked, so tests can assert the processor was not called twice.
pub struct CannedGateway {
    session_id: String,
    redirect_url: String,
    calls: AtomicUsize,
}

impl CannedGateway {
    /// Creates a gateway minting `session_id` with a matching redirect URL.
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            redirect_url: format!("https://pay.test/{session_id}"),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many sessions this gateway has been asked to create.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PaymentGateway for CannedGateway {
    async fn create_session(&self, _request: SessionRequest) -> Result<HostedSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HostedSession {
            session_id: self.session_id.clone(),
            redirect_url: self.redirect_url.clone(),
        })
    }
}

/// A gateway that is always down.
pub struct FailingGateway;

impl PaymentGateway for FailingGateway {
    async fn create_session(&self, _request: SessionRequest) -> Result<HostedSession> {
        Err(Error::Payment {
            message: "gateway unavailable".to_string(),
        })
    }
}
