//! Database configuration module.
//!
//! This module handles database connection and table creation using `SeaORM`.
//! It provides functions for establishing database connections and creating all necessary
//! tables based on the entity definitions. The module uses `SeaORM`'s
//! `Schema::create_table_from_entity` method to automatically generate SQL statements from
//! the entity models, ensuring that the database schema matches the Rust struct definitions
//! without requiring manual SQL.

use crate::entities::{CheckoutSession, Conversation, ConversationEvent, Listing, Offer};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a default local `SQLite` file if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/haggle.sqlite".to_string())
}

/// Establishes a connection to the database using the `DATABASE_URL` environment variable.
///
/// Falls back to a default local `SQLite` file if no environment variable is set.
/// This function handles connection errors and provides a clean interface for database
/// access throughout the engine.
pub async fn create_connection() -> Result<DatabaseConnection> {
    Database::connect(&get_database_url()).await.map_err(Into::into)
}

/// Creates all necessary database tables using `SeaORM`'s schema generation from entity definitions.
///
/// This function uses the `DeriveEntityModel` macros to automatically generate proper SQL
/// statements for table creation, ensuring the database schema matches the Rust struct
/// definitions. It creates tables for listings, conversations, conversation events, offers,
/// and checkout sessions.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let listing_table = schema.create_table_from_entity(Listing);
    let conversation_table = schema.create_table_from_entity(Conversation);
    let event_table = schema.create_table_from_entity(ConversationEvent);
    let offer_table = schema.create_table_from_entity(Offer);
    let session_table = schema.create_table_from_entity(CheckoutSession);

    db.execute(builder.build(&listing_table)).await?;
    db.execute(builder.build(&conversation_table)).await?;
    db.execute(builder.build(&event_table)).await?;
    db.execute(builder.build(&offer_table)).await?;
    db.execute(builder.build(&session_table)).await?;

    Ok(())
}
