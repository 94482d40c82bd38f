//! Database operations against the hosted `PostgreSQL` database.
//!
//! The schema is owned by the hosted backend and consumed here as an
//! external contract.
//!
//! ## Tables
//!
//! - `users` - Customer profiles keyed by host account id
//! - `orders` - Orders with totals, shipping details and payment state
//! - `order_items` - Denormalized product snapshots per order
//! - `order_status_history` - Append-only status audit log
//!
//! Queries are built at runtime (`sqlx::query_as` with `FromRow` rows)
//! because the schema lives outside this repository.

pub mod orders;
pub mod users;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use orders::OrderRepository;
pub use users::UserRepository;

/// `PostgreSQL` SQLSTATE for a call to a function that does not exist.
const UNDEFINED_FUNCTION: &str = "42883";

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation or concurrent modification.
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The database does not offer the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl RepositoryError {
    /// Map a sqlx error, recognising unique violations and missing functions.
    pub(crate) fn from_sqlx(e: sqlx::Error, conflict: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return Self::Conflict(conflict.to_owned());
            }
            if db_err.code().as_deref() == Some(UNDEFINED_FUNCTION) {
                return Self::Unsupported(db_err.message().to_owned());
            }
        }
        Self::Database(e)
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Convert a stored quantity to its domain type.
fn quantity_from_db(value: i32) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative quantity in database: {value}")))
}

/// Convert a domain quantity for storage.
fn quantity_to_db(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::Conflict(format!("quantity {value} exceeds column range")))
}
