//! Core types for Zalo Shop.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod price;
pub mod status;
pub mod user_id;

pub use id::*;
pub use price::Money;
pub use status::*;
pub use user_id::{UserId, UserIdError};
