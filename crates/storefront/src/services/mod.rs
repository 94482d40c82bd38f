//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `identity` - Normalised access to the host identity provider
//! - `verify` - Optional backend verification of the host login token
//! - `profile` - Remote profile store and the reconciliation engine
//! - `session` - Local login state, persistence and the event bus
//! - `cart` - Local cart with option normalisation and selection
//! - `orders` - Order submission, queries and status changes

pub mod cart;
pub mod identity;
pub mod orders;
pub mod profile;
pub mod session;
pub mod verify;
