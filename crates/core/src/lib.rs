//! Zalo Shop Core - Shared types library.
//!
//! This crate provides common types used across all Zalo Shop components:
//! - `storefront` - Profile reconciliation, cart and order pipeline of the mini-app
//! - `integration-tests` - End-to-end flows against in-memory collaborators
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, host user IDs, money, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
