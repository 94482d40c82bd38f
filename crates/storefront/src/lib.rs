//! Zalo Shop Storefront library.
//!
//! The mini-app's client-side core: profile reconciliation against the host
//! identity provider, local session state, the cart and the order pipeline
//! backed by the hosted database. Screens drive it through [`state::AppState`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod models;
pub mod services;
pub mod state;
pub mod telemetry;
