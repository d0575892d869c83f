//! Cartwheel Core - Shared domain types.
//!
//! This crate provides the types shared by the Cartwheel components:
//! - `client` - Session manager and cart synchronizer
//! - `cli` - Command-line front end driving the client services
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no storage.
//! Everything here serializes to the persisted local-state format, so changes
//! to field names are breaking changes for stored carts and user snapshots.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, emails, prices, product snapshots and user profiles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
