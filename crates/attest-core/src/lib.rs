//! Core types and trait definitions for the Attest fact ledger.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod confidence;
pub mod critique;
pub mod error;
pub mod event;
pub mod fact;
pub mod ledger;
pub mod policy;
pub mod projection;
pub mod status;

pub use confidence::{Confidence, Delta};
pub use error::{Error, Result};
