//! Scribe - Transparent streaming capture proxy for LLM message APIs
//!
//! This crate provides a daemon that forwards message-API requests to an
//! upstream provider byte-for-byte while asynchronously recording each
//! conversation (request, response, token usage, timing) for later
//! search and analytics.

pub mod capture;
pub mod config;
pub mod error;
pub mod proxy;
pub mod queue;
pub mod store;

pub use error::ScribeError;
