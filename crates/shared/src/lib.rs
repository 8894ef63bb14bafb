//! Shared utilities and common types for the webhook delivery backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Hashing, secret generation and idempotency keys
//! - HMAC payload signing and verification
//! - Cursor pagination
//! - Common validation logic

pub mod crypto;
pub mod pagination;
pub mod signing;
pub mod validation;
