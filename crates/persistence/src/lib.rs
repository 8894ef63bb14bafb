//! Persistence layer for the webhook delivery backend.
//!
//! This crate contains:
//! - Database connection management and migrations
//! - Entity definitions (database row mappings)
//! - Repository implementations
//! - `WebhookStore` implementations (PostgreSQL and in-memory)

pub mod db;
pub mod entities;
pub mod memory;
pub mod metrics;
pub mod repositories;
pub mod store;

pub use memory::InMemoryWebhookStore;
pub use store::PgWebhookStore;
