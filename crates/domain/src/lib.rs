//! Domain layer for the webhook delivery backend.
//!
//! This crate contains:
//! - Domain models (Endpoint, Delivery, Attempt, DomainEvent)
//! - The delivery state machine (classification, backoff, transitions)
//! - The storage contract the dispatcher persists through

pub mod models;
pub mod services;
