//! Webhook delivery service: configuration, the endpoint registry, the
//! dispatcher and its scheduler, and the HTTP surface.

pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;
