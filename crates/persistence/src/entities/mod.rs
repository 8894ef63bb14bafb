//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod webhook_attempt;
pub mod webhook_delivery;
pub mod webhook_endpoint;

pub use webhook_attempt::WebhookAttemptEntity;
pub use webhook_delivery::WebhookDeliveryEntity;
pub use webhook_endpoint::WebhookEndpointEntity;
