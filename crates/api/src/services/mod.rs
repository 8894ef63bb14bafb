//! Delivery pipeline services.

pub mod dispatcher;
pub mod endpoint_registry;
pub mod transport;

pub use dispatcher::{DispatchError, DispatchSummary, Dispatcher, DispatcherSettings};
pub use endpoint_registry::{EndpointRegistry, RegistryError};
pub use transport::{HttpTransport, OutboundRequest, TransportFailure, TransportOutcome, WebhookTransport};
