//! Domain models for the webhook delivery pipeline.

pub mod attempt;
pub mod delivery;
pub mod endpoint;
pub mod event;

pub use attempt::{
    Attempt, AttemptErrorType, AttemptResponse, ListAttemptsResponse, NewAttempt, TestSendResponse,
};
pub use delivery::{
    Delivery, DeliveryFilter, DeliveryResponse, DeliveryStatus, Lease, ListDeliveriesQuery,
    ListDeliveriesResponse, NewDelivery,
};
pub use endpoint::{
    CreateEndpointRequest, CreatedEndpointResponse, Endpoint, EndpointChanges, EndpointPolicy,
    EndpointResponse, ListEndpointsQuery, ListEndpointsResponse, NewEndpoint,
    RotatedSecretResponse, UpdateEndpointRequest,
};
pub use event::{DomainEvent, EmitEventRequest, EmitEventResponse, EnqueuedDelivery};
