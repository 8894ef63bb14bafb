//! Domain services for the webhook delivery pipeline.
//!
//! Services contain business logic that operates on domain models.

pub mod delivery_policy;
pub mod store;

pub use delivery_policy::{
    classify, is_terminal_status, plan_transition, RetryPolicy, Transition, Verdict,
};
pub use store::{manual_retry_conflict, AttemptRecord, StoreError, WebhookStore};
