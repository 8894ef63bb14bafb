//! Background job scheduler and job implementations.

mod delivery_dispatch;
mod scheduler;
mod store_metrics;

pub use delivery_dispatch::DeliveryDispatchJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use store_metrics::StoreMetricsJob;
