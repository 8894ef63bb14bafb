//! Scheduler tick for due webhook deliveries.
//!
//! Each run releases expired leases, then claims and attempts one batch of
//! pending deliveries whose retry time has come.

use tracing::info;

use crate::services::Dispatcher;

use super::scheduler::{Job, JobFrequency};

pub struct DeliveryDispatchJob {
    dispatcher: Dispatcher,
    interval_secs: u64,
}

impl DeliveryDispatchJob {
    pub fn new(dispatcher: Dispatcher, interval_secs: u64) -> Self {
        Self {
            dispatcher,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for DeliveryDispatchJob {
    fn name(&self) -> &'static str {
        "webhook_dispatch"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let summary = self
            .dispatcher
            .dispatch_due()
            .await
            .map_err(|e| format!("Failed to dispatch due deliveries: {}", e))?;

        if summary.claimed > 0 || summary.released > 0 {
            info!(
                claimed = summary.claimed,
                released = summary.released,
                succeeded = summary.succeeded,
                retrying = summary.retrying,
                dead_lettered = summary.dead_lettered,
                cancelled = summary.cancelled,
                deferred = summary.deferred,
                errors = summary.errors,
                "Dispatched due webhook deliveries"
            );
        }

        if summary.errors > 0 {
            return Err(format!("{} deliveries could not be recorded", summary.errors));
        }
        Ok(())
    }
}
