//! Per-provider concurrency ceiling.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use cr_types::ProviderError;

use crate::invoker::InvokerResult;

/// Bounds concurrent in-flight calls per upstream provider, independent of
/// job-level concurrency caps, so a burst of jobs cannot overwhelm a single
/// endpoint.
#[derive(Debug)]
pub struct ProviderGate {
    ceiling: usize,
    permits: DashMap<String, Arc<Semaphore>>,
}

impl ProviderGate {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
            permits: DashMap::new(),
        }
    }

    /// Wait for a slot against `provider`. The permit releases the slot on
    /// drop, once the provider call has finished.
    pub async fn acquire(&self, provider: &str) -> InvokerResult<OwnedSemaphorePermit> {
        let semaphore = self
            .permits
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.ceiling)))
            .clone();

        semaphore
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::Unavailable {
                message: format!("concurrency gate closed for provider {provider}"),
            })
    }

    /// Slots currently available for `provider` (full ceiling when the
    /// provider has not been seen yet).
    pub fn available(&self, provider: &str) -> usize {
        self.permits
            .get(provider)
            .map(|s| s.available_permits())
            .unwrap_or(self.ceiling)
    }
}
