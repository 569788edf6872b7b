//! Resource management

use crate::error::ForecastError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] limits the number of algorithm processes running at
/// the same time. Resource management is performed using a Tokio Semaphore.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for algorithm processes.
    processes: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    ///
    /// # Arguments
    ///
    /// * `process_limit`: Maximum number of concurrent algorithm processes, or `None` for no limit
    pub fn new(process_limit: Option<usize>) -> Self {
        Self {
            processes: process_limit.map(Semaphore::new),
        }
    }

    /// Acquire an algorithm process resource.
    pub async fn process(&self) -> Result<Option<SemaphorePermit>, ForecastError> {
        optional_acquire(&self.processes).await
    }
}

/// Acquire a permit on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
) -> Result<Option<SemaphorePermit>, ForecastError> {
    if let Some(sem) = sem {
        sem.acquire().await.map(Some).map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
