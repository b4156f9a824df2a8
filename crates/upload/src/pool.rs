//! Bounded worker pools for part uploads, one per write priority.

use std::sync::Arc;

use blobferry_transfer::WritePriority;
use tokio::sync::Semaphore;

use crate::config::TransferSettings;

/// Two independent permit pools so high priority parts never queue behind
/// bulk transfers.
#[derive(Debug, Clone)]
pub struct WorkerPools {
    normal: Arc<Semaphore>,
    priority: Arc<Semaphore>,
}

impl WorkerPools {
    pub fn new(normal_size: usize, priority_size: usize) -> Self {
        Self {
            normal: Arc::new(Semaphore::new(normal_size.max(1))),
            priority: Arc::new(Semaphore::new(priority_size.max(1))),
        }
    }

    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self::new(settings.normal_pool_size, settings.priority_pool_size)
    }

    /// Pool that runs parts of an upload with the given priority.
    pub fn pool_for(&self, priority: WritePriority) -> &Arc<Semaphore> {
        match priority {
            WritePriority::Normal => &self.normal,
            WritePriority::High => &self.priority,
        }
    }

    /// Idle workers in the pool for `priority`.
    pub fn available(&self, priority: WritePriority) -> usize {
        self.pool_for(priority).available_permits()
    }
}
