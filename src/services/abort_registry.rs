use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Pending abort requests keyed by deployment id.
///
/// Written once by an abort request, consumed by the step runner with
/// [`AbortRegistry::take`].
#[derive(Clone, Default)]
pub struct AbortRegistry {
    requested: Arc<Mutex<HashSet<String>>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn request(&self, deployment_id: &str) {
        self.lock().insert(deployment_id.to_string());
    }

    pub fn is_requested(&self, deployment_id: &str) -> bool {
        self.lock().contains(deployment_id)
    }

    /// Reads and clears the flag in one step.
    pub fn take(&self, deployment_id: &str) -> bool {
        self.lock().remove(deployment_id)
    }
}
