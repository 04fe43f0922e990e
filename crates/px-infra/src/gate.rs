use std::future::Future;

use tokio::sync::Mutex;
use tracing::debug;

use crate::Configuration;

/// Category of state-changing operation for gating purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Clone,
    Resize,
    Unrestricted,
}

/// Client-wide exclusion for clone and resize submissions.
///
/// Each class that the configuration does not mark as parallel gets its own
/// lock. The two locks are independent: a clone in flight never holds up a
/// resize.
#[derive(Debug, Default)]
pub struct OperationGates {
    parallel_clone: bool,
    parallel_resize: bool,
    clone: Mutex<()>,
    resize: Mutex<()>,
}

impl OperationGates {
    pub fn new(parallel_clone: bool, parallel_resize: bool) -> Self {
        Self {
            parallel_clone,
            parallel_resize,
            clone: Mutex::new(()),
            resize: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(config.parallel_clone, config.parallel_resize)
    }

    pub fn is_serialized(&self, class: OperationClass) -> bool {
        self.lock_for(class).is_some()
    }

    fn lock_for(&self, class: OperationClass) -> Option<&Mutex<()>> {
        match class {
            OperationClass::Clone if !self.parallel_clone => Some(&self.clone),
            OperationClass::Resize if !self.parallel_resize => Some(&self.resize),
            _ => None,
        }
    }

    /// Run `fut` under the lock for `class`, if that class is serialized.
    ///
    /// The guard is dropped when `fut` completes, fails, panics or is
    /// cancelled.
    pub async fn run<F: Future>(&self, class: OperationClass, fut: F) -> F::Output {
        match self.lock_for(class) {
            Some(lock) => {
                let _guard = lock.lock().await;
                debug!(?class, "operation gate acquired");
                fut.await
            }
            None => fut.await,
        }
    }
}
