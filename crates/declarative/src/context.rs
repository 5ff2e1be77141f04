//! Provider and callback traits
//!
//! These traits allow the declarative crate to be used without depending
//! on a specific cloud API, terminal UI or signal handling.

use crate::error::ProviderError;
use crate::planner::PlannedAction;
use crate::types::{ActionStatus, Values};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Result of a successful create
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Identifier assigned by the provider
    pub provider_id: String,
    /// Provider-reported outputs
    pub outputs: Values,
}

/// Opaque capability that turns actions into real infrastructure
///
/// Calls may run concurrently on worker threads. Attribute values arrive
/// with every reference already resolved.
pub trait Provider: Send + Sync {
    /// Create an instance
    fn create(&self, resource_type: &str, attributes: &Values) -> Result<Created, ProviderError>;

    /// Update an instance in place with only the changed attributes.
    /// Removed attributes are passed as null.
    ///
    /// # Returns
    /// Outputs that changed (merged over the recorded outputs)
    fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        changed: &Values,
    ) -> Result<Values, ProviderError>;

    /// Destroy an instance
    fn destroy(&self, resource_type: &str, provider_id: &str) -> Result<(), ProviderError>;
}

impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn create(&self, resource_type: &str, attributes: &Values) -> Result<Created, ProviderError> {
        (**self).create(resource_type, attributes)
    }

    fn update(
        &self,
        resource_type: &str,
        provider_id: &str,
        changed: &Values,
    ) -> Result<Values, ProviderError> {
        (**self).update(resource_type, provider_id, changed)
    }

    fn destroy(&self, resource_type: &str, provider_id: &str) -> Result<(), ProviderError> {
        (**self).destroy(resource_type, provider_id)
    }
}

/// Progress callback for apply
///
/// Called from the coordinator thread only, in dispatch and completion
/// order.
pub trait ProgressCallback: Send {
    /// Called before an action is handed to a worker
    fn on_action_start(&mut self, action: &PlannedAction);

    /// Called once an action has a final status
    fn on_action_complete(&mut self, action: &PlannedAction, status: &ActionStatus);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_action_start(&mut self, _action: &PlannedAction) {}
    fn on_action_complete(&mut self, _action: &PlannedAction, _status: &ActionStatus) {}
}

/// Shared cancellation flag
///
/// Clones observe the same flag. Once cancelled, nothing new is dispatched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
