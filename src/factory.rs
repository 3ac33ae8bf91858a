//! The factory contract, the pool's only external collaborator.
//!
//! A [`ResourceFactory`] knows how to create, destroy and validate handles.
//! The pool never inspects handle contents; it wraps every created handle in
//! an [`Arc`] and tracks identity by pointer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FactoryError;

/// Which validation path the dispenser uses for a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// `validate` is consulted inline while dispensing.
    Sync,
    /// `validate_async` is driven through the under-validation set.
    Async,
}

/// Factory for pooled resources.
///
/// `create` may fail; the failure is delivered to the waiter the creation
/// was assigned to. `destroy` is best-effort teardown and cannot fail.
/// Exactly one of the two validation paths is consulted, selected by
/// [`validation_mode`](Self::validation_mode); the defaults accept every
/// handle. Validation must not mutate the handle observably.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The handle type produced by this factory.
    type Handle: Send + Sync + 'static;

    /// Produce a new handle.
    async fn create(&self) -> Result<Self::Handle, FactoryError>;

    /// Tear down a handle that is leaving the pool.
    async fn destroy(&self, handle: Arc<Self::Handle>) {
        drop(handle);
    }

    /// Select which validation path the pool uses.
    fn validation_mode(&self) -> ValidationMode {
        ValidationMode::Sync
    }

    /// Synchronous validity check, consulted when the mode is [`ValidationMode::Sync`].
    fn validate(&self, _handle: &Self::Handle) -> bool {
        true
    }

    /// Asynchronous validity check, consulted when the mode is [`ValidationMode::Async`].
    async fn validate_async(&self, _handle: &Self::Handle) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnitFactory;

    #[async_trait]
    impl ResourceFactory for UnitFactory {
        type Handle = u32;

        async fn create(&self) -> Result<u32, FactoryError> {
            Ok(7)
        }
    }

    #[tokio::test]
    async fn defaults_accept_everything() {
        let factory = UnitFactory;
        assert_eq!(factory.validation_mode(), ValidationMode::Sync);
        let handle = factory.create().await.unwrap();
        assert!(factory.validate(&handle));
        assert!(factory.validate_async(&handle).await);
        factory.destroy(Arc::new(handle)).await;
    }
}
