//! RAII checkout for pooled handles.

use std::ops::Deref;
use std::sync::Arc;

use crate::factory::ResourceFactory;
use crate::pool::Pool;

/// RAII guard over an acquired handle.
///
/// Returned by [`Pool::checkout`]. When the guard is dropped the handle is
/// released back to its pool; [`detach`](Self::detach) takes the handle out
/// instead, leaving the caller responsible for `release` or `destroy`.
/// Dropping a guard must happen inside the pool's Tokio runtime.
pub struct PoolGuard<F: ResourceFactory> {
    pool: Pool<F>,
    handle: Option<Arc<F::Handle>>,
}

impl<F: ResourceFactory> PoolGuard<F> {
    pub(crate) fn new(pool: Pool<F>, handle: Arc<F::Handle>) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    /// Take the handle out of the guard, skipping the release on drop.
    #[must_use]
    pub fn detach(mut self) -> Arc<F::Handle> {
        self.handle.take().expect("guard used after detach")
    }
}

impl<F: ResourceFactory> Deref for PoolGuard<F> {
    type Target = F::Handle;

    fn deref(&self) -> &F::Handle {
        self.handle.as_ref().expect("guard used after detach")
    }
}

impl<F: ResourceFactory> Drop for PoolGuard<F> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for PoolGuard<F>
where
    F::Handle: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("handle", &self.handle)
            .finish()
    }
}
