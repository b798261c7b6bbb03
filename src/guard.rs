//! Scope-bound handle to a rented element

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread;

use tracing::warn;

use crate::errors::{PoolError, PoolResult};
use crate::wrapper::ElementWrapper;

/// Receiver of released elements; implemented by every pool strategy
pub(crate) trait ElementSource<T>: Send + Sync {
    fn release_element(&self, wrapper: Box<ElementWrapper<T>>);
}

/// A rented element that automatically returns to its pool when dropped
///
/// The guard is the only owner of the element while it exists. Release happens exactly
/// once: either through [`release`](Self::release) or when the guard goes out of scope.
/// After release, [`element`](Self::element) fails and dereferencing panics.
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{RentalPool, StaticObjectPool};
///
/// let pool = StaticObjectPool::with_elements("buffers", vec![String::new()]);
/// {
///     let mut buffer = pool.rent().unwrap();
///     buffer.push_str("hello");
/// }
/// assert_eq!(pool.free_element_count(), 1);
/// ```
pub struct RentGuard<T: Send + 'static> {
    wrapper: Option<Box<ElementWrapper<T>>>,
    source: Arc<dyn ElementSource<T>>,
    pool_name: Arc<str>,
}

impl<T: Send + 'static> RentGuard<T> {
    pub(crate) fn new(wrapper: Box<ElementWrapper<T>>, source: Arc<dyn ElementSource<T>>) -> Self {
        let pool_name = Arc::clone(wrapper.pool_name());
        Self {
            wrapper: Some(wrapper),
            source,
            pool_name,
        }
    }

    /// The rented element, or [`PoolError::ElementReleased`] after release
    pub fn element(&self) -> PoolResult<&T> {
        match &self.wrapper {
            Some(wrapper) => Ok(wrapper.element()),
            None => Err(self.released_error()),
        }
    }

    /// Mutable access to the rented element
    pub fn element_mut(&mut self) -> PoolResult<&mut T> {
        match &mut self.wrapper {
            Some(wrapper) => Ok(wrapper.element_mut()),
            None => Err(PoolError::ElementReleased {
                pool: self.pool_name.to_string(),
            }),
        }
    }

    /// Whether the guard still holds a usable element
    pub fn is_valid(&self) -> bool {
        self.wrapper
            .as_ref()
            .is_some_and(|wrapper| !wrapper.is_marked_invalid())
    }

    /// Mark the element as broken; the pool destroys it on release instead of reusing it
    pub fn invalidate(&mut self) {
        if let Some(wrapper) = &mut self.wrapper {
            wrapper.set_validity(false);
        }
    }

    /// Return the element to its pool now. Calling it again does nothing.
    pub fn release(&mut self) {
        if let Some(wrapper) = self.wrapper.take() {
            self.source.release_element(wrapper);
        }
    }

    /// Name of the pool the element was rented from
    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Detach the wrapper for removal by the pool identified by `pool_id`.
    pub(crate) fn take_for_removal(&mut self, pool_id: u64) -> PoolResult<Box<ElementWrapper<T>>> {
        let owner = match &self.wrapper {
            Some(wrapper) => wrapper.pool_id(),
            None => {
                return Err(PoolError::InvalidOperation(format!(
                    "element of pool '{}' was already released or removed",
                    self.pool_name
                )));
            }
        };

        if owner != pool_id {
            return Err(PoolError::InvalidOperation(format!(
                "element was rented from pool '{}', not from this pool",
                self.pool_name
            )));
        }

        self.wrapper.take().ok_or_else(|| self.released_error())
    }

    fn released_error(&self) -> PoolError {
        PoolError::ElementReleased {
            pool: self.pool_name.to_string(),
        }
    }
}

impl<T: Send + 'static> Deref for RentGuard<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the element was already released.
    fn deref(&self) -> &Self::Target {
        self.wrapper
            .as_ref()
            .expect("Rented element already released")
            .element()
    }
}

impl<T: Send + 'static> DerefMut for RentGuard<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.wrapper
            .as_mut()
            .expect("Rented element already released")
            .element_mut()
    }
}

impl<T: Send + 'static> Drop for RentGuard<T> {
    fn drop(&mut self) {
        if let Some(wrapper) = &self.wrapper {
            if cfg!(debug_assertions) && thread::panicking() {
                match wrapper.rent_site() {
                    Some(site) => warn!(pool = %self.pool_name, rented_at = %site, "rented element dropped during panic"),
                    None => warn!(pool = %self.pool_name, "rented element dropped during panic"),
                }
            }
        }
        self.release();
    }
}

impl<T: Send + fmt::Debug + 'static> fmt::Debug for RentGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RentGuard");
        debug.field("pool", &self.pool_name);
        match &self.wrapper {
            Some(wrapper) => {
                debug.field("element", wrapper.element());
                if let Some(site) = wrapper.rent_site() {
                    debug.field("rented_at", &site.location);
                }
            }
            None => {
                debug.field("element", &"<released>");
            }
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSource {
        returned: Mutex<Vec<i32>>,
    }

    impl ElementSource<i32> for CollectingSource {
        fn release_element(&self, wrapper: Box<ElementWrapper<i32>>) {
            self.returned.lock().push(*wrapper.element());
        }
    }

    fn guard(value: i32, source: &Arc<CollectingSource>) -> RentGuard<i32> {
        let mut wrapper = ElementWrapper::new(value, 3, Arc::from("unit"));
        wrapper.mark_busy();
        RentGuard::new(wrapper, source.clone())
    }

    #[test]
    fn test_drop_releases_once() {
        let source = Arc::new(CollectingSource::default());
        {
            let guard = guard(5, &source);
            assert_eq!(*guard, 5);
        }
        assert_eq!(*source.returned.lock(), vec![5]);
    }

    #[test]
    fn test_explicit_release_is_idempotent() {
        let source = Arc::new(CollectingSource::default());
        let mut guard = guard(8, &source);
        guard.release();
        guard.release();
        drop(guard);
        assert_eq!(*source.returned.lock(), vec![8]);
    }

    #[test]
    fn test_access_after_release_fails() {
        let source = Arc::new(CollectingSource::default());
        let mut guard = guard(1, &source);
        guard.release();
        assert!(!guard.is_valid());
        assert!(matches!(guard.element(), Err(PoolError::ElementReleased { .. })));
        assert!(guard.element_mut().is_err());
    }

    #[test]
    #[should_panic(expected = "already released")]
    fn test_deref_after_release_panics() {
        let source = Arc::new(CollectingSource::default());
        let mut guard = guard(1, &source);
        guard.release();
        let _value: i32 = *guard;
    }

    #[test]
    fn test_invalidate() {
        let source = Arc::new(CollectingSource::default());
        let mut guard = guard(1, &source);
        assert!(guard.is_valid());
        guard.invalidate();
        assert!(!guard.is_valid());
        assert_eq!(guard.pool_name(), "unit");
    }

    #[test]
    fn test_removal_checks_owner() {
        let source = Arc::new(CollectingSource::default());
        let mut guard = guard(1, &source);
        assert!(matches!(
            guard.take_for_removal(99),
            Err(PoolError::InvalidOperation(_))
        ));
        assert!(guard.take_for_removal(3).is_ok());
        assert!(matches!(
            guard.take_for_removal(3),
            Err(PoolError::InvalidOperation(_))
        ));
        drop(guard);
        assert!(source.returned.lock().is_empty());
    }
}
