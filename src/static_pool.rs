//! Manually filled pools
//!
//! A static pool never creates or destroys elements on its own: the owner adds them with
//! [`StaticObjectPool::add_element`] and takes them out of circulation with
//! [`StaticObjectPool::remove_element`]. The balancing flavour hands out the best free
//! element according to a comparer instead of the one that has been free the longest.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::cancellation::CancellationToken;
use crate::config::PoolConfiguration;
use crate::container::{ElementComparer, ElementsContainer};
use crate::deadline::Deadline;
use crate::errors::PoolResult;
use crate::guard::{ElementSource, RentGuard};
use crate::metrics::{PoolEvent, PoolMetrics};
use crate::pool::{PoolCore, RentStrategy, RentalPool, rent_from};
use crate::wrapper::ElementWrapper;

struct StaticInner<T: Send + 'static> {
    core: PoolCore,
    container: ElementsContainer<T>,
}

impl<T: Send + 'static> StaticInner<T> {
    fn destroy(&self, wrapper: Box<ElementWrapper<T>>, reason: &'static str) {
        let element = self.container.destroy(wrapper);
        drop(element);
        self.core.record(PoolEvent::Destroyed);
        debug!(pool = %self.core.name(), reason, "element destroyed");
    }

    /// Destroy one free element if disposal started while it was being returned.
    fn collect_after_dispose(&self) {
        if self.core.is_disposed() {
            if let Some(wrapper) = self
                .container
                .take(Some(Duration::ZERO), CancellationToken::never())
            {
                self.destroy(wrapper, "pool disposed");
            }
        }
    }
}

impl<T: Send + 'static> ElementSource<T> for StaticInner<T> {
    fn release_element(&self, wrapper: Box<ElementWrapper<T>>) {
        if self.core.is_disposed() {
            self.destroy(wrapper, "pool disposed");
            return;
        }
        if wrapper.is_marked_invalid() {
            self.destroy(wrapper, "invalidated by renter");
            return;
        }

        self.container.release(wrapper);
        self.core.record(PoolEvent::Released);
        trace!(pool = %self.core.name(), "element released");

        self.collect_after_dispose();
    }
}

impl<T: Send + 'static> RentStrategy<T> for StaticInner<T> {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    fn rent_element(
        &self,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Option<Box<ElementWrapper<T>>> {
        self.container.take(deadline.remaining(), cancel)
    }
}

/// Thread-safe pool over a manually managed set of elements
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{RentalPool, StaticObjectPool};
///
/// let pool = StaticObjectPool::new("workers");
/// pool.add_element("first").unwrap();
/// pool.add_element("second").unwrap();
///
/// {
///     let worker = pool.rent().unwrap();
///     assert_eq!(*worker, "first");
///     assert_eq!(pool.free_element_count(), 1);
/// }
///
/// assert_eq!(pool.free_element_count(), 2);
/// pool.dispose(true);
/// assert_eq!(pool.element_count(), 0);
/// ```
pub struct StaticObjectPool<T: Send + 'static> {
    inner: Arc<StaticInner<T>>,
}

impl<T: Send + 'static> Clone for StaticObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> StaticObjectPool<T> {
    /// Create an empty pool
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_configuration(PoolConfiguration::new().with_name(name))
    }

    /// Create an empty pool from a configuration; only the name and observer are used
    pub fn with_configuration(config: PoolConfiguration) -> Self {
        Self::build(config, None)
    }

    /// Create a pool that already holds `elements`
    pub fn with_elements(name: impl Into<String>, elements: impl IntoIterator<Item = T>) -> Self {
        let pool = Self::new(name);
        for element in elements {
            pool.push_element(element);
        }
        pool
    }

    /// Create an empty balancing pool that always rents the best free element
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_rentalpool::{PoolConfiguration, RentalPool, StaticObjectPool};
    ///
    /// // Prefer the shortest queue
    /// let pool: StaticObjectPool<Vec<u32>> = StaticObjectPool::balancing(
    ///     PoolConfiguration::new().with_name("queues"),
    ///     |a: &Vec<u32>, b: &Vec<u32>| b.len().cmp(&a.len()),
    /// );
    /// pool.add_element(vec![1, 2, 3]).unwrap();
    /// pool.add_element(vec![1]).unwrap();
    ///
    /// assert_eq!(pool.rent().unwrap().len(), 1);
    /// ```
    pub fn balancing(
        config: PoolConfiguration,
        comparer: impl ElementComparer<T> + 'static,
    ) -> Self {
        Self::build(config, Some(Arc::new(comparer)))
    }

    fn build(config: PoolConfiguration, comparer: Option<Arc<dyn ElementComparer<T>>>) -> Self {
        let name = config.resolve_name(|| format!("StaticObjectPool<{}>", type_name::<T>()));
        Self {
            inner: Arc::new(StaticInner {
                core: PoolCore::new(name, config.observer),
                container: ElementsContainer::new(comparer),
            }),
        }
    }

    /// Add an element to the free list
    pub fn add_element(&self, element: T) -> PoolResult<()> {
        if self.inner.core.is_disposed() {
            return Err(self.inner.core.disposed_error());
        }
        self.push_element(element);
        self.inner.collect_after_dispose();
        Ok(())
    }

    /// Take a rented element out of the pool for good.
    ///
    /// The element must currently be rented from this pool through `guard`. Afterwards
    /// the guard is empty and the element has been dropped.
    pub fn remove_element(&self, guard: &mut RentGuard<T>) -> PoolResult<()> {
        let wrapper = guard.take_for_removal(self.inner.core.id())?;
        self.inner.destroy(wrapper, "removed by owner");
        Ok(())
    }

    /// Whether free elements are picked by a comparer
    pub fn is_balancing(&self) -> bool {
        self.inner.container.is_prioritized()
    }

    fn push_element(&self, element: T) {
        let core = &self.inner.core;
        let wrapper = ElementWrapper::new(element, core.id(), core.shared_name());
        self.inner.container.add_free(wrapper);
        core.record(PoolEvent::Created);
        trace!(pool = %core.name(), "element added");
    }
}

impl<T: Send + Ord + 'static> StaticObjectPool<T> {
    /// Create an empty balancing pool that rents the greatest free element first
    pub fn balancing_ord(config: PoolConfiguration) -> Self {
        Self::balancing(config, |a: &T, b: &T| a.cmp(b))
    }
}

impl<T: Send + 'static> RentalPool<T> for StaticObjectPool<T> {
    fn name(&self) -> &str {
        self.inner.core.name()
    }

    fn element_count(&self) -> usize {
        self.inner.container.count()
    }

    fn free_element_count(&self) -> usize {
        self.inner.container.available_count()
    }

    fn is_disposed(&self) -> bool {
        self.inner.core.is_disposed()
    }

    fn metrics(&self) -> PoolMetrics {
        self.inner
            .core
            .metrics(self.element_count(), self.free_element_count(), None)
    }

    fn dispose(&self, wait_for_release: bool) {
        if self.inner.core.begin_dispose() {
            for wrapper in self.inner.container.drain_free() {
                self.inner.destroy(wrapper, "pool disposed");
            }
        }
        if wait_for_release {
            self.inner.container.wait_drained(|| true);
        }
    }

    #[track_caller]
    fn rent_with(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        throw_on_unavailable: bool,
    ) -> PoolResult<Option<RentGuard<T>>> {
        rent_from(&self.inner, timeout, cancel, throw_on_unavailable)
    }
}

impl<T: Send + 'static> fmt::Debug for StaticObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticObjectPool")
            .field("name", &self.inner.core.name())
            .field("container", &self.inner.container)
            .field("disposed", &self.inner.core.is_disposed())
            .finish()
    }
}
