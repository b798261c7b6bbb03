//! Self-managing pools
//!
//! A dynamic pool creates elements on demand through an [`ElementManager`], up to a
//! configured maximum, validates them on every rent and release, and trims idle
//! elements back towards the configured minimum. The balancing flavour additionally
//! rents the best free element and may swap a rented element for a freshly created one.

use std::any::type_name;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tracing::{debug, trace, warn};

use crate::cancellation::CancellationToken;
use crate::config::PoolConfiguration;
use crate::container::{ElementComparer, ElementsContainer, Ranking};
use crate::deadline::Deadline;
use crate::errors::PoolResult;
use crate::guard::{ElementSource, RentGuard};
use crate::metrics::{PoolEvent, PoolMetrics};
use crate::pool::{PoolCore, RentStrategy, RentalPool, rent_from, run_blocking};
use crate::tracker::UsedElementTracker;
use crate::wrapper::ElementWrapper;

/// Lifecycle of the elements held by a [`DynamicObjectPool`]
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{CancellationToken, DynamicObjectPool, ElementManager, PoolConfiguration, RentalPool};
/// use std::time::Duration;
///
/// struct Connections;
///
/// impl ElementManager for Connections {
///     type Element = String;
///     type Error = std::io::Error;
///
///     fn create(&self, _timeout: Option<Duration>, _cancel: &CancellationToken) -> Result<String, Self::Error> {
///         Ok("connection".to_string())
///     }
///
///     fn is_valid(&self, element: &String) -> bool {
///         !element.is_empty()
///     }
/// }
///
/// let pool = DynamicObjectPool::new(Connections, PoolConfiguration::new().with_max_elements(2)).unwrap();
/// let connection = pool.rent().unwrap();
/// assert_eq!(*connection, "connection");
/// assert_eq!(pool.element_count(), 1);
/// ```
pub trait ElementManager: Send + Sync + 'static {
    type Element: Send + 'static;
    type Error: fmt::Display;

    /// Create a new element within `timeout` (`None` is unbounded).
    ///
    /// Returning an error is an ordinary outcome: the pool counts a fault and retries
    /// later within the renter's budget.
    fn create(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Self::Element, Self::Error>;

    /// Whether `element` may still be handed out
    fn is_valid(&self, _element: &Self::Element) -> bool {
        true
    }

    /// Dispose of an element the pool no longer keeps
    fn destroy(&self, element: Self::Element) {
        drop(element);
    }
}

/// An [`ElementManager`] that can rank its elements
pub trait BalancingElementManager: ElementManager {
    /// Compare `candidate` against `best`; `Greater` prefers the candidate.
    fn compare(&self, candidate: &Self::Element, best: &Self::Element) -> Ranking;

    /// Whether a freshly created element would serve better than `element`.
    ///
    /// When this holds and the pool has room, the rent creates a new element and puts
    /// `element` back into the free list.
    fn is_better_to_allocate_new(&self, _element: &Self::Element) -> bool {
        false
    }
}

/// [`ElementManager`] backed by an infallible factory closure
pub struct FactoryManager<F, T> {
    factory: F,
    _element: PhantomData<fn() -> T>,
}

impl<F, T> FactoryManager<F, T>
where
    F: Fn() -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _element: PhantomData,
        }
    }
}

impl<F, T> ElementManager for FactoryManager<F, T>
where
    F: Fn() -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    type Element = T;
    type Error = Infallible;

    fn create(&self, _timeout: Option<Duration>, _cancel: &CancellationToken) -> Result<T, Infallible> {
        Ok((self.factory)())
    }
}

type Replacement<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

struct DynamicInner<M: ElementManager> {
    core: PoolCore,
    manager: Arc<M>,
    container: ElementsContainer<M::Element>,
    reserved: CachePadded<AtomicUsize>,
    tracker: UsedElementTracker,
    min_elements: usize,
    max_elements: usize,
    retry_interval: Duration,
    replacement: Option<Replacement<M::Element>>,
}

impl<M: ElementManager> DynamicInner<M> {
    fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Claim a creation slot; never lets the reserved count pass the maximum.
    fn reserve_slot(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |reserved| {
                (reserved < self.max_elements).then_some(reserved + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        self.container.notify_drained();
    }
}

/// A claimed creation slot, handed back on drop unless the element was created.
struct SlotReservation<'a, M: ElementManager> {
    inner: &'a DynamicInner<M>,
    committed: bool,
}

impl<M: ElementManager> SlotReservation<'_, M> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<M: ElementManager> Drop for SlotReservation<'_, M> {
    fn drop(&mut self) {
        if !self.committed {
            self.inner.release_slot();
        }
    }
}

impl<M: ElementManager> DynamicInner<M> {

    /// Create one element and register it as rented.
    fn try_create(
        &self,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Option<Box<ElementWrapper<M::Element>>> {
        if !self.reserve_slot() {
            return None;
        }
        let slot = SlotReservation {
            inner: self,
            committed: false,
        };

        match self.manager.create(deadline.remaining(), cancel) {
            Ok(element) => {
                slot.commit();
                self.tracker.reset();
                self.core.record(PoolEvent::Created);
                debug!(pool = %self.core.name(), reserved = self.reserved(), "element created");

                let wrapper = ElementWrapper::new(element, self.core.id(), self.core.shared_name());
                let wrapper = self.container.add_busy(wrapper);
                if self.core.is_disposed() {
                    self.destroy_wrapper(wrapper, "pool disposed");
                    return None;
                }
                Some(wrapper)
            }
            Err(error) => {
                drop(slot);
                self.core.record(PoolEvent::Faulted);
                warn!(pool = %self.core.name(), %error, "element creation failed");
                None
            }
        }
    }

    /// Take a free element that still passes validation, destroying the ones that don't.
    fn take_valid(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Option<Box<ElementWrapper<M::Element>>> {
        let mut timeout = timeout;
        loop {
            let wrapper = self.container.take(timeout, cancel)?;
            if !wrapper.is_marked_invalid() && self.manager.is_valid(wrapper.element()) {
                return Some(wrapper);
            }
            self.destroy_wrapper(wrapper, "failed validation");
            // Only drain what is already free; creation gets the freed slot
            timeout = Some(Duration::ZERO);
        }
    }

    /// Swap `wrapper` for a new element when the manager asks for it and there is room.
    fn rebalance(
        &self,
        wrapper: Box<ElementWrapper<M::Element>>,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Box<ElementWrapper<M::Element>> {
        let Some(replace) = &self.replacement else {
            return wrapper;
        };
        if !replace(wrapper.element()) {
            return wrapper;
        }

        match self.try_create(deadline, cancel) {
            Some(fresh) => {
                self.container.release(wrapper);
                trace!(pool = %self.core.name(), "rented element replaced by a new one");
                self.collect_after_dispose();
                fresh
            }
            None => wrapper,
        }
    }

    fn destroy_wrapper(&self, wrapper: Box<ElementWrapper<M::Element>>, reason: &'static str) {
        let element = self.container.destroy(wrapper);
        self.manager.destroy(element);
        self.release_slot();
        self.core.record(PoolEvent::Destroyed);
        debug!(pool = %self.core.name(), reason, reserved = self.reserved(), "element destroyed");
    }

    /// Destroy one free element if disposal started while it was being returned.
    fn collect_after_dispose(&self) {
        if self.core.is_disposed() {
            if let Some(wrapper) = self
                .container
                .take(Some(Duration::ZERO), CancellationToken::never())
            {
                self.destroy_wrapper(wrapper, "pool disposed");
            }
        }
    }
}

impl<M: ElementManager> ElementSource<M::Element> for DynamicInner<M> {
    fn release_element(&self, wrapper: Box<ElementWrapper<M::Element>>) {
        self.tracker.update_min_free(self.container.available_count());
        let trim = self.reserved() > self.min_elements && self.tracker.trim_approved();

        if self.core.is_disposed() {
            self.destroy_wrapper(wrapper, "pool disposed");
            return;
        }
        if wrapper.is_marked_invalid() || !self.manager.is_valid(wrapper.element()) {
            self.destroy_wrapper(wrapper, "failed validation");
            return;
        }
        if trim {
            self.destroy_wrapper(wrapper, "trimmed");
            return;
        }

        self.container.release(wrapper);
        self.core.record(PoolEvent::Released);
        trace!(pool = %self.core.name(), "element released");

        self.collect_after_dispose();
    }
}

impl<M: ElementManager> RentStrategy<M::Element> for DynamicInner<M> {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    fn rent_element(
        &self,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Option<Box<ElementWrapper<M::Element>>> {
        if let Some(wrapper) = self.take_valid(Some(Duration::ZERO), cancel) {
            return Some(self.rebalance(wrapper, deadline, cancel));
        }
        if deadline.is_expired() {
            return None;
        }

        loop {
            if cancel.is_cancelled() || self.core.is_disposed() {
                return None;
            }
            if let Some(wrapper) = self.try_create(deadline, cancel) {
                return Some(wrapper);
            }

            // At capacity or creation failed: wait for a release, then try again
            let wait = deadline.remaining_capped(self.retry_interval);
            if wait.is_zero() {
                return None;
            }
            if let Some(wrapper) = self.take_valid(Some(wait), cancel) {
                return Some(self.rebalance(wrapper, deadline, cancel));
            }
            if deadline.is_expired() {
                return None;
            }
        }
    }
}

impl<M: ElementManager> Drop for DynamicInner<M> {
    fn drop(&mut self) {
        for wrapper in self.container.drain_free() {
            let element = self.container.destroy(wrapper);
            self.manager.destroy(element);
        }
    }
}

/// Thread-safe pool that creates, validates and trims its elements
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{DynamicObjectPool, PoolConfiguration, RentalPool};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new().with_name("buffers").with_max_elements(2);
/// let pool = DynamicObjectPool::with_factory(|| Vec::<u8>::with_capacity(1024), config).unwrap();
///
/// let first = pool.rent().unwrap();
/// let second = pool.rent().unwrap();
/// assert_eq!(pool.element_count(), 2);
///
/// // At capacity: a probe neither waits nor creates
/// assert!(pool.try_rent(Duration::ZERO).is_none());
///
/// drop(first);
/// assert!(pool.try_rent(Duration::ZERO).is_some());
/// # drop(second);
/// ```
pub struct DynamicObjectPool<M: ElementManager> {
    inner: Arc<DynamicInner<M>>,
}

impl<M: ElementManager> Clone for DynamicObjectPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ElementManager> DynamicObjectPool<M> {
    /// Create an empty pool; elements are created on demand.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfiguration`](crate::PoolError::InvalidConfiguration) if the bounds are inconsistent.
    pub fn new(manager: M, config: PoolConfiguration) -> PoolResult<Self> {
        Self::build(Arc::new(manager), config, None, None)
    }

    fn build(
        manager: Arc<M>,
        config: PoolConfiguration,
        comparer: Option<Arc<dyn ElementComparer<M::Element>>>,
        replacement: Option<Replacement<M::Element>>,
    ) -> PoolResult<Self> {
        config.validate()?;

        let name = config.resolve_name(|| format!("DynamicObjectPool<{}>", type_name::<M::Element>()));
        let retry_interval = config
            .effective_retry_interval()
            .max(Duration::from_millis(1));
        let inner = DynamicInner {
            core: PoolCore::new(name, config.observer.clone()),
            manager,
            container: ElementsContainer::new(comparer),
            reserved: CachePadded::new(AtomicUsize::new(0)),
            tracker: UsedElementTracker::new(config.trim_window),
            min_elements: config.min_element_count,
            max_elements: config.max_element_count,
            retry_interval,
            replacement,
        };
        debug!(
            pool = %inner.core.name(),
            min = inner.min_elements,
            max = inner.max_elements,
            "dynamic pool created"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The element manager driving this pool
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn min_element_count(&self) -> usize {
        self.inner.min_elements
    }

    pub fn max_element_count(&self) -> usize {
        self.inner.max_elements
    }

    /// Create elements until the pool holds `count` of them (capped at the maximum).
    ///
    /// Creation is not bounded by a timeout. Stops early at the first failed creation.
    /// Returns the number of elements created by this call.
    pub fn fill_pool_up_to(&self, count: usize) -> PoolResult<usize> {
        let inner = &self.inner;
        if inner.core.is_disposed() {
            return Err(inner.core.disposed_error());
        }

        let target = count.min(inner.max_elements);
        let unbounded = Deadline::after(None);
        let mut created = 0;
        while inner.reserved() < target {
            let Some(wrapper) = inner.try_create(&unbounded, CancellationToken::never()) else {
                break;
            };
            inner.container.release(wrapper);
            inner.collect_after_dispose();
            created += 1;
        }

        debug!(pool = %inner.core.name(), created, target, "pool filled");
        Ok(created)
    }

    /// [`fill_pool_up_to`](Self::fill_pool_up_to) on tokio's blocking thread pool
    pub async fn fill_pool_up_to_async(&self, count: usize) -> PoolResult<usize> {
        let pool = self.clone();
        run_blocking(move || pool.fill_pool_up_to(count)).await
    }
}

impl<F, T> DynamicObjectPool<FactoryManager<F, T>>
where
    F: Fn() -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    /// Create a pool whose elements come from an infallible factory
    pub fn with_factory(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        Self::new(FactoryManager::new(factory), config)
    }
}

impl<M: ElementManager> RentalPool<M::Element> for DynamicObjectPool<M> {
    fn name(&self) -> &str {
        self.inner.core.name()
    }

    /// Reserved slots: elements alive plus elements being created
    fn element_count(&self) -> usize {
        self.inner.reserved()
    }

    fn free_element_count(&self) -> usize {
        self.inner.container.available_count()
    }

    fn is_disposed(&self) -> bool {
        self.inner.core.is_disposed()
    }

    fn metrics(&self) -> PoolMetrics {
        self.inner.core.metrics(
            self.element_count(),
            self.free_element_count(),
            Some(self.inner.max_elements),
        )
    }

    fn dispose(&self, wait_for_release: bool) {
        let inner = &self.inner;
        if inner.core.begin_dispose() {
            for wrapper in inner.container.drain_free() {
                inner.destroy_wrapper(wrapper, "pool disposed");
            }
        }
        if wait_for_release {
            inner.container.wait_drained(|| inner.reserved() == 0);
        }
    }

    #[track_caller]
    fn rent_with(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        throw_on_unavailable: bool,
    ) -> PoolResult<Option<RentGuard<M::Element>>> {
        rent_from(&self.inner, timeout, cancel, throw_on_unavailable)
    }
}

impl<M: ElementManager> fmt::Debug for DynamicObjectPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicObjectPool")
            .field("name", &self.inner.core.name())
            .field("reserved", &self.inner.reserved())
            .field("min_elements", &self.inner.min_elements)
            .field("max_elements", &self.inner.max_elements)
            .field("container", &self.inner.container)
            .field("disposed", &self.inner.core.is_disposed())
            .finish()
    }
}

struct ManagerComparer<M>(Arc<M>);

impl<M: BalancingElementManager> ElementComparer<M::Element> for ManagerComparer<M> {
    fn compare(&self, candidate: &M::Element, best: &M::Element) -> Ranking {
        self.0.compare(candidate, best)
    }
}

/// Dynamic pool that rents the best free element and replaces weak ones on demand
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{
///     BalancingDynamicObjectPool, BalancingElementManager, CancellationToken, ElementManager,
///     PoolConfiguration, Ranking, RentalPool,
/// };
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct Generations(AtomicU32);
///
/// impl ElementManager for Generations {
///     type Element = u32;
///     type Error = String;
///
///     fn create(&self, _timeout: Option<Duration>, _cancel: &CancellationToken) -> Result<u32, String> {
///         Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
///     }
/// }
///
/// impl BalancingElementManager for Generations {
///     fn compare(&self, candidate: &u32, best: &u32) -> Ranking {
///         Ranking::new(candidate.cmp(best))
///     }
/// }
///
/// let pool = BalancingDynamicObjectPool::new(Generations::default(), PoolConfiguration::new()).unwrap();
/// pool.fill_pool_up_to(3).unwrap();
/// assert_eq!(*pool.rent().unwrap(), 3);
/// ```
pub struct BalancingDynamicObjectPool<M: BalancingElementManager> {
    pool: DynamicObjectPool<M>,
}

impl<M: BalancingElementManager> Clone for BalancingDynamicObjectPool<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<M: BalancingElementManager> BalancingDynamicObjectPool<M> {
    pub fn new(manager: M, config: PoolConfiguration) -> PoolResult<Self> {
        let manager = Arc::new(manager);
        let comparer: Arc<dyn ElementComparer<M::Element>> =
            Arc::new(ManagerComparer(Arc::clone(&manager)));
        let judge = Arc::clone(&manager);
        let replacement: Replacement<M::Element> =
            Box::new(move |element: &M::Element| judge.is_better_to_allocate_new(element));

        let config = if config.name.is_some() {
            config
        } else {
            let name = format!("BalancingDynamicObjectPool<{}>", type_name::<M::Element>());
            config.with_name(name)
        };

        Ok(Self {
            pool: DynamicObjectPool::build(manager, config, Some(comparer), Some(replacement))?,
        })
    }

    pub fn manager(&self) -> &M {
        self.pool.manager()
    }

    pub fn fill_pool_up_to(&self, count: usize) -> PoolResult<usize> {
        self.pool.fill_pool_up_to(count)
    }

    pub async fn fill_pool_up_to_async(&self, count: usize) -> PoolResult<usize> {
        self.pool.fill_pool_up_to_async(count).await
    }
}

impl<M: BalancingElementManager> RentalPool<M::Element> for BalancingDynamicObjectPool<M> {
    fn name(&self) -> &str {
        self.pool.name()
    }

    fn element_count(&self) -> usize {
        self.pool.element_count()
    }

    fn free_element_count(&self) -> usize {
        self.pool.free_element_count()
    }

    fn is_disposed(&self) -> bool {
        self.pool.is_disposed()
    }

    fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }

    fn dispose(&self, wait_for_release: bool) {
        self.pool.dispose(wait_for_release)
    }

    #[track_caller]
    fn rent_with(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        throw_on_unavailable: bool,
    ) -> PoolResult<Option<RentGuard<M::Element>>> {
        self.pool.rent_with(timeout, cancel, throw_on_unavailable)
    }
}

impl<M: BalancingElementManager> fmt::Debug for BalancingDynamicObjectPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BalancingDynamicObjectPool")
            .field(&self.pool)
            .finish()
    }
}
