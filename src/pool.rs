//! The rent contract shared by every pool strategy

use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::cancellation::CancellationToken;
use crate::deadline::Deadline;
use crate::errors::{PoolError, PoolResult};
use crate::guard::{ElementSource, RentGuard};
use crate::metrics::{MetricsTracker, PoolEvent, PoolMetrics, PoolObserver};
use crate::wrapper::ElementWrapper;

/// Public surface shared by all pools
///
/// Every rent flavour funnels into [`rent_with`](Self::rent_with):
///
/// - a `timeout` of `None` blocks until an element is available,
/// - `Some(Duration::ZERO)` only probes and never waits,
/// - pool disposal and the caller's `cancel` token both interrupt a waiting rent.
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{RentalPool, StaticObjectPool};
/// use std::time::Duration;
///
/// let pool = StaticObjectPool::with_elements("numbers", vec![7]);
///
/// let first = pool.rent().unwrap();
/// assert_eq!(*first, 7);
///
/// // The only element is rented; a probe comes back empty
/// assert!(pool.try_rent(Duration::ZERO).is_none());
///
/// drop(first);
/// assert!(pool.try_rent(Duration::ZERO).is_some());
/// ```
pub trait RentalPool<T: Send + 'static> {
    /// Display name used in errors, logs and metrics
    fn name(&self) -> &str;

    /// Elements owned by the pool, free and rented
    fn element_count(&self) -> usize;

    /// Elements waiting in the free list
    fn free_element_count(&self) -> usize;

    fn is_disposed(&self) -> bool;

    fn metrics(&self) -> PoolMetrics;

    /// Shut the pool down.
    ///
    /// Free elements are destroyed immediately and waiting renters are woken. Rented
    /// elements are destroyed as they come back; with `wait_for_release` this call
    /// blocks until that has happened for all of them.
    fn dispose(&self, wait_for_release: bool);

    /// Rent an element.
    ///
    /// Returns `Ok(None)` when no element could be obtained and `throw_on_unavailable`
    /// is false. Otherwise the failure is reported as [`PoolError::Cancelled`],
    /// [`PoolError::Timeout`] or [`PoolError::Unavailable`]. A disposed pool always
    /// reports [`PoolError::Disposed`].
    #[track_caller]
    fn rent_with(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        throw_on_unavailable: bool,
    ) -> PoolResult<Option<RentGuard<T>>>;

    /// Rent an element, waiting as long as it takes
    #[track_caller]
    fn rent(&self) -> PoolResult<RentGuard<T>> {
        self.rent_cancellable(None, CancellationToken::never())
    }

    /// Rent an element, waiting at most `timeout`
    #[track_caller]
    fn rent_timeout(&self, timeout: Duration) -> PoolResult<RentGuard<T>> {
        self.rent_cancellable(Some(timeout), CancellationToken::never())
    }

    /// Rent an element, giving up when `cancel` fires or `timeout` elapses
    #[track_caller]
    fn rent_cancellable(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> PoolResult<RentGuard<T>> {
        self.rent_with(timeout, cancel, true)?
            .ok_or_else(|| PoolError::Unavailable {
                pool: self.name().to_string(),
            })
    }

    /// Try to rent an element without returning an error
    #[track_caller]
    fn try_rent(&self, timeout: Duration) -> Option<RentGuard<T>> {
        self.rent_with(Some(timeout), CancellationToken::never(), false)
            .ok()
            .flatten()
    }

    /// Rent an element from async code.
    ///
    /// The blocking rent runs on tokio's blocking thread pool, so this must be awaited
    /// inside a tokio runtime.
    fn rent_async(
        &self,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> impl Future<Output = PoolResult<RentGuard<T>>> + Send
    where
        Self: Clone + Send + Sized + 'static,
    {
        let pool = self.clone();
        async move { run_blocking(move || pool.rent_cancellable(timeout, &cancel)).await }
    }
}

/// Run a blocking pool call on tokio's blocking thread pool.
///
/// A panic inside `task` resumes on the awaiting task.
pub(crate) async fn run_blocking<R, F>(task: F) -> PoolResult<R>
where
    F: FnOnce() -> PoolResult<R> + Send + 'static,
    R: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(error) => match error.try_into_panic() {
            Ok(payload) => std::panic::resume_unwind(payload),
            Err(error) => Err(PoolError::InvalidOperation(format!(
                "blocking pool task failed: {error}"
            ))),
        },
    }
}

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// State every strategy shares: identity, the dispose signal and metrics.
#[derive(Debug)]
pub(crate) struct PoolCore {
    id: u64,
    name: Arc<str>,
    dispose_signal: CancellationToken,
    metrics: MetricsTracker,
}

impl PoolCore {
    pub fn new(name: String, observer: Option<Arc<dyn PoolObserver>>) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            dispose_signal: CancellationToken::new(),
            metrics: MetricsTracker::new(observer),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn is_disposed(&self) -> bool {
        self.dispose_signal.is_cancelled()
    }

    /// Raise the dispose signal. Returns `true` for the one call that started disposal.
    pub fn begin_dispose(&self) -> bool {
        let first = self.dispose_signal.cancel();
        if first {
            debug!(pool = %self.name, "pool disposal started");
        }
        first
    }

    pub fn dispose_signal(&self) -> &CancellationToken {
        &self.dispose_signal
    }

    pub fn record(&self, event: PoolEvent) {
        self.metrics.record(&self.name, event);
    }

    pub fn metrics(&self, element_count: usize, free: usize, max: Option<usize>) -> PoolMetrics {
        self.metrics.get_metrics(element_count, free, max)
    }

    pub fn disposed_error(&self) -> PoolError {
        PoolError::Disposed {
            pool: self.name.to_string(),
        }
    }
}

/// Strategy-specific part of renting, implemented by each pool's shared state
pub(crate) trait RentStrategy<T: Send + 'static>: ElementSource<T> + Sized + 'static {
    fn core(&self) -> &PoolCore;

    /// Produce a rented wrapper within `deadline`, or `None`.
    ///
    /// With an expired deadline this must not block.
    fn rent_element(
        &self,
        deadline: &Deadline,
        cancel: &CancellationToken,
    ) -> Option<Box<ElementWrapper<T>>>;
}

/// The rent protocol: fail fast, probe without waiting, then wait on the caller's token
/// combined with the pool's dispose signal.
#[track_caller]
pub(crate) fn rent_from<T, S>(
    strategy: &Arc<S>,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    throw_on_unavailable: bool,
) -> PoolResult<Option<RentGuard<T>>>
where
    T: Send + 'static,
    S: RentStrategy<T>,
{
    let location = Location::caller();
    let started = Instant::now();
    let core = strategy.core();

    if core.is_disposed() {
        return Err(core.disposed_error());
    }
    if cancel.is_cancelled() {
        core.record(PoolEvent::Unavailable);
        return unavailable(
            PoolError::Cancelled {
                pool: core.name().to_string(),
            },
            throw_on_unavailable,
        );
    }

    let mut rented = strategy.rent_element(&Deadline::probe(), cancel);
    if rented.is_none() && timeout != Some(Duration::ZERO) {
        let combined = CancellationToken::linked(&[cancel, core.dispose_signal()]);
        rented = strategy.rent_element(&Deadline::starting_at(started, timeout), &combined);
    }

    if let Some(mut wrapper) = rented {
        wrapper.record_rent_site(location);
        core.record(PoolEvent::Rented);
        trace!(pool = %core.name(), "element rented");

        let source: Arc<dyn ElementSource<T>> = strategy.clone();
        return Ok(Some(RentGuard::new(wrapper, source)));
    }

    core.record(PoolEvent::Unavailable);
    let pool = core.name().to_string();
    if core.is_disposed() {
        return Err(PoolError::Disposed { pool });
    }
    let deadline = Deadline::starting_at(started, timeout);
    let error = match timeout {
        _ if cancel.is_cancelled() => PoolError::Cancelled { pool },
        Some(timeout) if deadline.is_expired() => PoolError::Timeout { pool, timeout },
        _ => PoolError::Unavailable { pool },
    };
    trace!(pool = %core.name(), %error, "rent finished without an element");
    unavailable(error, throw_on_unavailable)
}

fn unavailable<T>(error: PoolError, throw_on_unavailable: bool) -> PoolResult<Option<T>> {
    if throw_on_unavailable {
        Err(error)
    } else {
        Ok(None)
    }
}
