//! Thread-safe storage of free elements
//!
//! The container keeps the free wrappers of one pool together with the number of
//! wrappers it has handed out or holds. Every mutation of the free list, the totals and
//! the waiter count happens under one lock, which keeps "check for a free element, then
//! wait" atomic with respect to releases.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancellation::CancellationToken;
use crate::deadline::Deadline;
use crate::wrapper::ElementWrapper;

/// Outcome of comparing a candidate element against the best one found so far
///
/// # Examples
///
/// ```
/// use esox_rentalpool::Ranking;
/// use std::cmp::Ordering;
///
/// let keep_looking = Ranking::new(Ordering::Less);
/// assert!(!keep_looking.stop_search);
///
/// let good_enough = Ranking::decisive(Ordering::Greater);
/// assert!(good_enough.stop_search);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranking {
    /// `Greater` when the candidate is preferred over the current best
    pub ordering: Ordering,

    /// Stop scanning the remaining free elements
    pub stop_search: bool,
}

impl Ranking {
    pub fn new(ordering: Ordering) -> Self {
        Self {
            ordering,
            stop_search: false,
        }
    }

    /// A ranking after which no further candidates are considered
    pub fn decisive(ordering: Ordering) -> Self {
        Self {
            ordering,
            stop_search: true,
        }
    }
}

/// Priority used by balancing pools to pick the best free element
///
/// Any `Fn(&T, &T) -> Ordering` closure is a comparer that never stops early.
pub trait ElementComparer<T>: Send + Sync {
    /// Compare `candidate` against `best`; `Greater` prefers the candidate.
    fn compare(&self, candidate: &T, best: &T) -> Ranking;
}

impl<T, F> ElementComparer<T> for F
where
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    fn compare(&self, candidate: &T, best: &T) -> Ranking {
        Ranking::new(self(candidate, best))
    }
}

struct ContainerState<T> {
    free: VecDeque<Box<ElementWrapper<T>>>,
    total: usize,
    waiters: usize,
}

struct Shared<T> {
    state: Mutex<ContainerState<T>>,
    available: Condvar,
    drained: Condvar,
    comparer: Option<Arc<dyn ElementComparer<T>>>,
}

/// Free-element store of a pool.
///
/// Without a comparer elements are handed out in insertion order; with one the best
/// free element wins and ties go to the element that has been free the longest.
pub(crate) struct ElementsContainer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> ElementsContainer<T> {
    pub fn new(comparer: Option<Arc<dyn ElementComparer<T>>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ContainerState {
                    free: VecDeque::new(),
                    total: 0,
                    waiters: 0,
                }),
                available: Condvar::new(),
                drained: Condvar::new(),
                comparer,
            }),
        }
    }

    /// Register a new element in the free list and wake one waiter.
    pub fn add_free(&self, wrapper: Box<ElementWrapper<T>>) {
        let mut state = self.shared.state.lock();
        state.total += 1;
        state.free.push_back(wrapper);
        if state.waiters > 0 {
            self.shared.available.notify_one();
        }
    }

    /// Register a new element that goes straight to its renter.
    pub fn add_busy(&self, mut wrapper: Box<ElementWrapper<T>>) -> Box<ElementWrapper<T>> {
        self.shared.state.lock().total += 1;
        wrapper.mark_busy();
        wrapper
    }

    /// Take a free element, waiting up to `timeout` (`None` waits forever).
    ///
    /// Returns `None` on timeout or when `cancel` fires; a zero timeout never waits.
    pub fn take(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Option<Box<ElementWrapper<T>>> {
        let deadline = Deadline::after(timeout);

        {
            let mut state = self.shared.state.lock();
            if let Some(wrapper) = self.pop_best(&mut state) {
                return Some(Self::rented(wrapper));
            }
            if deadline.is_expired() || cancel.is_cancelled() {
                return None;
            }
        }

        let shared = Arc::clone(&self.shared);
        let registration = cancel.register(move || {
            let _state = shared.state.lock();
            shared.available.notify_all();
        });

        let mut state = self.shared.state.lock();
        state.waiters += 1;

        let taken = loop {
            if let Some(wrapper) = self.pop_best(&mut state) {
                break Some(wrapper);
            }
            if cancel.is_cancelled() {
                break None;
            }
            match deadline.remaining() {
                None => self.shared.available.wait(&mut state),
                Some(remaining) if remaining.is_zero() => break None,
                Some(remaining) => {
                    self.shared.available.wait_for(&mut state, remaining);
                }
            }
        };

        state.waiters -= 1;
        // A release may have woken us right before we gave up; pass the wake-up on.
        if taken.is_none() && !state.free.is_empty() && state.waiters > 0 {
            self.shared.available.notify_one();
        }
        drop(state);
        drop(registration);

        taken.map(Self::rented)
    }

    /// Return a rented element to the free list and wake one waiter.
    pub fn release(&self, mut wrapper: Box<ElementWrapper<T>>) {
        wrapper.mark_free();

        let mut state = self.shared.state.lock();
        state.free.push_back(wrapper);
        if state.waiters > 0 {
            self.shared.available.notify_one();
        }
    }

    /// Unregister a rented element and hand it out for destruction.
    pub fn destroy(&self, wrapper: Box<ElementWrapper<T>>) -> T {
        debug_assert!(wrapper.is_busy(), "only rented elements can be destroyed");

        let mut state = self.shared.state.lock();
        debug_assert!(state.total > 0);
        state.total = state.total.saturating_sub(1);
        if state.total == 0 {
            self.shared.drained.notify_all();
        }
        drop(state);

        wrapper.into_destroyed()
    }

    /// Take every free element at once, marked as rented.
    pub fn drain_free(&self) -> Vec<Box<ElementWrapper<T>>> {
        let mut state = self.shared.state.lock();
        state.free.drain(..).map(Self::rented).collect()
    }

    /// Wake drain waiters so they re-evaluate their condition.
    pub fn notify_drained(&self) {
        let _state = self.shared.state.lock();
        self.shared.drained.notify_all();
    }

    /// Block until no element is registered and `also` holds.
    ///
    /// Whoever changes the state `also` reads must call [`notify_drained`](Self::notify_drained)
    /// afterwards.
    pub fn wait_drained(&self, also: impl Fn() -> bool) {
        let mut state = self.shared.state.lock();
        while !(state.total == 0 && also()) {
            self.shared.drained.wait(&mut state);
        }
    }

    pub fn count(&self) -> usize {
        self.shared.state.lock().total
    }

    pub fn available_count(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    pub fn is_prioritized(&self) -> bool {
        self.shared.comparer.is_some()
    }

    fn rented(mut wrapper: Box<ElementWrapper<T>>) -> Box<ElementWrapper<T>> {
        wrapper.mark_busy();
        wrapper
    }

    fn pop_best(&self, state: &mut ContainerState<T>) -> Option<Box<ElementWrapper<T>>> {
        let Some(comparer) = &self.shared.comparer else {
            return state.free.pop_front();
        };

        let mut best_index = 0;
        let mut best = state.free.front()?;
        for (index, candidate) in state.free.iter().enumerate().skip(1) {
            let ranking = comparer.compare(candidate.element(), best.element());
            if ranking.ordering == Ordering::Greater {
                best_index = index;
                best = candidate;
            }
            if ranking.stop_search {
                break;
            }
        }

        state.free.remove(best_index)
    }
}

impl<T> fmt::Debug for ElementsContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ElementsContainer")
            .field("total", &state.total)
            .field("free", &state.free.len())
            .field("waiters", &state.waiters)
            .field("prioritized", &self.shared.comparer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn container(values: &[i32], comparer: Option<Arc<dyn ElementComparer<i32>>>) -> ElementsContainer<i32> {
        let container = ElementsContainer::new(comparer);
        for value in values {
            container.add_free(ElementWrapper::new(*value, 1, Arc::from("test")));
        }
        container
    }

    fn by_value() -> Option<Arc<dyn ElementComparer<i32>>> {
        Some(Arc::new(|a: &i32, b: &i32| a.cmp(b)))
    }

    #[test]
    fn test_simple_container_is_fifo() {
        let container = container(&[1, 2, 3], None);
        let none = CancellationToken::none();
        let order: Vec<i32> = (0..3)
            .map(|_| *container.take(Some(Duration::ZERO), &none).unwrap().element())
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(container.count(), 3);
        assert_eq!(container.available_count(), 0);
    }

    #[test]
    fn test_prioritized_returns_best() {
        let container = container(&[3, 9, 1, 7], by_value());
        let none = CancellationToken::none();
        let first = container.take(Some(Duration::ZERO), &none).unwrap();
        assert_eq!(*first.element(), 9);
        let second = container.take(Some(Duration::ZERO), &none).unwrap();
        assert_eq!(*second.element(), 7);
    }

    #[test]
    fn test_prioritized_ties_keep_insertion_order() {
        let container = ElementsContainer::new(Some(
            Arc::new(|a: &(i32, char), b: &(i32, char)| a.0.cmp(&b.0)) as Arc<dyn ElementComparer<(i32, char)>>,
        ));
        for item in [(1, 'a'), (5, 'b'), (5, 'c'), (2, 'd')] {
            container.add_free(ElementWrapper::new(item, 1, Arc::from("test")));
        }
        let none = CancellationToken::none();
        let taken = container.take(Some(Duration::ZERO), &none).unwrap();
        assert_eq!(*taken.element(), (5, 'b'));
    }

    struct StopAtFive;

    impl ElementComparer<i32> for StopAtFive {
        fn compare(&self, candidate: &i32, best: &i32) -> Ranking {
            if *candidate >= 5 {
                Ranking::decisive(candidate.cmp(best))
            } else {
                Ranking::new(candidate.cmp(best))
            }
        }
    }

    #[test]
    fn test_early_stop_skips_rest_of_scan() {
        let container = container(&[1, 6, 9], Some(Arc::new(StopAtFive)));
        let none = CancellationToken::none();
        let taken = container.take(Some(Duration::ZERO), &none).unwrap();
        assert_eq!(*taken.element(), 6);
    }

    #[test]
    fn test_add_as_busy_skips_free_list() {
        let container = container(&[], None);
        let wrapper = container.add_busy(ElementWrapper::new(5, 1, Arc::from("test")));
        assert!(wrapper.is_busy());
        assert_eq!(container.count(), 1);
        assert_eq!(container.available_count(), 0);
    }

    #[test]
    fn test_take_times_out() {
        let container = container(&[], None);
        let started = Instant::now();
        let taken = container.take(Some(Duration::from_millis(30)), &CancellationToken::none());
        assert!(taken.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_release_wakes_blocked_taker() {
        let container = Arc::new(container(&[4], None));
        let none = CancellationToken::none();
        let held = container.take(Some(Duration::ZERO), &none).unwrap();

        let waiter = {
            let container = Arc::clone(&container);
            thread::spawn(move || {
                container
                    .take(None, &CancellationToken::none())
                    .map(|w| *w.element())
            })
        };

        thread::sleep(Duration::from_millis(20));
        container.release(held);
        assert_eq!(waiter.join().unwrap(), Some(4));
    }

    #[test]
    fn test_cancel_unblocks_and_unregisters() {
        let container = Arc::new(container(&[], None));
        let token = CancellationToken::new();

        let waiter = {
            let container = Arc::clone(&container);
            let token = token.clone();
            thread::spawn(move || container.take(None, &token).is_none())
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(waiter.join().unwrap());
        assert_eq!(token.registered_callbacks(), 0);
    }

    #[test]
    fn test_finished_wait_leaves_no_registration() {
        let container = container(&[], None);
        let token = CancellationToken::new();
        assert!(container.take(Some(Duration::from_millis(5)), &token).is_none());
        assert_eq!(token.registered_callbacks(), 0);
    }

    #[test]
    fn test_destroy_and_drain() {
        let container = container(&[1, 2, 3], None);
        let drained = container.drain_free();
        assert_eq!(drained.len(), 3);
        assert_eq!(container.available_count(), 0);

        let destroyed: Vec<i32> = drained.into_iter().map(|w| container.destroy(w)).collect();
        assert_eq!(destroyed, vec![1, 2, 3]);
        assert_eq!(container.count(), 0);
        container.wait_drained(|| true);
    }
}
