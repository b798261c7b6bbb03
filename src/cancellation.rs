//! Cooperative cancellation for blocking pool operations
//!
//! A [`CancellationToken`] is a cheap, cloneable flag that can be raised exactly once.
//! Blocking code registers a wake-up callback for the duration of its wait; the
//! [`CancellationRegistration`] removes the callback again when it is dropped, so a
//! finished wait never leaves anything behind in the token.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;

type Callback = Box<dyn FnOnce() + Send + Sync>;

struct TokenInner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    callbacks: DashMap<u64, Callback>,
}

/// Cooperative cancellation signal shared between a canceller and any number of waiters
///
/// # Examples
///
/// ```
/// use esox_rentalpool::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
///
/// assert!(token.cancel());
/// assert!(observer.is_cancelled());
/// // Only the first call performs the transition
/// assert!(!token.cancel());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                callbacks: DashMap::with_shard_amount(4),
            }),
        }
    }

    /// A private token nobody else can cancel
    pub fn none() -> Self {
        Self::new()
    }

    /// Shared token that is never cancelled, for internal non-cancellable calls.
    pub(crate) fn never() -> &'static CancellationToken {
        static NEVER: OnceLock<CancellationToken> = OnceLock::new();
        NEVER.get_or_init(CancellationToken::new)
    }

    /// Raise the token and run every registered callback.
    ///
    /// Returns `true` only for the call that actually cancelled the token.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let ids: Vec<u64> = self.inner.callbacks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            // A concurrent registration drop may have won the removal
            if let Some((_, callback)) = self.inner.callbacks.remove(&id) {
                callback();
            }
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a callback that runs once when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately on the calling
    /// thread. The callback runs at most once either way.
    pub fn register<F>(&self, callback: F) -> CancellationRegistration
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks.insert(id, Box::new(callback));

        if self.is_cancelled() {
            if let Some((_, callback)) = self.inner.callbacks.remove(&id) {
                callback();
            }
        }

        CancellationRegistration {
            token: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Create a token that is cancelled as soon as any of `parents` is cancelled.
    pub fn linked(parents: &[&CancellationToken]) -> LinkedCancellation {
        let token = CancellationToken::new();
        let registrations = parents
            .iter()
            .map(|parent| {
                let child = token.clone();
                parent.register(move || {
                    child.cancel();
                })
            })
            .collect();

        LinkedCancellation {
            token,
            _registrations: registrations,
        }
    }

    #[cfg(test)]
    pub(crate) fn registered_callbacks(&self) -> usize {
        self.inner.callbacks.len()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Keeps a callback registered on a [`CancellationToken`]; unregisters on drop
pub struct CancellationRegistration {
    token: Weak<TokenInner>,
    id: u64,
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.token.upgrade() {
            inner.callbacks.remove(&self.id);
        }
    }
}

impl fmt::Debug for CancellationRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationRegistration")
            .field("id", &self.id)
            .finish()
    }
}

/// A token driven by one or more parent tokens.
///
/// The links to the parents are removed when this value is dropped.
pub struct LinkedCancellation {
    token: CancellationToken,
    _registrations: Vec<CancellationRegistration>,
}

impl Deref for LinkedCancellation {
    type Target = CancellationToken;

    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl fmt::Debug for LinkedCancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedCancellation")
            .field("token", &self.token)
            .field("links", &self._registrations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_callback_runs_once_on_cancel() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _registration = token.register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        token.cancel();
        token.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_after_cancel_runs_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _registration = token.register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(token.registered_callbacks(), 0);
    }

    #[test]
    fn test_dropped_registration_is_removed() {
        let token = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let registration = token.register(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(token.registered_callbacks(), 1);

        drop(registration);
        assert_eq!(token.registered_callbacks(), 0);

        token.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_linked_follows_any_parent() {
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let linked = CancellationToken::linked(&[&first, &second]);
        assert!(!linked.is_cancelled());

        second.cancel();
        assert!(linked.is_cancelled());
        assert!(!first.is_cancelled());
    }

    #[test]
    fn test_linked_unlinks_on_drop() {
        let parent = CancellationToken::new();
        {
            let _linked = CancellationToken::linked(&[&parent]);
            assert_eq!(parent.registered_callbacks(), 1);
        }
        assert_eq!(parent.registered_callbacks(), 0);
    }

    #[test]
    fn test_concurrent_register_and_cancel_fire_exactly_once() {
        for _ in 0..200 {
            let token = CancellationToken::new();
            let hits = Arc::new(AtomicUsize::new(0));

            let canceller = {
                let token = token.clone();
                thread::spawn(move || token.cancel())
            };

            let counter = Arc::clone(&hits);
            let _registration = token.register(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

            canceller.join().unwrap();
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }
}
