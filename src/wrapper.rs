//! Per-element bookkeeping

use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

/// Lifecycle of a wrapped element.
///
/// Destruction consumes the wrapper (see [`ElementWrapper::into_destroyed`]), so the
/// terminal state is enforced by ownership rather than stored as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WrapperState {
    Free,
    Busy,
}

/// Where and when an element was rented; kept for leak diagnostics.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RentSite {
    pub location: &'static Location<'static>,
    pub thread: ThreadId,
    pub at: Instant,
}

impl fmt::Display for RentSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {:?}, {:?} ago",
            self.location,
            self.thread,
            self.at.elapsed()
        )
    }
}

/// An element together with its pool bookkeeping.
///
/// A wrapper lives in exactly one place at a time: the free list of its container or
/// the [`RentGuard`](crate::RentGuard) that rented it. Moving the box between the two
/// is what makes a rent exclusive.
pub(crate) struct ElementWrapper<T> {
    element: T,
    state: WrapperState,
    valid: Option<bool>,
    pool_id: u64,
    pool_name: Arc<str>,
    rent_site: Option<RentSite>,
}

impl<T> ElementWrapper<T> {
    pub fn new(element: T, pool_id: u64, pool_name: Arc<str>) -> Box<Self> {
        Box::new(Self {
            element,
            state: WrapperState::Free,
            valid: None,
            pool_id,
            pool_name,
            rent_site: None,
        })
    }

    pub fn element(&self) -> &T {
        &self.element
    }

    pub fn element_mut(&mut self) -> &mut T {
        &mut self.element
    }

    pub fn is_busy(&self) -> bool {
        self.state == WrapperState::Busy
    }

    pub fn mark_busy(&mut self) {
        debug_assert_eq!(self.state, WrapperState::Free, "element rented twice");
        self.state = WrapperState::Busy;
    }

    pub fn mark_free(&mut self) {
        debug_assert_eq!(self.state, WrapperState::Busy, "element released twice");
        self.state = WrapperState::Free;
        self.rent_site = None;
    }

    /// Record the element's validity; release destroys elements marked invalid.
    pub fn set_validity(&mut self, valid: bool) {
        self.valid = Some(valid);
    }

    pub fn is_marked_invalid(&self) -> bool {
        self.valid == Some(false)
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn pool_name(&self) -> &Arc<str> {
        &self.pool_name
    }

    pub fn record_rent_site(&mut self, location: &'static Location<'static>) {
        if cfg!(debug_assertions) {
            self.rent_site = Some(RentSite {
                location,
                thread: thread::current().id(),
                at: Instant::now(),
            });
        }
    }

    pub fn rent_site(&self) -> Option<&RentSite> {
        self.rent_site.as_ref()
    }

    /// Terminal transition: hands the element out for destruction.
    pub fn into_destroyed(self: Box<Self>) -> T {
        self.element
    }
}

impl<T> fmt::Debug for ElementWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementWrapper")
            .field("pool", &self.pool_name)
            .field("state", &self.state)
            .field("valid", &self.valid)
            .field("rent_site", &self.rent_site)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper(value: i32) -> Box<ElementWrapper<i32>> {
        ElementWrapper::new(value, 7, Arc::from("test"))
    }

    #[test]
    fn test_busy_free_transitions() {
        let mut w = wrapper(1);
        assert!(!w.is_busy());
        w.mark_busy();
        assert!(w.is_busy());
        w.mark_free();
        assert!(!w.is_busy());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "element rented twice")]
    fn test_double_rent_is_caught() {
        let mut w = wrapper(1);
        w.mark_busy();
        w.mark_busy();
    }

    #[test]
    fn test_validity_cache() {
        let mut w = wrapper(1);
        assert!(!w.is_marked_invalid());
        w.set_validity(true);
        assert!(!w.is_marked_invalid());
        w.set_validity(false);
        assert!(w.is_marked_invalid());
    }

    #[test]
    fn test_destroy_returns_element() {
        let w = wrapper(42);
        assert_eq!(w.pool_id(), 7);
        assert_eq!(w.into_destroyed(), 42);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn test_rent_site_cleared_on_release() {
        let mut w = wrapper(1);
        w.mark_busy();
        w.record_rent_site(Location::caller());
        assert!(w.rent_site().is_some());
        w.mark_free();
        assert!(w.rent_site().is_none());
    }
}
