//! Wall-clock budgets for blocking operations

use std::time::{Duration, Instant};

/// A timeout measured from the moment an operation started.
///
/// `None` means the budget is unbounded; `Some(Duration::ZERO)` is a non-blocking probe.
/// The remaining budget is recomputed from the start instant on every call, so repeated
/// waits never accumulate drift.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub fn starting_at(started: Instant, timeout: Option<Duration>) -> Self {
        Self { started, timeout }
    }

    pub fn probe() -> Self {
        Self::after(Some(Duration::ZERO))
    }

    /// Remaining budget; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|timeout| timeout.saturating_sub(self.started.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|remaining| remaining.is_zero())
    }

    /// The shorter of `cap` and the remaining budget.
    pub fn remaining_capped(&self, cap: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(cap),
            None => cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_expires() {
        let deadline = Deadline::after(None);
        assert!(deadline.remaining().is_none());
        assert!(!deadline.is_expired());
        assert_eq!(
            deadline.remaining_capped(Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn test_probe_is_expired_immediately() {
        let deadline = Deadline::probe();
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        assert!(deadline.is_expired());
    }

    #[test]
    fn test_remaining_shrinks() {
        let started = Instant::now() - Duration::from_millis(40);
        let deadline = Deadline::starting_at(started, Some(Duration::from_millis(100)));
        let remaining = deadline.remaining().unwrap();
        assert!(remaining <= Duration::from_millis(60));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining_capped(Duration::from_secs(10)) <= Duration::from_millis(60));
    }

    #[test]
    fn test_elapsed_budget_saturates() {
        let started = Instant::now() - Duration::from_millis(50);
        let deadline = Deadline::starting_at(started, Some(Duration::from_millis(10)));
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        assert!(deadline.is_expired());
    }
}
