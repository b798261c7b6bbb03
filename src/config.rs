//! Pool configuration options

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::metrics::PoolObserver;

/// Upper bound for the back-off between two element creation attempts.
///
/// A renter with a very long timeout never waits longer than this on the free list
/// before trying to create an element again.
pub const MAX_CREATION_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for rental pool behavior
///
/// Static pools only use [`name`](Self::name) and the observer; the element bounds,
/// trimming and retry settings apply to dynamic pools.
///
/// # Examples
///
/// ```
/// use esox_rentalpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_name("connections")
///     .with_min_elements(2)
///     .with_max_elements(16)
///     .with_trim_window(Duration::from_secs(30));
///
/// assert_eq!(config.max_element_count, 16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct PoolConfiguration {
    /// Display name used in errors, logs and metrics
    pub name: Option<String>,

    /// Number of elements a dynamic pool never trims below
    pub min_element_count: usize,

    /// Maximum number of elements a dynamic pool may hold (free and rented)
    pub max_element_count: usize,

    /// Length of the idle tracking window; `None` disables trimming
    pub trim_window: Option<Duration>,

    /// Back-off between failed or throttled creation attempts
    pub creation_retry_interval: Duration,

    /// Lifecycle event observer for this pool
    pub observer: Option<Arc<dyn PoolObserver>>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            name: None,
            min_element_count: 0,
            max_element_count: 100,
            trim_window: Some(Duration::from_secs(60)),
            creation_retry_interval: Duration::from_secs(2),
            observer: None,
        }
    }
}

impl fmt::Debug for PoolConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("name", &self.name)
            .field("min_element_count", &self.min_element_count)
            .field("max_element_count", &self.max_element_count)
            .field("trim_window", &self.trim_window)
            .field("creation_retry_interval", &self.creation_retry_interval)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the minimum element count
    pub fn with_min_elements(mut self, count: usize) -> Self {
        self.min_element_count = count;
        self
    }

    /// Set the maximum element count
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_rentalpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_elements(4);
    /// assert_eq!(config.max_element_count, 4);
    /// ```
    pub fn with_max_elements(mut self, count: usize) -> Self {
        self.max_element_count = count;
        self
    }

    /// Set the idle tracking window used for trimming
    pub fn with_trim_window(mut self, window: Duration) -> Self {
        self.trim_window = Some(window);
        self
    }

    /// Never trim idle elements
    pub fn without_trimming(mut self) -> Self {
        self.trim_window = None;
        self
    }

    /// Set the creation retry interval, capped at [`MAX_CREATION_RETRY_INTERVAL`]
    pub fn with_creation_retry_interval(mut self, interval: Duration) -> Self {
        self.creation_retry_interval = interval.min(MAX_CREATION_RETRY_INTERVAL);
        self
    }

    /// Attach a lifecycle observer to the pool
    pub fn with_observer(mut self, observer: Arc<dyn PoolObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Check the element bounds
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_element_count == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_element_count must be greater than zero".to_string(),
            ));
        }
        if self.min_element_count > self.max_element_count {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_element_count ({}) exceeds max_element_count ({})",
                self.min_element_count, self.max_element_count
            )));
        }
        Ok(())
    }

    /// Retry interval actually used by the pool
    pub(crate) fn effective_retry_interval(&self) -> Duration {
        self.creation_retry_interval.min(MAX_CREATION_RETRY_INTERVAL)
    }

    pub(crate) fn resolve_name(&self, fallback: impl FnOnce() -> String) -> String {
        self.name.clone().unwrap_or_else(fallback)
    }
}
