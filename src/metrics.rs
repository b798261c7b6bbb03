//! Lifecycle metrics and observer hooks for rental pools

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

#[cfg(feature = "metrics")]
use serde::Serialize;

/// Element lifecycle events reported to a [`PoolObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "metrics", derive(Serialize))]
pub enum PoolEvent {
    /// A new element was created or added
    Created,

    /// An element was handed to a renter
    Rented,

    /// A rented element came back to the free list
    Released,

    /// An element was destroyed
    Destroyed,

    /// Creating an element failed
    Faulted,

    /// A rent call finished without an element
    Unavailable,
}

impl PoolEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolEvent::Created => "created",
            PoolEvent::Rented => "rented",
            PoolEvent::Released => "released",
            PoolEvent::Destroyed => "destroyed",
            PoolEvent::Faulted => "faulted",
            PoolEvent::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget receiver of pool lifecycle events.
///
/// Called synchronously on the thread that caused the event, so implementations should
/// be cheap and must not call back into the pool.
pub trait PoolObserver: Send + Sync {
    fn on_event(&self, pool: &str, event: PoolEvent);
}

static GLOBAL_OBSERVER: OnceLock<Arc<dyn PoolObserver>> = OnceLock::new();

/// Install the process-wide observer used by pools that have none configured.
///
/// Only the first installation takes effect; returns `false` if one was already set.
pub fn install_global_observer(observer: Arc<dyn PoolObserver>) -> bool {
    GLOBAL_OBSERVER.set(observer).is_ok()
}

pub(crate) fn global_observer() -> Option<Arc<dyn PoolObserver>> {
    GLOBAL_OBSERVER.get().cloned()
}

/// Metrics snapshot of a pool
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{RentalPool, StaticObjectPool};
///
/// let pool = StaticObjectPool::with_elements("numbers", vec![1, 2, 3]);
///
/// {
///     let _element = pool.rent().unwrap();
///     let metrics = pool.metrics();
///     assert_eq!(metrics.total_rented, 1);
///     assert_eq!(metrics.rented_elements, 1);
/// }
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "metrics", derive(Serialize))]
pub struct PoolMetrics {
    /// Elements created or added over the pool's lifetime
    pub total_created: usize,

    /// Successful rents
    pub total_rented: usize,

    /// Elements returned to the free list
    pub total_released: usize,

    /// Elements destroyed (invalid, trimmed, removed or shut down)
    pub total_destroyed: usize,

    /// Failed creation attempts
    pub total_faulted: usize,

    /// Rent calls that ended without an element
    pub unavailable_events: usize,

    /// Elements owned by the pool, free and rented
    pub element_count: usize,

    /// Elements waiting in the free list
    pub free_element_count: usize,

    /// Elements currently held by renters
    pub rented_elements: usize,

    /// Upper bound of the pool, if it has one
    pub max_element_count: Option<usize>,

    /// Rented share of the capacity (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_rented".to_string(), self.total_rented.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_faulted".to_string(), self.total_faulted.to_string());
        metrics.insert("unavailable_events".to_string(), self.unavailable_events.to_string());
        metrics.insert("element_count".to_string(), self.element_count.to_string());
        metrics.insert("free_element_count".to_string(), self.free_element_count.to_string());
        metrics.insert("rented_elements".to_string(), self.rented_elements.to_string());
        if let Some(max) = self.max_element_count {
            metrics.insert("max_element_count".to_string(), max.to_string());
        }
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_rentalpool::{MetricsExporter, RentalPool, StaticObjectPool};
    /// use std::collections::HashMap;
    ///
    /// let pool = StaticObjectPool::with_elements("numbers", vec![1, 2, 3]);
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), pool.name(), Some(&tags));
    /// assert!(output.contains("rentalpool_elements_free"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        Self::write_metric(&mut output, "rentalpool_elements", "gauge", "Elements owned by the pool", &labels, metrics.element_count);
        Self::write_metric(&mut output, "rentalpool_elements_free", "gauge", "Elements in the free list", &labels, metrics.free_element_count);
        Self::write_metric(&mut output, "rentalpool_elements_rented", "gauge", "Elements held by renters", &labels, metrics.rented_elements);

        output.push_str("# HELP rentalpool_utilization Pool utilization ratio\n");
        output.push_str("# TYPE rentalpool_utilization gauge\n");
        let _ = writeln!(output, "rentalpool_utilization{{{labels}}} {:.2}", metrics.utilization);

        // Counter metrics
        Self::write_metric(&mut output, "rentalpool_created_total", "counter", "Elements created", &labels, metrics.total_created);
        Self::write_metric(&mut output, "rentalpool_rented_total", "counter", "Successful rents", &labels, metrics.total_rented);
        Self::write_metric(&mut output, "rentalpool_released_total", "counter", "Elements released", &labels, metrics.total_released);
        Self::write_metric(&mut output, "rentalpool_destroyed_total", "counter", "Elements destroyed", &labels, metrics.total_destroyed);
        Self::write_metric(&mut output, "rentalpool_faulted_total", "counter", "Failed element creations", &labels, metrics.total_faulted);
        Self::write_metric(&mut output, "rentalpool_unavailable_total", "counter", "Rents without an element", &labels, metrics.unavailable_events);

        output
    }

    fn write_metric(output: &mut String, name: &str, kind: &str, help: &str, labels: &str, value: usize) {
        let _ = writeln!(output, "# HELP {name} {help}");
        let _ = writeln!(output, "# TYPE {name} {kind}");
        let _ = writeln!(output, "{name}{{{labels}}} {value}");
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker; also forwards every event to the pool's observer
pub(crate) struct MetricsTracker {
    total_created: AtomicUsize,
    total_rented: AtomicUsize,
    total_released: AtomicUsize,
    total_destroyed: AtomicUsize,
    total_faulted: AtomicUsize,
    unavailable_events: AtomicUsize,
    observer: Option<Arc<dyn PoolObserver>>,
}

impl MetricsTracker {
    pub fn new(observer: Option<Arc<dyn PoolObserver>>) -> Self {
        Self {
            total_created: AtomicUsize::new(0),
            total_rented: AtomicUsize::new(0),
            total_released: AtomicUsize::new(0),
            total_destroyed: AtomicUsize::new(0),
            total_faulted: AtomicUsize::new(0),
            unavailable_events: AtomicUsize::new(0),
            observer: observer.or_else(global_observer),
        }
    }

    pub fn record(&self, pool: &str, event: PoolEvent) {
        let counter = match event {
            PoolEvent::Created => &self.total_created,
            PoolEvent::Rented => &self.total_rented,
            PoolEvent::Released => &self.total_released,
            PoolEvent::Destroyed => &self.total_destroyed,
            PoolEvent::Faulted => &self.total_faulted,
            PoolEvent::Unavailable => &self.unavailable_events,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(observer) = &self.observer {
            observer.on_event(pool, event);
        }
    }

    pub fn get_metrics(
        &self,
        element_count: usize,
        free_element_count: usize,
        max_element_count: Option<usize>,
    ) -> PoolMetrics {
        let rented_elements = element_count.saturating_sub(free_element_count);
        let capacity = max_element_count.unwrap_or(element_count);
        let utilization = if capacity > 0 {
            rented_elements as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_rented: self.total_rented.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_faulted: self.total_faulted.load(Ordering::Relaxed),
            unavailable_events: self.unavailable_events.load(Ordering::Relaxed),
            element_count,
            free_element_count,
            rented_elements,
            max_element_count,
            utilization,
        }
    }
}

impl fmt::Debug for MetricsTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsTracker")
            .field("total_created", &self.total_created)
            .field("total_rented", &self.total_rented)
            .field("total_released", &self.total_released)
            .field("total_destroyed", &self.total_destroyed)
            .field("total_faulted", &self.total_faulted)
            .field("unavailable_events", &self.unavailable_events)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Observer that counts lifecycle events in a Prometheus registry
///
/// # Examples
///
/// ```
/// use esox_rentalpool::{PoolConfiguration, PoolEvent, PrometheusObserver, RentalPool, StaticObjectPool};
/// use std::sync::Arc;
///
/// let registry = prometheus::Registry::new();
/// let observer = Arc::new(PrometheusObserver::new(&registry).unwrap());
///
/// let config = PoolConfiguration::new().with_name("numbers").with_observer(observer.clone());
/// let pool = StaticObjectPool::with_configuration(config);
/// pool.add_element(1).unwrap();
/// drop(pool.rent().unwrap());
///
/// assert_eq!(observer.count("numbers", PoolEvent::Rented), 1);
/// assert_eq!(observer.count("numbers", PoolEvent::Released), 1);
/// ```
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct PrometheusObserver {
    events: prometheus::IntCounterVec,
}

#[cfg(feature = "metrics")]
impl PrometheusObserver {
    /// Create the event counter and register it with `registry`
    pub fn new(registry: &prometheus::Registry) -> Result<Self, prometheus::Error> {
        let events = prometheus::IntCounterVec::new(
            prometheus::Opts::new(
                "rentalpool_lifecycle_events_total",
                "Element lifecycle events per pool",
            ),
            &["pool", "event"],
        )?;
        registry.register(Box::new(events.clone()))?;
        Ok(Self { events })
    }

    /// Current count of `event` for `pool`
    pub fn count(&self, pool: &str, event: PoolEvent) -> u64 {
        self.events.with_label_values(&[pool, event.as_str()]).get()
    }
}

#[cfg(feature = "metrics")]
impl PoolObserver for PrometheusObserver {
    fn on_event(&self, pool: &str, event: PoolEvent) {
        self.events.with_label_values(&[pool, event.as_str()]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<(String, PoolEvent)>>,
    }

    impl PoolObserver for RecordingObserver {
        fn on_event(&self, pool: &str, event: PoolEvent) {
            self.events.lock().push((pool.to_string(), event));
        }
    }

    #[test]
    fn test_tracker_counts_and_forwards() {
        let observer = Arc::new(RecordingObserver::default());
        let tracker = MetricsTracker::new(Some(observer.clone()));

        tracker.record("p", PoolEvent::Created);
        tracker.record("p", PoolEvent::Rented);
        tracker.record("p", PoolEvent::Rented);

        let metrics = tracker.get_metrics(4, 1, Some(8));
        assert_eq!(metrics.total_created, 1);
        assert_eq!(metrics.total_rented, 2);
        assert_eq!(metrics.rented_elements, 3);
        assert!((metrics.utilization - 0.375).abs() < f64::EPSILON);

        let events = observer.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ("p".to_string(), PoolEvent::Created));
    }

    #[test]
    fn test_export_contains_all_keys() {
        let tracker = MetricsTracker::new(None);
        let exported = tracker.get_metrics(2, 2, None).export();
        assert_eq!(exported.get("element_count").map(String::as_str), Some("2"));
        assert_eq!(exported.get("utilization").map(String::as_str), Some("0.00"));
        assert!(!exported.contains_key("max_element_count"));
    }

    #[test]
    fn test_prometheus_text_format() {
        let tracker = MetricsTracker::new(None);
        tracker.record("db", PoolEvent::Faulted);
        let text = MetricsExporter::export_prometheus(&tracker.get_metrics(1, 0, Some(1)), "db", None);
        assert!(text.contains("# TYPE rentalpool_faulted_total counter"));
        assert!(text.contains("rentalpool_faulted_total{pool=\"db\"} 1"));
        assert!(text.contains("rentalpool_utilization{pool=\"db\"} 1.00"));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_observer_counts() {
        let registry = prometheus::Registry::new();
        let observer = PrometheusObserver::new(&registry).unwrap();
        observer.on_event("db", PoolEvent::Created);
        observer.on_event("db", PoolEvent::Created);
        assert_eq!(observer.count("db", PoolEvent::Created), 2);
        assert_eq!(observer.count("db", PoolEvent::Destroyed), 0);
        assert!(!registry.gather().is_empty());
    }
}
