//! # Esox Rental Pool
//!
//! Thread-safe, lifecycle-managed object pool for Rust with cancellation,
//! balancing strategies, metrics and an async adapter.
//!
//! ## Features
//!
//! - Scope-bound rentals: a [`RentGuard`] returns its element exactly once on drop
//! - Static pools filled by hand, in FIFO or best-first (balancing) order
//! - Dynamic pools that create, validate and destroy elements through an [`ElementManager`]
//! - Minimum/maximum bounds with idle trimming and creation retry back-off
//! - Cooperative cancellation and pool disposal that wake every waiting renter
//! - Lifecycle observer hooks and Prometheus metrics export
//! - Async rentals on top of tokio
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_rentalpool::{DynamicObjectPool, PoolConfiguration, RentalPool, StaticObjectPool};
//!
//! let pool = StaticObjectPool::with_elements("numbers", vec![1, 2, 3]);
//! {
//!     let number = pool.rent().unwrap();
//!     println!("Got: {}", *number);
//!     // Element automatically returned when `number` goes out of scope
//! }
//!
//! let config = PoolConfiguration::new().with_max_elements(8);
//! let buffers = DynamicObjectPool::with_factory(|| String::with_capacity(256), config).unwrap();
//! let mut buffer = buffers.rent().unwrap();
//! buffer.push_str("hello");
//! ```

mod cancellation;
mod config;
mod container;
mod deadline;
mod dynamic_pool;
mod errors;
mod guard;
mod metrics;
mod pool;
mod static_pool;
mod tracker;
mod wrapper;

pub use cancellation::{CancellationRegistration, CancellationToken, LinkedCancellation};
pub use config::{MAX_CREATION_RETRY_INTERVAL, PoolConfiguration};
pub use container::{ElementComparer, Ranking};
pub use dynamic_pool::{
    BalancingDynamicObjectPool, BalancingElementManager, DynamicObjectPool, ElementManager,
    FactoryManager,
};
pub use errors::{PoolError, PoolResult};
pub use guard::RentGuard;
#[cfg(feature = "metrics")]
pub use metrics::PrometheusObserver;
pub use metrics::{MetricsExporter, PoolEvent, PoolMetrics, PoolObserver, install_global_observer};
pub use pool::RentalPool;
pub use static_pool::StaticObjectPool;
