//! Advanced features: balancing, element managers, trimming, observers

use esox_rentalpool::{
    BalancingDynamicObjectPool, BalancingElementManager, CancellationToken, DynamicObjectPool,
    ElementManager, MetricsExporter, PoolConfiguration, PoolEvent, PoolObserver,
    PrometheusObserver, Ranking, RentalPool, StaticObjectPool,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Connection {
    id: usize,
    load: usize,
}

impl Connection {
    fn new(id: usize) -> Self {
        Self { id, load: 0 }
    }
}

/// Connection factory that fails every third attempt
#[derive(Default)]
struct FlakyConnector {
    attempts: AtomicUsize,
}

impl ElementManager for FlakyConnector {
    type Element = Connection;
    type Error = String;

    fn create(&self, _timeout: Option<Duration>, _cancel: &CancellationToken) -> Result<Connection, String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt % 3 == 0 {
            return Err(format!("connect attempt {} refused", attempt));
        }
        Ok(Connection::new(attempt))
    }

    fn is_valid(&self, connection: &Connection) -> bool {
        connection.load < 3
    }

    fn destroy(&self, connection: Connection) {
        println!("   Closing connection {}", connection.id);
    }
}

/// Prefers the least loaded connection and opens a new one when all are busy
#[derive(Default)]
struct LeastLoaded {
    next: AtomicUsize,
}

impl ElementManager for LeastLoaded {
    type Element = Connection;
    type Error = String;

    fn create(&self, _timeout: Option<Duration>, _cancel: &CancellationToken) -> Result<Connection, String> {
        Ok(Connection::new(self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

impl BalancingElementManager for LeastLoaded {
    fn compare(&self, candidate: &Connection, best: &Connection) -> Ranking {
        let ordering = best.load.cmp(&candidate.load);
        if candidate.load == 0 {
            // Nothing beats an idle connection
            Ranking::decisive(ordering)
        } else {
            Ranking::new(ordering)
        }
    }

    fn is_better_to_allocate_new(&self, connection: &Connection) -> bool {
        connection.load >= 2
    }
}

struct PrintingObserver;

impl PoolObserver for PrintingObserver {
    fn on_event(&self, pool: &str, event: PoolEvent) {
        if event == PoolEvent::Faulted {
            println!("   [{}] {}", pool, event);
        }
    }
}

fn main() {
    tracing_subscriber::fmt().init();

    println!("=== Esox Rental Pool - Advanced Features ===\n");

    // Example 1: Balancing static pool
    balancing_static();

    // Example 2: Element manager with failures
    element_manager();

    // Example 3: Balancing dynamic pool
    balancing_dynamic();

    // Example 4: Trimming idle elements
    trimming();

    // Example 5: Prometheus metrics
    prometheus_export();
}

fn balancing_static() {
    println!("1. Balancing Static Pool:");

    let pool: StaticObjectPool<Connection> = StaticObjectPool::balancing(
        PoolConfiguration::new().with_name("priorities"),
        |a: &Connection, b: &Connection| b.load.cmp(&a.load),
    );
    for (id, load) in [(1, 5), (2, 1), (3, 3)] {
        pool.add_element(Connection { id, load }).unwrap();
    }

    {
        let conn = pool.rent().unwrap();
        println!("   Least loaded: {:?}", *conn);
    }

    let mut conn = pool.rent().unwrap();
    pool.remove_element(&mut conn).unwrap();
    println!("   Removed one, {} left\n", pool.element_count());
}

fn element_manager() {
    println!("2. Element Manager:");

    let config = PoolConfiguration::new()
        .with_name("connections")
        .with_max_elements(4)
        .with_creation_retry_interval(Duration::from_millis(50))
        .with_observer(Arc::new(PrintingObserver));
    let pool = DynamicObjectPool::new(FlakyConnector::default(), config).unwrap();

    let created = pool.fill_pool_up_to(4).unwrap();
    println!("   Filled {} of 4 before the first failure", created);

    let mut held = Vec::new();
    for _ in 0..4 {
        match pool.rent_timeout(Duration::from_secs(1)) {
            Ok(conn) => held.push(conn),
            Err(e) => println!("   Rent failed: {}", e),
        }
    }
    println!("   Rented {}, elements: {}", held.len(), pool.element_count());

    // Overloaded connections fail validation and are closed on release
    for conn in held.iter_mut() {
        conn.load = 5;
    }
    held.clear();
    println!("   Elements after release: {}", pool.element_count());
    println!("   Faults: {}\n", pool.metrics().total_faulted);
}

fn balancing_dynamic() {
    println!("3. Balancing Dynamic Pool:");

    let pool = BalancingDynamicObjectPool::new(
        LeastLoaded::default(),
        PoolConfiguration::new().with_name("balanced").with_max_elements(3),
    )
    .unwrap();
    pool.fill_pool_up_to(1).unwrap();

    {
        let mut conn = pool.rent().unwrap();
        conn.load = 2;
    }

    // The only free connection is busy enough that a new one is opened
    let conn = pool.rent().unwrap();
    println!("   Rented connection {} (elements: {})\n", conn.id, pool.element_count());
}

fn trimming() {
    println!("4. Trimming:");

    let config = PoolConfiguration::new()
        .with_name("trimmed")
        .with_min_elements(1)
        .with_max_elements(5)
        .with_trim_window(Duration::from_millis(100));
    let pool = DynamicObjectPool::with_factory(|| Connection::new(0), config).unwrap();
    pool.fill_pool_up_to(4).unwrap();
    println!("   Elements after fill: {}", pool.element_count());

    for _ in 0..4 {
        let conn = pool.rent().unwrap();
        thread::sleep(Duration::from_millis(120));
        drop(conn);
    }
    println!("   Elements after idle windows: {}\n", pool.element_count());
}

fn prometheus_export() {
    println!("5. Prometheus Metrics Export:");

    let registry = prometheus::Registry::new();
    let observer = Arc::new(PrometheusObserver::new(&registry).unwrap());

    let pool = StaticObjectPool::with_configuration(
        PoolConfiguration::new()
            .with_name("example_pool")
            .with_observer(observer.clone()),
    );
    for value in 1..=5 {
        pool.add_element(value).unwrap();
    }

    {
        let _first = pool.rent().unwrap();
        let _second = pool.rent().unwrap();

        let mut tags = std::collections::HashMap::new();
        tags.insert("service".to_string(), "example".to_string());
        tags.insert("env".to_string(), "dev".to_string());

        let prometheus_text = MetricsExporter::export_prometheus(&pool.metrics(), pool.name(), Some(&tags));
        println!("{}", prometheus_text);
    }

    println!("   Rents counted by observer: {}", observer.count("example_pool", PoolEvent::Rented));
}
