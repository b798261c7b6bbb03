//! Basic usage examples for the rental pools

use esox_rentalpool::{DynamicObjectPool, PoolConfiguration, RentalPool, StaticObjectPool};
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Esox Rental Pool - Basic Examples ===\n");

    // Example 1: Static pool with integers
    static_pool();

    // Example 2: Dynamic pool with bounds
    dynamic_pool();

    // Example 3: Try methods
    try_methods();

    // Example 4: Metrics
    metrics();

    // Example 5: Shutdown
    shutdown();
}

fn static_pool() {
    println!("1. Static Pool:");
    let pool = StaticObjectPool::with_elements("integers", vec![1, 2, 3]);

    {
        let element = pool.rent().unwrap();
        println!("   Rented element: {}", *element);
        // Element automatically returned when dropped
    }

    println!("   Free after return: {}\n", pool.free_element_count());
}

fn dynamic_pool() {
    println!("2. Dynamic Pool:");

    let config = PoolConfiguration::new()
        .with_name("buffers")
        .with_min_elements(1)
        .with_max_elements(5);

    let pool = DynamicObjectPool::with_factory(|| Vec::<u8>::with_capacity(4096), config).unwrap();

    {
        let mut first = pool.rent().unwrap();
        let _second = pool.rent().unwrap();
        first.extend_from_slice(b"payload");
        println!("   Elements: {}", pool.element_count());
        println!("   Free elements: {}", pool.free_element_count());
    }

    println!("   After return - Free: {}\n", pool.free_element_count());
}

fn try_methods() {
    println!("3. Try Methods:");
    let pool = StaticObjectPool::with_elements("single", vec![42]);

    // Rent the only element
    let first = pool.try_rent(Duration::ZERO);
    assert!(first.is_some());
    println!("   First try: Success");

    // Probe again while it is rented
    let second = pool.try_rent(Duration::ZERO);
    assert!(second.is_none());
    println!("   Second try: None (pool empty)");

    drop(first);

    let third = pool.try_rent(Duration::ZERO);
    assert!(third.is_some());
    println!("   Third try: Success\n");
}

fn metrics() {
    println!("4. Metrics:");
    let pool = StaticObjectPool::with_elements("metrics", vec![1, 2, 3, 4, 5]);

    {
        let _first = pool.rent().unwrap();
        let _second = pool.rent().unwrap();

        let metrics = pool.metrics();
        println!("   Utilization: {:.1}%", metrics.utilization * 100.0);
        println!("   Rented: {}, Free: {}", metrics.rented_elements, metrics.free_element_count);
    }

    println!("\n   Metrics:");
    for (key, value) in pool.metrics().export() {
        println!("     {}: {}", key, value);
    }
    println!();
}

fn shutdown() {
    println!("5. Shutdown:");
    let pool = StaticObjectPool::with_elements("shutdown", vec!["a", "b"]);
    let held = pool.rent().unwrap();

    pool.dispose(false);
    println!("   Disposed: {}, elements still rented: {}", pool.is_disposed(), pool.element_count());

    match pool.rent() {
        Ok(_) => println!("   Unexpectedly rented after dispose"),
        Err(e) => println!("   Rent after dispose: {}", e),
    }

    drop(held);
    println!("   Elements after last release: {}", pool.element_count());
}
