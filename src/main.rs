// Esox Rental Pool
// Thread-safe, lifecycle-managed object pool
// Version 1.0.0

// This is just a binary wrapper - the actual library is in lib.rs
// Run demos with: cargo run --example basic

use std::time::Duration;

use esox_rentalpool::{DynamicObjectPool, PoolConfiguration, RentalPool, StaticObjectPool};

fn main() {
    println!("=== Esox Rental Pool v1.0.0 ===");
    println!("See the demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    println!("Quick Demo:");
    let pool = StaticObjectPool::with_elements("quick-demo", vec![1, 2, 3]);
    match pool.rent() {
        Ok(element) => println!("  Rented element: {}", *element),
        Err(error) => println!("  Rent failed: {error}"),
    }
    println!("  Free after return: {}", pool.free_element_count());

    let config = PoolConfiguration::new()
        .with_name("quick-dynamic")
        .with_max_elements(2);
    let dynamic = match DynamicObjectPool::with_factory(|| String::from("fresh"), config) {
        Ok(pool) => pool,
        Err(error) => {
            println!("  Could not create dynamic pool: {error}");
            return;
        }
    };

    let first = dynamic.try_rent(Duration::from_millis(10));
    let second = dynamic.try_rent(Duration::from_millis(10));
    let third = dynamic.try_rent(Duration::ZERO);
    println!(
        "  Dynamic pool rented {} of 3 (max 2), elements: {}",
        [&first, &second, &third].iter().filter(|g| g.is_some()).count(),
        dynamic.element_count()
    );
}
