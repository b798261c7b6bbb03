//! Async usage examples

use esox_rentalpool::{
    CancellationToken, DynamicObjectPool, PoolConfiguration, RentalPool, StaticObjectPool,
};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    println!("=== Esox Rental Pool - Async Examples ===\n");

    // Example 1: Async rent
    async_rent().await;

    // Example 2: Async with timeout
    async_with_timeout().await;

    // Example 3: Dynamic pool warm-up
    dynamic_fill().await;

    // Example 4: Concurrent access
    concurrent_access().await;

    // Example 5: Cancellation
    cancellation().await;
}

async fn async_rent() {
    println!("1. Async Rent:");
    let pool = StaticObjectPool::with_elements("async", vec![1, 2, 3]);

    {
        let element = pool.rent_async(None, CancellationToken::none()).await.unwrap();
        println!("   Rented asynchronously: {}", *element);
    }

    println!();
}

async fn async_with_timeout() {
    println!("2. Async with Timeout:");

    let pool = StaticObjectPool::with_elements("timeout", vec![42]);

    // Rent the only element
    let _element = pool.rent().unwrap();

    // Try to rent another (should time out)
    let result = pool
        .rent_async(Some(Duration::from_millis(100)), CancellationToken::none())
        .await;
    match result {
        Ok(_) => println!("   Rented element"),
        Err(e) => println!("   Error: {}", e),
    }

    println!();
}

async fn dynamic_fill() {
    println!("3. Dynamic Pool Warm-up:");

    let pool = DynamicObjectPool::with_factory(
        || {
            println!("   Creating new element...");
            42
        },
        PoolConfiguration::new().with_max_elements(10),
    )
    .unwrap();

    println!("   Filling pool with 5 elements...");
    let created = pool.fill_pool_up_to_async(5).await.unwrap();
    println!("   Created {}, free: {}", created, pool.free_element_count());

    // Rent (should not create a new one)
    {
        let element = pool.rent().unwrap();
        println!("   Rented pre-created element: {}", *element);
    }

    println!();
}

async fn concurrent_access() {
    println!("4. Concurrent Access:");

    let pool = StaticObjectPool::with_elements("shared", vec![1, 2, 3, 4, 5]);

    let mut handles = vec![];

    for i in 0..10 {
        let pool = pool.clone();
        let handle = tokio::spawn(async move {
            let rented = pool
                .rent_async(Some(Duration::from_millis(20)), CancellationToken::none())
                .await;
            match rented {
                Ok(element) => {
                    println!("   Task {} rented: {}", i, *element);
                    sleep(Duration::from_millis(50)).await;
                }
                Err(_) => println!("   Task {} couldn't rent", i),
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    println!("   Final free: {}\n", pool.free_element_count());
}

async fn cancellation() {
    println!("5. Cancellation:");

    let pool = StaticObjectPool::with_elements("cancel", vec![7]);
    let _held = pool.rent().unwrap();

    let token = CancellationToken::new();
    let waiter = {
        let pool = pool.clone();
        let token = token.clone();
        tokio::spawn(async move { pool.rent_async(None, token).await.map(|element| *element) })
    };

    sleep(Duration::from_millis(50)).await;
    token.cancel();

    match waiter.await.unwrap() {
        Ok(_) => println!("   Rented element"),
        Err(e) => println!("   Waiting rent ended: {}", e),
    }
}
