//! Multi-threaded behaviour of the pools

use esox_rentalpool::{
    CancellationToken, DynamicObjectPool, ElementManager, PoolConfiguration, PoolError,
    RentalPool, StaticObjectPool,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Tracks how many elements are alive at once
#[derive(Default)]
struct LiveCounter {
    live: AtomicUsize,
    peak: AtomicUsize,
    created: AtomicUsize,
}

#[derive(Clone, Default)]
struct TrackingManager {
    counter: Arc<LiveCounter>,
}

impl ElementManager for TrackingManager {
    type Element = usize;
    type Error = String;

    fn create(&self, _timeout: Option<Duration>, _cancel: &CancellationToken) -> Result<usize, String> {
        let live = self.counter.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counter.peak.fetch_max(live, Ordering::SeqCst);
        // Give competing renters a chance to race the slot check
        thread::yield_now();
        Ok(self.counter.created.fetch_add(1, Ordering::SeqCst))
    }

    fn destroy(&self, _element: usize) {
        self.counter.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn test_no_element_is_rented_twice() {
    const ELEMENTS: usize = 4;
    let in_use: Arc<Vec<AtomicBool>> = Arc::new((0..ELEMENTS).map(|_| AtomicBool::new(false)).collect());
    let pool = StaticObjectPool::with_elements("exclusive", 0..ELEMENTS);

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let in_use = Arc::clone(&in_use);
            thread::spawn(move || {
                for _ in 0..500 {
                    let element = pool.rent_timeout(Duration::from_secs(10)).unwrap();
                    assert!(!in_use[*element].swap(true, Ordering::SeqCst), "element {} shared", *element);
                    thread::yield_now();
                    in_use[*element].store(false, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(pool.free_element_count(), ELEMENTS);
}

#[test]
fn test_dynamic_pool_never_exceeds_max_under_load() {
    let manager = TrackingManager::default();
    let counter = Arc::clone(&manager.counter);
    let config = PoolConfiguration::new()
        .with_name("storm")
        .with_max_elements(4)
        .with_creation_retry_interval(Duration::from_millis(5))
        .without_trimming();
    let pool = DynamicObjectPool::new(manager, config).unwrap();
    let start = Arc::new(Barrier::new(16));

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..200 {
                    if let Some(element) = pool.try_rent(Duration::from_millis(50)) {
                        assert!(pool.element_count() <= 4);
                        drop(element);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert!(counter.peak.load(Ordering::SeqCst) <= 4);
    assert!(pool.element_count() <= 4);
    assert_eq!(pool.element_count(), counter.live.load(Ordering::SeqCst));
}

#[test]
fn test_every_blocked_renter_wakes_up() {
    const THREADS: usize = 16;
    let pool = StaticObjectPool::with_elements("wakeups", 0..THREADS);
    let held: Vec<_> = (0..THREADS).map(|_| pool.rent().unwrap()).collect();

    let renters: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || pool.rent_timeout(Duration::from_secs(10)).map(|element| *element))
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    drop(held);

    for renter in renters {
        assert!(renter.join().unwrap().is_ok());
    }
    assert_eq!(pool.free_element_count(), THREADS);
}

#[test]
fn test_cancel_racing_release_returns_promptly() {
    let pool = StaticObjectPool::with_elements("cancel-race", vec![1]);

    for _ in 0..100 {
        let held = pool.rent().unwrap();
        let token = CancellationToken::new();

        let renter = {
            let pool = pool.clone();
            let token = token.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let result = pool.rent_cancellable(None, &token).map(|element| *element);
                (result, started.elapsed())
            })
        };
        let releaser = thread::spawn(move || drop(held));

        token.cancel();
        releaser.join().unwrap();
        let (result, elapsed) = renter.join().unwrap();

        assert!(matches!(result, Ok(1) | Err(PoolError::Cancelled { .. })));
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(pool.free_element_count(), 1);
    }
}

#[test]
fn test_dispose_converges_with_active_renters() {
    let manager = TrackingManager::default();
    let counter = Arc::clone(&manager.counter);
    let config = PoolConfiguration::new()
        .with_name("converge")
        .with_max_elements(3)
        .with_creation_retry_interval(Duration::from_millis(5));
    let pool = DynamicObjectPool::new(manager, config).unwrap();

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || loop {
                match pool.rent() {
                    Ok(element) => {
                        thread::sleep(Duration::from_millis(1));
                        drop(element);
                    }
                    Err(error) => {
                        assert!(matches!(error, PoolError::Disposed { .. }));
                        break;
                    }
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    pool.dispose(true);

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(pool.element_count(), 0);
    assert_eq!(pool.free_element_count(), 0);
    assert_eq!(counter.live.load(Ordering::SeqCst), 0);
}

#[test]
fn test_trim_never_goes_below_minimum() {
    let config = PoolConfiguration::new()
        .with_name("floor")
        .with_min_elements(2)
        .with_max_elements(8)
        .with_trim_window(Duration::from_millis(10));
    let pool = DynamicObjectPool::with_factory(|| 0u8, config).unwrap();
    pool.fill_pool_up_to(8).unwrap();

    for _ in 0..12 {
        let element = pool.rent().unwrap();
        thread::sleep(Duration::from_millis(15));
        drop(element);
        assert!(pool.element_count() >= 2);
    }
    assert_eq!(pool.element_count(), 2);
}
