//! The process-wide observer; kept in its own test binary because it can only be set once

use esox_rentalpool::{
    DynamicObjectPool, PoolConfiguration, PoolEvent, PoolObserver, RentalPool, StaticObjectPool,
    install_global_observer,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(String, PoolEvent)>>,
}

impl Recorder {
    fn count(&self, pool: &str, event: PoolEvent) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(name, seen)| name == pool && *seen == event)
            .count()
    }
}

impl PoolObserver for Recorder {
    fn on_event(&self, pool: &str, event: PoolEvent) {
        self.events.lock().push((pool.to_string(), event));
    }
}

#[test]
fn test_global_observer_receives_lifecycle_events() {
    let global = Arc::new(Recorder::default());
    assert!(install_global_observer(global.clone()));
    assert!(!install_global_observer(Arc::new(Recorder::default())));

    let pool = StaticObjectPool::with_elements("observed", vec![1, 2]);
    drop(pool.rent().unwrap());
    assert_eq!(global.count("observed", PoolEvent::Created), 2);
    assert_eq!(global.count("observed", PoolEvent::Rented), 1);
    assert_eq!(global.count("observed", PoolEvent::Released), 1);

    // A pool-level observer takes precedence over the global one
    let local = Arc::new(Recorder::default());
    let config = PoolConfiguration::new()
        .with_name("local")
        .with_max_elements(1)
        .with_observer(local.clone());
    let dynamic = DynamicObjectPool::with_factory(|| 5u8, config).unwrap();
    let mut guard = dynamic.rent().unwrap();
    guard.invalidate();
    drop(guard);
    dynamic.dispose(true);

    assert_eq!(local.count("local", PoolEvent::Created), 1);
    assert_eq!(local.count("local", PoolEvent::Destroyed), 1);
    assert_eq!(global.count("local", PoolEvent::Created), 0);
}
