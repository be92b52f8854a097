//! Subscriber ordering guarantees under rapid version transitions.

use crate::config::{ManagerConfig, RetryConfig};
use crate::manager::ConfigManager;
use crate::store::memory::InMemoryConfigStore;
use crate::store::typed::{Mutation, TypedConfigStore};
use crate::store::version::ConfigVersion;
use crate::store::ConfigKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Counter {
    value: u64,
}

fn fast_settings() -> ManagerConfig {
    ManagerConfig {
        ready_deadline: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        subscriber_queue_depth: 32,
    }
}

async fn started_manager(store: Arc<InMemoryConfigStore>) -> ConfigManager<Counter> {
    let typed = TypedConfigStore::<Counter>::new(
        store.clone(),
        ConfigKey::from("counter"),
        RetryConfig::fast_for_tests(),
    );
    // Seed only once; later managers reuse the existing key.
    let _ = typed.create(&Counter { value: 0 }).await;

    let mgr = ConfigManager::new(
        store,
        ConfigKey::from("counter"),
        RetryConfig::fast_for_tests(),
        fast_settings(),
    );
    mgr.start().await.unwrap();
    mgr
}

#[tokio::test]
async fn test_subscriber_sees_versions_in_order() {
    let store = Arc::new(InMemoryConfigStore::new());
    let mgr = started_manager(store).await;
    let mut sub = mgr.subscribe();

    // Rapid successive updates.
    for _ in 0..5 {
        mgr.update(
            |c| Mutation::Update(Counter { value: c.value + 1 }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    }

    // Every accepted transition arrives, in exact version order.
    for expected in 2..=6u64 {
        let event = sub.next().await.unwrap();
        assert_eq!(event.version, ConfigVersion::new(expected));
        assert_eq!(event.value.value, expected - 1);
    }

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_two_subscribers_see_identical_sequences() {
    let store = Arc::new(InMemoryConfigStore::new());
    let mgr = started_manager(store).await;
    let mut a = mgr.subscribe();
    let mut b = mgr.subscribe();

    for _ in 0..3 {
        mgr.update(
            |c| Mutation::Update(Counter { value: c.value + 1 }),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    }

    for expected in 2..=4u64 {
        assert_eq!(a.next().await.unwrap().version, ConfigVersion::new(expected));
        assert_eq!(b.next().await.unwrap().version, ConfigVersion::new(expected));
    }

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_ends_subscriptions() {
    let store = Arc::new(InMemoryConfigStore::new());
    let mgr = started_manager(store).await;
    let mut sub = mgr.subscribe();

    mgr.shutdown().await;
    assert!(sub.next().await.is_none());
}

#[tokio::test]
async fn test_exactly_one_event_per_accepted_version() {
    let store = Arc::new(InMemoryConfigStore::new());
    let mgr = started_manager(store).await;
    let mut sub = mgr.subscribe();

    mgr.update(
        |c| Mutation::Update(Counter { value: c.value + 1 }),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    // A NoChange proposal must not produce a notification.
    mgr.update(|_| Mutation::<Counter>::NoChange, Duration::from_secs(1)).await.unwrap();

    let first = sub.next().await.unwrap();
    assert_eq!(first.version, ConfigVersion::new(2));
    assert!(sub.try_next().is_none());

    mgr.shutdown().await;
}
