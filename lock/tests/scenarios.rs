use chrono::Utc;
use leasekeeper_lock::{
    codec,
    test_utils::{memory_lock, FlakyStore, TEST_KEY},
    DistributedLock, Error, InMemoryStore, LeaseRecord, LockOptions, ResourceLock,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test(start_paused = true)]
async fn test_absent_key_then_create_then_rival_create_fails() {
    let store = Arc::new(InMemoryStore::new());
    let p1 = memory_lock(&store, "p1");
    let p2 = memory_lock(&store, "p2");
    let cancel = CancellationToken::new();

    let err = p1.get(&cancel).await.unwrap_err();
    assert!(err.is_not_found());

    let record = LeaseRecord::acquired_by("p1", 15, Utc::now());
    p1.create(&cancel, &record).await.unwrap();

    let rival = LeaseRecord::acquired_by("p2", 15, Utc::now());
    let err = p2.create(&cancel, &rival).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));

    let (stored, _) = p2.get(&cancel).await.unwrap();
    assert_eq!(stored, record);
}

#[tokio::test(start_paused = true)]
async fn test_only_holder_can_update() {
    let store = Arc::new(InMemoryStore::new());
    let p1 = memory_lock(&store, "p1");
    let p2 = memory_lock(&store, "p2");
    let cancel = CancellationToken::new();

    let record = LeaseRecord::acquired_by("p1", 15, Utc::now());
    p1.create(&cancel, &record).await.unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(store.remaining_ttl(TEST_KEY), Some(Duration::from_secs(5)));

    let (_, before) = p1.get(&cancel).await.unwrap();
    let stolen = record.successor("p2", 15, Utc::now());
    let err = p2.update(&cancel, &stolen).await.unwrap_err();
    assert!(matches!(err, Error::NotHolder { .. }));
    let (_, after) = p1.get(&cancel).await.unwrap();
    assert_eq!(before, after, "a rejected update must leave the value untouched");

    let renewed = record.successor("p1", 15, Utc::now());
    p1.update(&cancel, &renewed).await.unwrap();
    assert_eq!(store.remaining_ttl(TEST_KEY), Some(Duration::from_secs(15)));
}

#[tokio::test(start_paused = true)]
async fn test_unrenewed_lease_is_evicted_and_reacquired() {
    let store = Arc::new(InMemoryStore::new());
    let p1 = memory_lock(&store, "p1");
    let p2 = memory_lock(&store, "p2");
    let cancel = CancellationToken::new();

    p1.create(&cancel, &LeaseRecord::acquired_by("p1", 2, Utc::now()))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(1999)).await;
    assert!(p2.get(&cancel).await.is_ok());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(p2.get(&cancel).await.unwrap_err().is_not_found());

    p2.create(&cancel, &LeaseRecord::acquired_by("p2", 2, Utc::now()))
        .await
        .unwrap();
    let (record, _) = p1.get(&cancel).await.unwrap();
    assert_eq!(record.holder_identity, "p2");
}

#[tokio::test(start_paused = true)]
async fn test_vacant_record_accepts_any_identity() {
    let store = Arc::new(InMemoryStore::new());
    let p1 = memory_lock(&store, "p1");
    let p2 = memory_lock(&store, "p2");
    let cancel = CancellationToken::new();

    let held = LeaseRecord::acquired_by("p1", 15, Utc::now());
    p1.create(&cancel, &held).await.unwrap();
    let vacant = held.released(Utc::now());
    p1.update(&cancel, &vacant).await.unwrap();
    assert_eq!(store.remaining_ttl(TEST_KEY), Some(Duration::from_secs(1)));

    let (observed, _) = p2.get(&cancel).await.unwrap();
    assert!(observed.is_vacant());

    let taken = observed.successor("p2", 15, Utc::now());
    p2.update(&cancel, &taken).await.unwrap();

    let (record, _) = p1.get(&cancel).await.unwrap();
    assert_eq!(record.holder_identity, "p2");
    assert_eq!(record.leader_transitions, 1);

    let err = p1.update(&cancel, &record.successor("p1", 15, Utc::now())).await.unwrap_err();
    assert!(matches!(err, Error::NotHolder { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_self_update_only_moves_epoch() {
    let store = Arc::new(InMemoryStore::new());
    let p1 = memory_lock(&store, "p1");
    let cancel = CancellationToken::new();

    let record = LeaseRecord::acquired_by("p1", 15, Utc::now());
    p1.create(&cancel, &record).await.unwrap();
    let (_, raw0) = p1.get(&cancel).await.unwrap();

    p1.update(&cancel, &record).await.unwrap();
    let (_, raw1) = p1.get(&cancel).await.unwrap();
    tokio::time::advance(Duration::from_secs(3)).await;
    p1.update(&cancel, &record).await.unwrap();
    let (_, raw2) = p1.get(&cancel).await.unwrap();

    let states: Vec<_> = [raw0, raw1, raw2]
        .iter()
        .map(|raw| codec::decode(raw).unwrap())
        .collect();
    for state in &states {
        assert_eq!(state.record, record);
    }
    let epochs: Vec<i64> = states.iter().map(|s| s.epoch.parse().unwrap()).collect();
    assert!(epochs[0] < epochs[1] && epochs[1] < epochs[2]);
    assert_eq!(store.remaining_ttl(TEST_KEY), Some(Duration::from_secs(15)));
}

#[tokio::test(start_paused = true)]
async fn test_update_after_eviction_is_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let p1 = memory_lock(&store, "p1");
    let cancel = CancellationToken::new();

    let record = LeaseRecord::acquired_by("p1", 1, Utc::now());
    p1.create(&cancel, &record).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;

    let err = p1.update(&cancel, &record).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_corrupt_value_surfaces_as_transport() {
    let store = Arc::new(InMemoryStore::new());
    store.put(TEST_KEY, b"{not json", Duration::from_secs(5));
    let p1 = memory_lock(&store, "p1");
    let cancel = CancellationToken::new();

    assert!(p1.get(&cancel).await.unwrap_err().is_transport());
    let record = LeaseRecord::acquired_by("p1", 5, Utc::now());
    assert!(p1.update(&cancel, &record).await.unwrap_err().is_transport());
}

#[tokio::test]
async fn test_transport_errors_propagate_without_retry() {
    init_tracing();
    let flaky = Arc::new(FlakyStore::new(Arc::new(InMemoryStore::new())));
    let p1 = DistributedLock::new(flaky.clone(), TEST_KEY, "p1", LockOptions::default()).unwrap();
    let cancel = CancellationToken::new();
    let record = LeaseRecord::acquired_by("p1", 15, Utc::now());

    flaky.fail_next(1);
    assert!(p1.create(&cancel, &record).await.unwrap_err().is_transport());
    assert_eq!(flaky.calls(), 1);

    p1.create(&cancel, &record).await.unwrap();
    assert_eq!(flaky.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_hits_deadline() {
    init_tracing();
    let flaky = Arc::new(
        FlakyStore::new(Arc::new(InMemoryStore::new())).with_latency(Duration::from_secs(30)),
    );
    let options = LockOptions {
        op_timeout: Duration::from_secs(1),
        ..LockOptions::default()
    };
    let p1 = DistributedLock::new(flaky, TEST_KEY, "p1", options).unwrap();
    let cancel = CancellationToken::new();

    let err = p1.get(&cancel).await.unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_flight_is_not_success() {
    let inner = Arc::new(InMemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(inner.clone()).with_latency(Duration::from_secs(2)));
    let p1 = DistributedLock::new(flaky, TEST_KEY, "p1", LockOptions::default()).unwrap();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let record = LeaseRecord::acquired_by("p1", 15, Utc::now());
    let err = p1.create(&cancel, &record).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(inner.remaining_ttl(TEST_KEY).is_none());
}
