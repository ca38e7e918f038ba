//! Coordinator behavior: read walk, back-fill, staleness, fan-out.

mod common;

use common::*;
use std::time::Duration;
use strata::layers::CacheLayer;
use strata::StrataError;

const SOFT_TTL: Duration = Duration::from_secs(10);
const HARD_TTL: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn basic_round_trip_through_a_remote_layer() {
    let (layer, _store) = remote_layer("user-redis", HARD_TTL, false);
    let (instance, _counter) = instance_over("result", vec![layer], SOFT_TTL);

    instance.set("k1", &test_value("alice")).await.unwrap();

    let out: TestType = instance.get("k1").await.unwrap();
    assert_eq!(out.name, "alice");

    let (out, should_update) = instance
        .get_and_should_update::<TestType>("k1")
        .await
        .unwrap();
    assert_eq!(out.name, "alice");
    assert!(!should_update, "fresh data must not ask for a refresh");
}

#[tokio::test]
async fn data_older_than_the_soft_ttl_asks_for_a_refresh() {
    let (layer, _store) = remote_layer("user-redis", HARD_TTL, false);
    let stale = back_dated_envelope(&test_value("alice"), Duration::from_secs(3 * 3600));
    layer.set("k1", stale).await.unwrap();

    let (instance, _counter) = instance_over("result", vec![layer], SOFT_TTL);

    let (out, should_update) = instance
        .get_and_should_update::<TestType>("k1")
        .await
        .unwrap();
    assert_eq!(out.name, "alice");
    assert!(should_update, "three-hour-old data must ask for a refresh");
}

#[tokio::test]
async fn staleness_boundary_sits_at_the_soft_ttl() {
    let soft_ttl = Duration::from_secs(3600);
    let (layer, _store) = remote_layer("r", HARD_TTL, false);
    let (instance, _counter) = instance_over("result", vec![layer.clone()], soft_ttl);

    // Comfortably inside the soft TTL.
    layer
        .set(
            "young",
            back_dated_envelope(&test_value("y"), Duration::from_secs(1800)),
        )
        .await
        .unwrap();
    // Comfortably past it.
    layer
        .set(
            "old",
            back_dated_envelope(&test_value("o"), Duration::from_secs(3700)),
        )
        .await
        .unwrap();

    assert!(!instance.should_update("young").await.unwrap());
    assert!(instance.should_update("old").await.unwrap());
}

#[tokio::test]
async fn absent_keys_should_be_refreshed() {
    let (layer, _store) = remote_layer("r", HARD_TTL, false);
    let (instance, _counter) = instance_over("result", vec![layer], SOFT_TTL);

    assert!(instance.should_update("never-written").await.unwrap());
}

#[tokio::test]
async fn hit_at_a_lower_layer_back_fills_the_upper_layers() {
    let mem = tiny("mem");
    let (remote, _store) = remote_layer("redis", HARD_TTL, true);
    let (instance, counter) =
        instance_over("result", vec![mem.clone(), remote.clone()], SOFT_TTL);

    // Value exists only at the remote layer; the coordinator was bypassed.
    let envelope = back_dated_envelope(&test_value("alice"), Duration::ZERO);
    remote.set("k", envelope.clone()).await.unwrap();

    let out: TestType = instance.get("k").await.unwrap();
    assert_eq!(out.name, "alice");
    assert_eq!(counter.count_of(&["result", "layer1"]), 1);

    assert!(
        wait_for_key(mem.as_ref(), "k", Duration::from_millis(500)).await,
        "the hit must be promoted into the memory layer"
    );
    // The promoted envelope preserves the original timestamp bytes.
    assert_eq!(&mem.get("k").await.unwrap()[..], &envelope[..]);

    // Served from layer 0 now.
    let _: TestType = instance.get("k").await.unwrap();
    assert_eq!(counter.count_of(&["result", "layer0"]), 1);
}

#[tokio::test]
async fn a_full_miss_counts_once_and_returns_not_found() {
    let (layer, _store) = remote_layer("r", HARD_TTL, false);
    let (instance, counter) = instance_over("result", vec![layer], SOFT_TTL);

    match instance.get::<TestType>("never-written").await {
        Err(StrataError::NotFound) => {}
        other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
    }
    assert_eq!(counter.count_of(&["result", "miss"]), 1);
}

#[tokio::test]
async fn partial_write_failure_names_the_failing_layer() {
    let ok = tiny("mem");
    let flaky = flaky_tiny("flaky");
    let (instance, _counter) = instance_over("result", vec![ok.clone(), flaky], SOFT_TTL);

    match instance.set("k", &test_value("v")).await {
        Err(StrataError::PartialFailure { op, details }) => {
            assert_eq!(op, "set");
            assert!(details.contains("flaky"), "details were: {}", details);
            assert!(!details.contains("mem:"), "details were: {}", details);
        }
        other => panic!("expected a joined error, got {:?}", other),
    }

    // The healthy layer still took the write.
    let out: TestType = instance.get("k").await.unwrap();
    assert_eq!(out.name, "v");
}

#[tokio::test]
async fn fan_out_write_reaches_every_layer() {
    let a = tiny("a");
    let b = tiny("b");
    let (instance, _counter) = instance_over("result", vec![a.clone(), b.clone()], SOFT_TTL);

    instance.set("k", &test_value("v")).await.unwrap();

    for layer in [&a, &b] {
        let bytes = layer.get("k").await.unwrap();
        let decoded = strata::envelope::decode(&bytes).unwrap();
        let value: TestType = decoded.decode_object().unwrap();
        assert_eq!(value.name, "v");
    }
}

#[tokio::test]
async fn null_values_are_rejected_before_any_layer_is_touched() {
    let a = tiny("a");
    let b = tiny("b");
    let (instance, _counter) = instance_over("result", vec![a.clone(), b.clone()], SOFT_TTL);

    match instance.set::<Option<TestType>>("k", &None).await {
        Err(StrataError::NilValue) => {}
        other => panic!("expected NilValue, got {:?}", other),
    }
    assert!(matches!(a.get("k").await, Err(StrataError::KeyAbsent)));
    assert!(matches!(b.get("k").await, Err(StrataError::KeyAbsent)));
}

#[tokio::test]
async fn delete_fans_out_and_ignores_absent_keys() {
    let a = tiny("a");
    let b = tiny("b");
    let (instance, _counter) = instance_over("result", vec![a.clone(), b.clone()], SOFT_TTL);

    instance.set("k", &test_value("v")).await.unwrap();
    instance.delete("k").await.unwrap();
    assert!(matches!(a.get("k").await, Err(StrataError::KeyAbsent)));
    assert!(matches!(b.get("k").await, Err(StrataError::KeyAbsent)));

    // Deleting a key that was never written is fine.
    instance.delete("never-written").await.unwrap();
}

#[tokio::test]
async fn flush_wipes_exactly_one_layer() {
    let a = tiny("a");
    let b = tiny("b");
    let (instance, _counter) = instance_over("result", vec![a.clone(), b.clone()], SOFT_TTL);

    instance.set("k", &test_value("v")).await.unwrap();
    instance.flush("a").await.unwrap();

    assert!(matches!(a.get("k").await, Err(StrataError::KeyAbsent)));
    assert!(b.get("k").await.is_ok(), "other layers keep their contents");

    match instance.flush("no-such-layer").await {
        Err(StrataError::LayerNotFound(name)) => assert_eq!(name, "no-such-layer"),
        other => panic!("expected LayerNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn ttl_reports_the_first_layer_with_a_lifetime() {
    let mem = tiny("mem");
    let (remote, _store) = remote_layer("redis", HARD_TTL, false);
    let (instance, _counter) = instance_over("result", vec![mem, remote], SOFT_TTL);

    instance.set("k", &test_value("v")).await.unwrap();

    let (index, remaining) = instance.ttl("k").await.expect("remote layer tracks TTLs");
    assert_eq!(index, 1, "the tiny layer does not track lifetimes");
    assert!(remaining > Duration::from_secs(3500));

    assert!(instance.ttl("never-written").await.is_none());
}

#[tokio::test]
async fn hotness_buckets_follow_the_data_age() {
    let soft_ttl = Duration::from_secs(600);
    let (layer, _store) = remote_layer("r", HARD_TTL, false);
    let (instance, counter) = instance_over("result", vec![layer.clone()], soft_ttl);

    let cases = [
        ("fresh", Duration::ZERO),
        ("aging", Duration::from_secs(900)), // past the soft TTL, within twice it
        ("ancient", Duration::from_secs(1800)), // past twice the soft TTL
    ];
    for (key, age) in cases {
        layer
            .set(key, back_dated_envelope(&test_value(key), age))
            .await
            .unwrap();
        let _ = instance.get_and_should_update::<TestType>(key).await.unwrap();
    }

    assert_eq!(counter.count_of(&["result-hotness", "hot"]), 1);
    assert_eq!(counter.count_of(&["result-hotness", "warm"]), 1);
    assert_eq!(counter.count_of(&["result-hotness", "cold"]), 1);
}

#[tokio::test]
async fn certain_amnesia_surfaces_from_writes_and_hides_reads() {
    let flaky = flaky_tiny("flaky");
    let (instance, counter) = instance_over("result", vec![flaky.clone()], SOFT_TTL);

    // The layer itself reports amnesia on every operation.
    assert!(matches!(
        flaky.get("k").await,
        Err(StrataError::Amnesia { chance: 100 })
    ));

    // Fan-out writes and deletes surface it as the joined error.
    match instance.set("k", &test_value("v")).await {
        Err(StrataError::PartialFailure { details, .. }) => {
            assert!(details.contains("amnesia"), "details were: {}", details)
        }
        other => panic!("expected a joined error, got {:?}", other),
    }
    match instance.delete("k").await {
        Err(StrataError::PartialFailure { details, .. }) => {
            assert!(details.contains("amnesia"), "details were: {}", details)
        }
        other => panic!("expected a joined error, got {:?}", other),
    }

    // The read walk treats the injected failure like any other layer error:
    // the walk moves on and the caller sees a miss.
    assert!(matches!(
        instance.get::<TestType>("k").await,
        Err(StrataError::NotFound)
    ));
    assert_eq!(counter.count_of(&["result", "miss"]), 1);
}

#[tokio::test]
async fn a_null_object_portion_is_a_nil_cache_error() {
    let (layer, store) = remote_layer("r", HARD_TTL, false);
    store.insert_raw(
        "k",
        bytes::Bytes::from_static(br#"{"Time":"2024-01-01T00:00:00Z","CachedObject":null}"#),
    );
    let (instance, _counter) = instance_over("result", vec![layer], SOFT_TTL);

    assert!(matches!(
        instance.get::<TestType>("k").await,
        Err(StrataError::NilCache)
    ));
    assert!(matches!(
        instance.should_update("k").await,
        Err(StrataError::NilCache)
    ));
}

#[tokio::test]
async fn undecodable_entries_do_not_stop_the_walk() {
    let (broken, broken_store) = remote_layer("broken", HARD_TTL, false);
    broken_store.insert_raw("k", bytes::Bytes::from_static(b"garbage"));

    let good = tiny("good");
    good.set("k", back_dated_envelope(&test_value("v"), Duration::ZERO))
        .await
        .unwrap();

    let (instance, counter) = instance_over("result", vec![broken, good], SOFT_TTL);

    let out: TestType = instance.get("k").await.unwrap();
    assert_eq!(out.name, "v");
    assert_eq!(counter.count_of(&["result", "layer1"]), 1);
}

#[tokio::test]
async fn remote_writes_keep_the_first_value_within_the_hard_ttl_window() {
    // Stack of two remote layers. A hit at the lower layer back-fills the
    // upper one; a later application-level set must not overwrite either
    // copy, because remote writes are set-if-absent.
    let (upper, _upper_store) = remote_layer("upper", HARD_TTL, false);
    let (lower, _lower_store) = remote_layer("lower", HARD_TTL, false);

    let original = back_dated_envelope(&test_value("original"), Duration::from_secs(60));
    lower.set("k", original.clone()).await.unwrap();

    let (instance, _counter) =
        instance_over("result", vec![upper.clone(), lower.clone()], SOFT_TTL);

    let out: TestType = instance.get("k").await.unwrap();
    assert_eq!(out.name, "original");
    assert!(
        wait_for_key(upper.as_ref(), "k", Duration::from_millis(500)).await,
        "the hit must be back-filled into the upper layer"
    );

    // The application tries to refresh the key. On remote layers the first
    // writer wins until the hard TTL evicts the entry.
    instance.set("k", &test_value("replacement")).await.unwrap();

    for layer in [&upper, &lower] {
        assert_eq!(&layer.get("k").await.unwrap()[..], &original[..]);
    }
    let out: TestType = instance.get("k").await.unwrap();
    assert_eq!(out.name, "original");
}
