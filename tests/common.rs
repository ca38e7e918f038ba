//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;` in test
//! files.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use strata::instance::CacheInstance;
use strata::layers::remote::{RemoteShard, ShardedRemoteLayer};
use strata::layers::tiny::TinyLayer;
use strata::layers::CacheLayer;
use strata::observe::{Counter, NullTimer, RecordingCounter};
use strata::remote::{InMemoryStore, RemoteStore};
use tempfile::NamedTempFile;

/// The value type the tests cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestType {
    pub name: String,
}

pub fn test_value(name: &str) -> TestType {
    TestType {
        name: name.to_string(),
    }
}

/// A remote layer backed by an in-memory store, with its backing store.
pub fn remote_layer(
    name: &str,
    ttl: Duration,
    compression: bool,
) -> (Arc<dyn CacheLayer>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let layer = ShardedRemoteLayer::new(
        name,
        vec![RemoteShard::single(store.clone() as Arc<dyn RemoteStore>)],
        ttl,
        0,
        compression,
        Arc::new(NullTimer::new()),
    )
    .expect("remote layer must build");
    (Arc::new(layer), store)
}

/// A coordinator over the given layers with a recording hit counter.
pub fn instance_over(
    name: &str,
    layers: Vec<Arc<dyn CacheLayer>>,
    soft_ttl: Duration,
) -> (CacheInstance, Arc<RecordingCounter>) {
    let counter = Arc::new(RecordingCounter::new());
    let instance = CacheInstance::new(
        name,
        layers,
        soft_ttl,
        counter.clone() as Arc<dyn Counter>,
    )
    .expect("instance must build");
    (instance, counter)
}

/// Serialized envelope whose timestamp lies `age` in the past.
///
/// Written directly through a layer, this simulates data that has been
/// sitting in the cache without patching the clock.
pub fn back_dated_envelope<T: Serialize>(value: &T, age: Duration) -> Bytes {
    let time = Utc::now() - chrono::Duration::from_std(age).expect("age fits");
    let json = serde_json::json!({ "Time": time, "CachedObject": value });
    Bytes::from(serde_json::to_vec(&json).expect("envelope serializes"))
}

/// Poll a layer until `key` is present or the timeout elapses.
pub async fn wait_for_key(layer: &dyn CacheLayer, key: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if layer.get(key).await.is_ok() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A tiny layer as a trait object, for stacking.
pub fn tiny(name: &str) -> Arc<dyn CacheLayer> {
    Arc::new(TinyLayer::new(name, 0, false))
}

/// A tiny layer with certain amnesia, for failure injection.
pub fn flaky_tiny(name: &str) -> Arc<dyn CacheLayer> {
    Arc::new(TinyLayer::new(name, 100, false))
}

/// Write a TOML config to a temp file.
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("failed to write config");
    file
}
