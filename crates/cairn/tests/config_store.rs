// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Replicated configuration across two processes sharing one store.

use std::{sync::Arc, time::Duration};

use cairn::{
    BusOptions, ConfigStoreOptions, Context, Endpoint, EndpointPool, ErrorKind, InvalidationBus, REMOVED_CHANNEL,
    ReplicatedConfigStore, TieredCache, TieredCacheOptions, Topology,
};
use cairn_store::testing::{InMemoryStore, StoreOp};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tick::Clock;

type Node = ReplicatedConfigStore<InMemoryStore>;

fn node(store: &InMemoryStore) -> Node {
    let mut pool = EndpointPool::new("main");
    pool.add_write(Endpoint::new("main:write", store.clone())).expect("write");
    let ctx = Context::new(Topology::single(pool), Clock::new_tokio());

    let cache = TieredCache::new(ctx.clone(), TieredCacheOptions::default());
    let bus = InvalidationBus::start(ctx, BusOptions::default()).expect("bus");
    ReplicatedConfigStore::start(cache, bus, ConfigStoreOptions::default()).expect("config store")
}

async fn ready_pair(store: &InMemoryStore) -> (Node, Node) {
    let a = node(store);
    let b = node(store);
    a.bus().ready().await.expect("ready");
    b.bus().ready().await.expect("ready");
    (a, b)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(condition(), "condition not reached in time");
}

#[tokio::test]
async fn change_on_one_node_invalidates_the_other() {
    let store = InMemoryStore::new();
    let (a, b) = ready_pair(&store).await;

    a.set("limit", &10_u32, false).await.expect("set");
    assert_eq!(*b.get::<u32>("limit").await.expect("get").value(), 10);
    assert!(b.cache().near().contains("limit"));

    a.set("limit", &20_u32, true).await.expect("set");
    eventually(|| !b.cache().near().contains("limit")).await;
    assert_eq!(*b.get::<u32>("limit").await.expect("get").value(), 20);

    // The originating node keeps its fresh copy.
    assert!(a.cache().near().contains("limit"));
}

#[tokio::test]
async fn unbroadcast_change_leaves_other_copies_alone() {
    let store = InMemoryStore::new();
    let (a, b) = ready_pair(&store).await;

    a.set("mode", &"blue".to_owned(), false).await.expect("set");
    assert_eq!(b.get::<String>("mode").await.expect("get").value(), "blue");

    a.set("mode", &"green".to_owned(), false).await.expect("set");
    assert_eq!(b.get::<String>("mode").await.expect("get").value(), "blue");
    assert_eq!(a.get::<String>("mode").await.expect("get").value(), "green");
}

#[tokio::test]
async fn removal_is_announced_exactly_once() {
    let store = InMemoryStore::new();
    let (a, b) = ready_pair(&store).await;

    a.set("flag", &true, false).await.expect("set");
    b.get::<bool>("flag").await.expect("get");
    assert!(b.cache().near().contains("flag"));

    assert!(a.remove("flag", true).await.expect("remove"));
    eventually(|| !b.cache().near().contains("flag")).await;
    assert!(!b.get::<bool>("flag").await.expect("get").exists());

    // Give any re-announcement time to show up before counting.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let announcements = store
        .operations()
        .iter()
        .filter(|op| matches!(op, StoreOp::Publish { channel, .. } if channel == REMOVED_CHANNEL))
        .count();
    assert_eq!(announcements, 1);
}

#[tokio::test]
async fn watchers_learn_the_origin_of_a_change() {
    let store = InMemoryStore::new();
    let (a, b) = ready_pair(&store).await;

    let origins = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&origins);
    b.watch("limit", move |origin| sink.lock().push(origin.to_owned())).expect("watch");
    b.bus().ready().await.expect("ready");

    a.set("limit", &1_u8, true).await.expect("set");
    a.set("other", &1_u8, true).await.expect("set");

    eventually(|| !origins.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*origins.lock(), [a.cache().context().node_id().to_string()]);
}

#[test]
fn blocking_set_from_a_plain_thread() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("runtime");
    let store = InMemoryStore::new();
    let config = {
        let _entered = runtime.enter();
        node(&store)
    };

    config.set_blocking("threads", &8_u16, true).expect("set");

    let read = runtime.block_on(config.get::<u16>("threads")).expect("get");
    assert_eq!(*read.value(), 8);
}

#[tokio::test]
async fn keys_with_separator_are_rejected() {
    let store = InMemoryStore::new();
    let config = node(&store);

    let error = config.set("a:b", &1_u8, true).await.expect_err("separator");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    let error = config.watch("a:b", |_| {}).expect_err("separator");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(!store.operations().iter().any(|op| matches!(op, StoreOp::Set(_))));
}

#[tokio::test]
async fn near_copies_expire_after_the_configured_ttl() {
    let store = InMemoryStore::new();
    let mut pool = EndpointPool::new("main");
    pool.add_write(Endpoint::new("main:write", store.clone())).expect("write");
    let control = tick::ClockControl::new();
    let ctx = Context::new(Topology::single(pool), control.to_clock());
    let cache = TieredCache::new(ctx.clone(), TieredCacheOptions::default());
    let bus = InvalidationBus::start(ctx, BusOptions::default()).expect("bus");
    let config = ReplicatedConfigStore::start(
        cache,
        bus,
        ConfigStoreOptions {
            near_ttl: Duration::from_secs(5),
        },
    )
    .expect("config store");

    config.set("k", &1_i64, false).await.expect("set");
    assert!(config.cache().near().contains("k"));

    control.advance(Duration::from_secs(6));
    assert!(!config.cache().near().contains("k"));
    assert_eq!(*config.get::<i64>("k").await.expect("get").value(), 1);
}
