// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Near/far cache behavior against the in-memory store.

use std::time::Duration;

use cairn::{Context, Endpoint, EndpointPool, ErrorKind, Expiration, ShardPolicy, Target, TieredCache, TieredCacheOptions, Topology};
use cairn_store::{
    BincodeCodec, RemoteStore, Ttl,
    testing::{InMemoryStore, StoreOp},
};
use futures::executor::block_on;
use pretty_assertions::assert_eq;
use tick::{Clock, ClockControl};

fn cache(store: &InMemoryStore, clock: Clock) -> TieredCache<InMemoryStore> {
    let mut pool = EndpointPool::new("main");
    pool.add_write(Endpoint::new("main:write", store.clone())).expect("write");
    TieredCache::new(Context::new(Topology::single(pool), clock), TieredCacheOptions::default())
}

fn controlled() -> (ClockControl, InMemoryStore, TieredCache<InMemoryStore>) {
    let control = ClockControl::new();
    let store = InMemoryStore::with_clock(control.to_clock());
    let cache = cache(&store, control.to_clock());
    (control, store, cache)
}

#[test]
fn both_tiers_serve_until_expiry() {
    let (control, _store, cache) = controlled();
    let value = "v".to_owned();

    block_on(cache.set("k", &value, Expiration::Absolute(Duration::from_secs(10)), Target::Both)).expect("set");

    assert_eq!(block_on(cache.get::<String>("k", Target::Near)).expect("near").value(), "v");
    assert_eq!(block_on(cache.get::<String>("k", Target::Far)).expect("far").value(), "v");

    control.advance(Duration::from_secs(11));

    assert!(!block_on(cache.exists("k", Target::Near)).expect("near"));
    assert!(!block_on(cache.exists("k", Target::Far)).expect("far"));
    let gone = block_on(cache.get::<String>("k", Target::Both)).expect("get");
    assert!(!gone.exists());
    assert_eq!(gone.value(), "");
}

#[test]
fn far_hit_populates_near_with_remaining_ttl() {
    let (_control, store, cache) = controlled();

    block_on(cache.set("k", &42_u32, Expiration::Absolute(Duration::from_secs(30)), Target::Far)).expect("set");
    assert!(!cache.near().contains("k"));

    let value = block_on(cache.get::<u32>("k", Target::Both)).expect("get");
    assert_eq!(value.into_option(), Some(42));

    assert_eq!(cache.near().ttl("k"), Some(Duration::from_secs(30)));

    // Served from near now, so the far tier sees no further reads.
    store.clear_operations();
    assert_eq!(*block_on(cache.get::<u32>("k", Target::Both)).expect("get").value(), 42);
    assert!(store.operations().is_empty());
}

#[test]
fn far_hit_without_expiry_populates_near_without_expiry() {
    let (_control, _store, cache) = controlled();

    block_on(cache.set("k", &1_u8, Expiration::None, Target::Far)).expect("set");
    block_on(cache.get::<u8>("k", Target::Both)).expect("get");

    assert!(cache.near().contains("k"));
    assert_eq!(cache.near().ttl("k"), None);
}

#[tokio::test]
async fn far_hit_populates_near_in_background_task() {
    let store = InMemoryStore::new();
    let cache = cache(&store, Clock::new_frozen());

    cache.set("k", &"v".to_owned(), Expiration::Absolute(Duration::from_secs(5)), Target::Far).await.expect("set");
    let value = cache.get::<String>("k", Target::Both).await.expect("get");
    assert_eq!(value.value(), "v");

    for _ in 0..200 {
        if cache.near().contains("k") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cache.near().contains("k"), "near tier was not populated");
}

#[tokio::test]
async fn far_entry_expiring_before_population_is_not_copied_near() {
    let (control, store, cache) = controlled();

    cache.set("k", &"v".to_owned(), Expiration::Absolute(Duration::from_secs(5)), Target::Far).await.expect("set");
    assert_eq!(cache.get::<String>("k", Target::Both).await.expect("get").value(), "v");

    // The population task has not run yet; the far entry lapses before it asks for the ttl.
    control.advance(Duration::from_secs(6));
    for _ in 0..200 {
        if store.operations().contains(&StoreOp::Ttl("k".to_owned())) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(store.operations().contains(&StoreOp::Ttl("k".to_owned())), "population never ran");

    assert!(!cache.near().contains("k"));
    control.advance(Duration::from_secs(3_600));
    assert!(!cache.near().contains("k"));
    assert!(!cache.get::<String>("k", Target::Both).await.expect("get").exists());
}

#[test]
fn targets_limit_which_tiers_are_touched() {
    let (_control, store, cache) = controlled();

    block_on(cache.set("far-only", &1_i32, Expiration::None, Target::Far)).expect("set");
    assert!(!cache.near().contains("far-only"));
    assert!(!block_on(cache.get::<i32>("far-only", Target::Near)).expect("get").exists());

    block_on(cache.set("near-only", &2_i32, Expiration::None, Target::Near)).expect("set");
    assert!(!block_on(store.exists("near-only")).expect("exists"));
    assert!(block_on(cache.exists("near-only", Target::Both)).expect("exists"));
    assert!(!block_on(cache.exists("near-only", Target::Far)).expect("exists"));
}

#[test]
fn sliding_reads_extend_both_tiers() {
    let (control, store, cache) = controlled();
    let window = Duration::from_secs(10);

    block_on(cache.set_sliding("session", &"s".to_owned(), window, Target::Both)).expect("set");

    control.advance(Duration::from_secs(8));
    let value = block_on(cache.get_sliding::<String>("session", window, Target::Both)).expect("get");
    assert_eq!(value.value(), "s");
    assert_eq!(block_on(store.ttl("session")).expect("ttl"), Ttl::Remaining(window));

    // Past the original deadline, alive because of the read above.
    control.advance(Duration::from_secs(8));
    assert!(block_on(cache.exists("session", Target::Near)).expect("near"));
    assert!(block_on(cache.exists("session", Target::Far)).expect("far"));

    control.advance(Duration::from_secs(3));
    assert!(!block_on(cache.exists("session", Target::Near)).expect("near"));
    assert!(!block_on(cache.exists("session", Target::Far)).expect("far"));
}

#[test]
fn sliding_far_hit_populates_near_as_sliding() {
    let (control, _store, cache) = controlled();
    let window = Duration::from_secs(4);

    block_on(cache.set("k", &7_u64, Expiration::None, Target::Far)).expect("set");
    let value = block_on(cache.get_sliding::<u64>("k", window, Target::Both)).expect("get");
    assert_eq!(*value.value(), 7);
    assert_eq!(cache.near().ttl("k"), Some(window));

    control.advance(Duration::from_secs(3));
    assert!(cache.near().get("k").is_some());
    control.advance(Duration::from_secs(3));
    assert!(cache.near().contains("k"));
    control.advance(Duration::from_secs(5));
    assert!(!cache.near().contains("k"));
}

#[test]
fn expire_applies_absolute_lifetime() {
    let (control, _store, cache) = controlled();

    block_on(cache.set("k", &true, Expiration::None, Target::Both)).expect("set");
    assert!(block_on(cache.expire("k", Duration::from_secs(5), Target::Both)).expect("expire"));
    assert!(!block_on(cache.expire("missing", Duration::from_secs(5), Target::Both)).expect("expire"));

    control.advance(Duration::from_secs(6));
    assert!(!block_on(cache.exists("k", Target::Both)).expect("exists"));
}

#[test]
fn remove_reports_whether_anything_was_removed() {
    let (_control, store, cache) = controlled();

    block_on(cache.set("k", &"v".to_owned(), Expiration::None, Target::Both)).expect("set");
    assert!(block_on(cache.remove("k", Target::Both)).expect("remove"));
    assert!(!block_on(cache.exists("k", Target::Both)).expect("exists"));
    assert!(!block_on(cache.remove("k", Target::Both)).expect("remove"));

    block_on(cache.set("far", &"v".to_owned(), Expiration::None, Target::Far)).expect("set");
    assert!(!block_on(cache.remove("far", Target::Near)).expect("remove"));
    assert!(block_on(store.exists("far")).expect("exists"));
}

#[test]
fn custom_codec_round_trips_structs() {
    #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Profile {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    let store = InMemoryStore::new();
    let mut pool = EndpointPool::new("main");
    pool.add_write(Endpoint::new("main:write", store.clone())).expect("write");
    let ctx = Context::new(Topology::single(pool), Clock::new_frozen());
    let cache = TieredCache::with_codec(ctx, TieredCacheOptions::default(), BincodeCodec);

    let profile = Profile {
        id: 7,
        name: "ada".to_owned(),
        tags: vec!["admin".to_owned()],
    };
    block_on(cache.set("profile:7", &profile, Expiration::None, Target::Far)).expect("set");

    assert_eq!(block_on(cache.get::<Profile>("profile:7", Target::Far)).expect("get").into_value(), profile);
}

#[test]
fn undecodable_far_value_is_codec_error() {
    let store = InMemoryStore::new();
    let cache = cache(&store, Clock::new_frozen());

    block_on(store.set("k", b"not json", None)).expect("raw set");
    let error = block_on(cache.get::<u32>("k", Target::Far)).expect_err("decode fails");
    assert_eq!(error.kind(), ErrorKind::Codec);
}

#[test]
fn far_failures_surface_as_transport_errors() {
    let store = InMemoryStore::new();
    store.fail_when(|op| matches!(op, StoreOp::Get(_)));
    let cache = cache(&store, Clock::new_frozen());

    let error = block_on(cache.get::<u32>("k", Target::Both)).expect_err("get fails");
    assert_eq!(error.kind(), ErrorKind::Transport);
}

#[test]
fn writes_reach_every_broadcast_owner() {
    let east = InMemoryStore::new();
    let west = InMemoryStore::new();
    let mut topology = Topology::new(ShardPolicy::Broadcast);
    for (name, store) in [("east", &east), ("west", &west)] {
        let mut pool = EndpointPool::new(name);
        pool.add_write(Endpoint::new(format!("{name}:write"), store.clone())).expect("write");
        topology.add_pool(pool).expect("unique");
    }
    let cache = TieredCache::new(Context::new(topology, Clock::new_frozen()), TieredCacheOptions::default());

    block_on(cache.set("k", &"v".to_owned(), Expiration::None, Target::Far)).expect("set");
    assert!(block_on(east.exists("k")).expect("exists"));
    assert!(block_on(west.exists("k")).expect("exists"));

    assert!(block_on(cache.remove("k", Target::Far)).expect("remove"));
    assert!(!block_on(west.exists("k")).expect("exists"));
}
