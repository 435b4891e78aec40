// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Invalidation bus dispatch, echo suppression and reconnection.

use std::{sync::Arc, time::Duration};

use cairn::{BusOptions, BusState, Context, Endpoint, EndpointPool, ErrorKind, InvalidationBus, Topology};
use cairn_store::testing::{InMemoryStore, StoreOp};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tick::Clock;

type Received = Arc<Mutex<Vec<String>>>;

fn start(store: &InMemoryStore) -> InvalidationBus<InMemoryStore> {
    start_with(store, BusOptions::default())
}

fn start_with(store: &InMemoryStore, options: BusOptions) -> InvalidationBus<InMemoryStore> {
    let mut pool = EndpointPool::new("main");
    pool.add_write(Endpoint::new("main:write", store.clone())).expect("write");
    InvalidationBus::start(Context::new(Topology::single(pool), Clock::new_tokio()), options).expect("start")
}

fn recorder() -> (Received, impl Fn(&str) + Send + Sync + 'static) {
    let received = Received::default();
    let sink = Arc::clone(&received);
    (received, move |payload: &str| sink.lock().push(payload.to_owned()))
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
async fn removal_echo_is_swallowed_once_by_the_publisher() {
    let store = InMemoryStore::new();
    let a = start(&store);
    let b = start(&store);

    let (at_a, record_a) = recorder();
    let (at_b, record_b) = recorder();
    a.subscribe("removed", record_a).expect("subscribe");
    b.subscribe("removed", record_b).expect("subscribe");
    a.ready().await.expect("ready");
    b.ready().await.expect("ready");

    assert_eq!(a.publish_removal("removed", "k").await.expect("publish"), 2);
    a.publish("removed", "k2").await.expect("publish");

    eventually(|| at_a.lock().len() == 1 && at_b.lock().len() == 2).await;
    assert_eq!(*at_a.lock(), ["k2"]);
    assert_eq!(*at_b.lock(), ["k", "k2"]);
}

#[tokio::test]
async fn keyed_callbacks_receive_the_value_after_the_first_colon() {
    let store = InMemoryStore::new();
    let bus = start(&store);

    let (sku1, record_sku1) = recorder();
    let (sku2, record_sku2) = recorder();
    let (all, record_all) = recorder();
    bus.subscribe_key("prices", "sku-1", record_sku1).expect("subscribe");
    bus.subscribe_key("prices", "sku-2", record_sku2).expect("subscribe");
    bus.subscribe("prices", record_all).expect("subscribe");
    bus.ready().await.expect("ready");

    bus.publish_key("prices", "sku-1", "9.99").await.expect("publish");
    bus.publish_key("prices", "sku-1", "eur:8.50").await.expect("publish");
    bus.publish_key("prices", "sku-3", "1.00").await.expect("publish");

    eventually(|| all.lock().len() == 3).await;
    assert_eq!(*sku1.lock(), ["9.99", "eur:8.50"]);
    assert!(sku2.lock().is_empty());
    assert_eq!(*all.lock(), ["sku-1:9.99", "sku-1:eur:8.50", "sku-3:1.00"]);
}

#[tokio::test]
async fn duplicate_subscriptions_are_rejected() {
    let store = InMemoryStore::new();
    let bus = start(&store);

    bus.subscribe("events", |_| {}).expect("first");
    let error = bus.subscribe("events", |_| {}).expect_err("duplicate channel");
    assert_eq!(error.kind(), ErrorKind::Configuration);

    bus.subscribe_key("events", "k", |_| {}).expect("keyed alongside channel-wide");
    let error = bus.subscribe_key("events", "k", |_| {}).expect_err("duplicate key");
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn ready_returns_immediately_without_subscriptions() {
    let store = InMemoryStore::new();
    let bus = start(&store);

    bus.ready().await.expect("ready");
    assert_eq!(bus.state(), BusState::Disconnected);
    assert_eq!(store.subscriber_count(), 0);
}

#[tokio::test]
async fn adding_a_channel_resubscribes_with_the_full_set() {
    let store = InMemoryStore::new();
    let bus = start(&store);

    bus.subscribe("a", |_| {}).expect("subscribe");
    bus.ready().await.expect("ready");
    bus.subscribe("b", |_| {}).expect("subscribe");
    bus.ready().await.expect("ready");

    let last = store
        .operations()
        .into_iter()
        .rev()
        .find_map(|op| match op {
            StoreOp::Subscribe(channels) => Some(channels),
            _ => None,
        })
        .expect("subscribed");
    assert_eq!(last, ["a", "b"]);
    eventually(|| store.subscriber_count() == 1).await;
}

#[tokio::test]
async fn dropped_connection_is_reestablished() {
    let store = InMemoryStore::new();
    let bus = start(&store);

    let (received, record) = recorder();
    bus.subscribe("events", record).expect("subscribe");
    bus.ready().await.expect("ready");

    store.disconnect_subscribers();
    eventually(|| store.subscriber_count() == 1).await;
    bus.ready().await.expect("ready");

    bus.publish("events", "after-reconnect").await.expect("publish");
    eventually(|| !received.lock().is_empty()).await;
    assert_eq!(*received.lock(), ["after-reconnect"]);
}

#[tokio::test]
async fn failed_subscriptions_are_retried_with_backoff() {
    let store = InMemoryStore::new();
    store.fail_when(|op| matches!(op, StoreOp::Subscribe(_)));
    let bus = start_with(
        &store,
        BusOptions {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            ..BusOptions::default()
        },
    );

    bus.subscribe("events", |_| {}).expect("subscribe");
    let attempts = || {
        store
            .operations()
            .iter()
            .filter(|op| matches!(op, StoreOp::Subscribe(_)))
            .count()
    };
    eventually(|| attempts() >= 3).await;
    assert_eq!(bus.state(), BusState::Reconnecting);

    store.clear_failures();
    bus.ready().await.expect("ready");
    assert_eq!(bus.state(), BusState::Subscribed);
}

#[tokio::test]
async fn shutdown_stops_the_driver() {
    let store = InMemoryStore::new();
    let bus = start(&store);

    bus.subscribe("events", |_| {}).expect("subscribe");
    bus.ready().await.expect("ready");
    bus.shutdown();

    eventually(|| bus.state() == BusState::Disconnected).await;
    let error = bus.ready().await.expect_err("driver stopped");
    assert_eq!(error.kind(), ErrorKind::Transport);
    eventually(|| store.subscriber_count() == 0).await;
}

#[test]
fn start_outside_a_runtime_is_a_configuration_error() {
    let mut pool = EndpointPool::new("main");
    pool.add_write(Endpoint::new("main:write", InMemoryStore::new())).expect("write");

    let error = InvalidationBus::start(Context::new(Topology::single(pool), Clock::new_frozen()), BusOptions::default())
        .expect_err("no runtime");
    assert_eq!(error.kind(), ErrorKind::Configuration);
}
