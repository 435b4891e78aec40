// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `NearCache`.

use std::time::Duration;

use cairn_memory::{NearCache, NearCacheBuilder, NearCacheOptions};
use cairn_store::Expiration;
use tick::{Clock, ClockControl};

#[test]
fn get_returns_none_for_missing_key() {
    let cache = NearCache::builder(Clock::new_frozen()).build();
    assert!(cache.get("missing").is_none());
    assert!(!cache.contains("missing"));
}

#[test]
fn insert_overwrites_existing_value() {
    let cache = NearCache::builder(Clock::new_frozen()).build();
    cache.insert("key", b"one".to_vec(), Expiration::None);
    cache.insert("key", b"two".to_vec(), Expiration::None);

    assert_eq!(cache.get("key").as_deref(), Some(&b"two"[..]));
}

#[test]
fn absolute_expiration_is_not_extended_by_reads() {
    let control = ClockControl::new();
    let cache = NearCache::builder(control.to_clock()).build();
    cache.insert("key", b"v".to_vec(), Expiration::Absolute(Duration::from_secs(10)));

    control.advance(Duration::from_secs(6));
    assert!(cache.get("key").is_some());
    assert_eq!(cache.ttl("key"), Some(Duration::from_secs(4)));

    control.advance(Duration::from_secs(4));
    assert!(cache.get("key").is_none());
}

#[test]
fn get_sliding_converts_entry_to_sliding() {
    let control = ClockControl::new();
    let cache = NearCache::builder(control.to_clock()).build();
    cache.insert("key", b"v".to_vec(), Expiration::Absolute(Duration::from_secs(5)));

    control.advance(Duration::from_secs(4));
    assert!(cache.get_sliding("key", Duration::from_secs(5)).is_some());

    control.advance(Duration::from_secs(4));
    assert!(cache.get("key").is_some());
    assert_eq!(cache.ttl("key"), Some(Duration::from_secs(5)));
}

#[test]
fn contains_does_not_rearm_sliding_entries() {
    let control = ClockControl::new();
    let cache = NearCache::builder(control.to_clock()).build();
    cache.insert("key", b"v".to_vec(), Expiration::Sliding(Duration::from_secs(5)));

    control.advance(Duration::from_secs(3));
    assert!(cache.contains("key"));
    control.advance(Duration::from_secs(2));
    assert!(!cache.contains("key"));
}

#[test]
fn expire_sets_absolute_lifetime() {
    let control = ClockControl::new();
    let cache = NearCache::builder(control.to_clock()).build();

    assert!(!cache.expire("missing", Duration::from_secs(1)));

    cache.insert("key", b"v".to_vec(), Expiration::None);
    assert!(cache.expire("key", Duration::from_secs(2)));
    control.advance(Duration::from_secs(2));
    assert!(!cache.contains("key"));
}

#[test]
fn invalidate_reports_removal() {
    let cache = NearCache::builder(Clock::new_frozen()).build();
    cache.insert("key", b"v".to_vec(), Expiration::None);

    assert!(cache.invalidate("key"));
    assert!(!cache.invalidate("key"));
    assert!(cache.get("key").is_none());
}

#[test]
fn builder_accepts_deserialized_options() {
    let options: NearCacheOptions = serde_json::from_str(r#"{ "max_capacity": 5, "name": "tiny" }"#).expect("valid options");
    let cache = NearCacheBuilder::from_options(Clock::new_frozen(), options).build();

    cache.insert("key", b"v".to_vec(), Expiration::None);
    assert!(cache.contains("key"));
}

#[test]
fn default_options_cap_at_ten_thousand() {
    assert_eq!(NearCacheOptions::default().max_capacity, 10_000);
}
