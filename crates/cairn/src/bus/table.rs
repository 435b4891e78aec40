// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    collections::{BTreeSet, HashMap, hash_map::Entry},
    sync::Arc,
};

use cairn_store::{Error, Result};

use crate::bus::Callback;

/// What one incoming message should trigger.
#[derive(Default)]
pub(crate) struct Route {
    pub channel: Option<Callback>,
    pub key: Option<(Callback, String)>,
    pub malformed: bool,
}

/// Registered callbacks, the source of truth replayed on every (re)subscribe.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    channels: HashMap<String, Callback>,
    keyed: HashMap<String, HashMap<String, Callback>>,
    version: u64,
}

impl SubscriptionTable {
    /// Registers a channel-wide callback. Returns `true` if the channel is new to the table.
    pub fn subscribe(&mut self, channel: &str, callback: Callback) -> Result<bool> {
        let is_new = !self.is_known(channel);
        match self.channels.entry(channel.to_owned()) {
            Entry::Occupied(_) => return Err(already_subscribed(channel, None)),
            Entry::Vacant(slot) => slot.insert(callback),
        };
        Ok(self.touch(is_new))
    }

    /// Registers a callback for one key of a channel. Returns `true` if the channel is new to the table.
    pub fn subscribe_key(&mut self, channel: &str, key: &str, callback: Callback) -> Result<bool> {
        let is_new = !self.is_known(channel);
        match self.keyed.entry(channel.to_owned()).or_default().entry(key.to_owned()) {
            Entry::Occupied(_) => return Err(already_subscribed(channel, Some(key))),
            Entry::Vacant(slot) => slot.insert(callback),
        };
        Ok(self.touch(is_new))
    }

    /// Every channel with at least one callback, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .keys()
            .chain(self.keyed.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Bumped every time a channel is added.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.keyed.is_empty()
    }

    /// Resolves the callbacks for a message. Keyed payloads are split on the first `:`.
    pub fn route(&self, channel: &str, payload: &str) -> Route {
        let mut route = Route {
            channel: self.channels.get(channel).cloned(),
            ..Route::default()
        };

        if let Some(keys) = self.keyed.get(channel) {
            match payload.split_once(':') {
                Some((key, value)) => route.key = keys.get(key).map(|callback| (Arc::clone(callback), value.to_owned())),
                None => route.malformed = true,
            }
        }

        route
    }

    fn is_known(&self, channel: &str) -> bool {
        self.channels.contains_key(channel) || self.keyed.contains_key(channel)
    }

    fn touch(&mut self, is_new: bool) -> bool {
        if is_new {
            self.version += 1;
        }
        is_new
    }
}

fn already_subscribed(channel: &str, key: Option<&str>) -> Error {
    match key {
        Some(key) => Error::configuration(format!("already subscribed to key {key} on channel {channel}")),
        None => Error::configuration(format!("already subscribed to channel {channel}")),
    }
}
