// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{sync::Arc, time::Duration};

use cairn_store::{Message, RemoteStore};
use futures::StreamExt;
use moka::sync::Cache;
use parking_lot::Mutex;
use tick::Clock;
use tokio::sync::{mpsc, watch};

use crate::{
    Endpoint,
    bus::{BusState, BusStatus, table::SubscriptionTable},
    options::BusOptions,
};

pub(crate) type Dedupe = Cache<(String, String), ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Resubscribe,
    Shutdown,
}

enum Next {
    Resubscribe,
    Stop,
}

/// Owns the subscription connection and feeds incoming messages to the callbacks.
pub(crate) struct Driver<S> {
    pub endpoint: Endpoint<S>,
    pub table: Arc<Mutex<SubscriptionTable>>,
    pub dedupe: Dedupe,
    pub clock: Clock,
    pub options: BusOptions,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub status: watch::Sender<BusStatus>,
}

impl<S: RemoteStore> Driver<S> {
    pub async fn run(mut self) {
        let mut backoff = self.options.initial_backoff;

        loop {
            let (channels, version) = {
                let table = self.table.lock();
                (table.channels(), table.version())
            };

            if channels.is_empty() {
                self.set_state(BusState::Disconnected, version);
                match self.commands.recv().await {
                    Some(Command::Resubscribe) => continue,
                    Some(Command::Shutdown) | None => break,
                }
            }

            self.set_state(BusState::Reconnecting, version);
            let stream = match self.endpoint.store().subscribe(&channels).await {
                Ok(stream) => {
                    backoff = self.options.initial_backoff;
                    stream
                }
                Err(error) => {
                    tracing::warn!(
                        bus.endpoint = self.endpoint.name(),
                        bus.backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "bus.subscribe_failed"
                    );
                    if matches!(self.wait(backoff).await, Next::Stop) {
                        break;
                    }
                    backoff = (backoff * 2).min(self.options.max_backoff);
                    continue;
                }
            };

            self.set_state(BusState::Subscribed, version);
            tracing::info!(
                bus.endpoint = self.endpoint.name(),
                bus.channels = channels.len(),
                "bus.subscribed"
            );

            if matches!(self.pump(stream).await, Next::Stop) {
                break;
            }
        }

        let version = self.table.lock().version();
        self.set_state(BusState::Disconnected, version);
        tracing::info!(bus.endpoint = self.endpoint.name(), "bus.stopped");
    }

    async fn pump(&mut self, mut stream: cairn_store::MessageStream) -> Next {
        loop {
            tokio::select! {
                // Drain buffered messages before reacting to a resubscribe.
                biased;

                message = stream.next() => match message {
                    Some(message) => dispatch(&self.table, &self.dedupe, &message),
                    None => {
                        tracing::info!(bus.endpoint = self.endpoint.name(), "bus.disconnected");
                        let version = self.status.borrow().version;
                        self.set_state(BusState::Disconnected, version);
                        return Next::Resubscribe;
                    }
                },
                command = self.commands.recv() => return next(command),
            }
        }
    }

    async fn wait(&mut self, backoff: Duration) -> Next {
        tokio::select! {
            () = self.clock.delay(backoff) => Next::Resubscribe,
            command = self.commands.recv() => next(command),
        }
    }

    fn set_state(&self, state: BusState, version: u64) {
        self.status.send_replace(BusStatus { state, version });
    }
}

fn next(command: Option<Command>) -> Next {
    match command {
        Some(Command::Resubscribe) => Next::Resubscribe,
        Some(Command::Shutdown) | None => Next::Stop,
    }
}

/// Runs the callbacks registered for `message`.
///
/// A message whose `(channel, payload)` this process just published as a removal is
/// consumed from the dedupe set and runs nothing. Callbacks are cloned out of the table
/// before they run, so they may subscribe or publish themselves.
pub(crate) fn dispatch(table: &Mutex<SubscriptionTable>, dedupe: &Dedupe, message: &Message) {
    if dedupe.remove(&(message.channel.clone(), message.payload.clone())).is_some() {
        tracing::debug!(bus.channel = %message.channel, bus.payload = %message.payload, "bus.echo_suppressed");
        return;
    }

    let route = table.lock().route(&message.channel, &message.payload);

    if let Some(callback) = route.channel {
        callback(&message.payload);
    }

    if route.malformed {
        tracing::warn!(
            bus.channel = %message.channel,
            bus.payload = %message.payload,
            "bus.malformed_payload"
        );
    } else if let Some((callback, value)) = route.key {
        callback(&value);
    }
}
