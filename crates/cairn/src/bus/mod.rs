// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cross-process invalidation over publish/subscribe.
//!
//! An [`InvalidationBus`] keeps one subscription connection to the first pool's write
//! endpoint. A background driver task owns that connection: it replays the subscription
//! table whenever a channel is added or the connection drops, backs off between failed
//! attempts and dispatches every incoming message to the registered callbacks.
//!
//! Removal notices a process publishes itself come back to it over the same channel.
//! [`InvalidationBus::publish_removal`] remembers each notice in a small, time-limited
//! set so that its single echo is swallowed instead of handled, which keeps a removal
//! from bouncing between processes forever.

mod driver;
mod table;

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use cairn_store::{Error, RemoteStore, Result};
use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::{Context, Endpoint, options::BusOptions};
use driver::{Command, Dedupe, Driver};
use table::SubscriptionTable;

/// A message callback. Channel-wide callbacks receive the whole payload, keyed
/// callbacks receive the value after the key.
pub type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection state of the bus driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// No subscription connection is open.
    Disconnected,
    /// A subscription connection is being established.
    Reconnecting,
    /// The subscription connection covers the channels registered when it was opened.
    Subscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BusStatus {
    state: BusState,
    version: u64,
}

/// Channel-wide and per-key subscriptions with automatic resubscription.
///
/// Cloning is cheap; clones share the driver. The driver stops when [`shutdown`]
/// is called or the last clone is dropped.
///
/// [`shutdown`]: Self::shutdown
///
/// # Examples
///
/// ```
/// use cairn::{Context, Endpoint, EndpointPool, InvalidationBus, Topology};
/// use cairn_store::testing::InMemoryStore;
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cairn::Error> {
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
/// let ctx = Context::new(Topology::single(pool), Clock::new_tokio());
///
/// let bus = InvalidationBus::start(ctx, Default::default())?;
/// bus.subscribe_key("prices", "sku-1", |price| println!("sku-1 now costs {price}"))?;
/// bus.ready().await?;
///
/// bus.publish_key("prices", "sku-1", "9.99").await?;
/// # Ok(())
/// # }
/// ```
pub struct InvalidationBus<S> {
    inner: Arc<BusInner<S>>,
}

struct BusInner<S> {
    endpoint: Endpoint<S>,
    table: Arc<Mutex<SubscriptionTable>>,
    dedupe: Dedupe,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<BusStatus>,
}

impl<S: RemoteStore + 'static> InvalidationBus<S> {
    /// Starts the bus driver on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the topology has no write endpoint or no tokio
    /// runtime is running.
    pub fn start(ctx: Context<S>, options: BusOptions) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(Error::configuration)?;
        let endpoint = ctx
            .topology()
            .pools()
            .first()
            .ok_or_else(|| Error::configuration("invalidation bus needs at least one pool"))?
            .write()?
            .clone();

        let table = Arc::new(Mutex::new(SubscriptionTable::default()));
        let dedupe: Dedupe = Cache::builder()
            .max_capacity(options.dedupe_capacity)
            .time_to_live(options.dedupe_ttl)
            .build();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(BusStatus {
            state: BusState::Disconnected,
            version: 0,
        });

        runtime.spawn(
            Driver {
                endpoint: endpoint.clone(),
                table: Arc::clone(&table),
                dedupe: dedupe.clone(),
                clock: ctx.clock().clone(),
                options,
                commands: command_rx,
                status: status_tx,
            }
            .run(),
        );

        Ok(Self {
            inner: Arc::new(BusInner {
                endpoint,
                table,
                dedupe,
                commands,
                status,
            }),
        })
    }
}

impl<S: RemoteStore> InvalidationBus<S> {
    /// Registers a callback for every message on `channel`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `channel` already has a channel-wide callback.
    pub fn subscribe<F>(&self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let is_new = self.inner.table.lock().subscribe(channel, Arc::new(callback))?;
        self.resubscribe_if(is_new, channel);
        Ok(())
    }

    /// Registers a callback for `key:value` messages on `channel` whose key is `key`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `key` on `channel` already has a callback.
    pub fn subscribe_key<F>(&self, channel: &str, key: &str, callback: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let is_new = self.inner.table.lock().subscribe_key(channel, key, Arc::new(callback))?;
        self.resubscribe_if(is_new, channel);
        Ok(())
    }

    /// Publishes `payload` on `channel` and returns the number of receivers.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        self.inner.endpoint.store().publish(channel, payload).await
    }

    /// Publishes `key:value` on `channel`.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn publish_key(&self, channel: &str, key: &str, value: &str) -> Result<u64> {
        self.publish(channel, &format!("{key}:{value}")).await
    }

    /// Publishes `key` as a removal notice on `channel` and swallows its echo on this bus.
    ///
    /// # Errors
    ///
    /// Returns a store error. The echo is not expected in that case and is forgotten.
    pub async fn publish_removal(&self, channel: &str, key: &str) -> Result<u64> {
        let notice = (channel.to_owned(), key.to_owned());
        self.inner.dedupe.insert(notice.clone(), ());
        let published = self.publish(channel, key).await;
        if published.is_err() {
            self.inner.dedupe.invalidate(&notice);
        }
        published
    }

    /// Waits until the subscription connection covers every registered channel.
    ///
    /// Returns immediately when nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the driver has stopped.
    pub async fn ready(&self) -> Result<()> {
        let target = {
            let table = self.inner.table.lock();
            if table.is_empty() {
                return Ok(());
            }
            table.version()
        };

        let mut status = self.inner.status.clone();
        status
            .wait_for(|status| status.state == BusState::Subscribed && status.version >= target)
            .await
            .map_err(Error::transport)?;
        Ok(())
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> BusState {
        self.inner.status.borrow().state
    }

    /// Stops the driver. Callbacks do not run after the driver has observed the request.
    pub fn shutdown(&self) {
        // A closed channel means the driver is already gone.
        let _ = self.inner.commands.send(Command::Shutdown);
    }

    fn resubscribe_if(&self, is_new: bool, channel: &str) {
        if is_new {
            tracing::debug!(bus.channel = channel, "bus.channel_added");
            let _ = self.inner.commands.send(Command::Resubscribe);
        }
    }
}

impl<S> Clone for InvalidationBus<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Debug for InvalidationBus<S> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("endpoint", &self.inner.endpoint)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}
