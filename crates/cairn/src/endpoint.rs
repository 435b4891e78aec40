// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Store endpoints and weighted endpoint pools.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use cairn_store::{Error, Result};

/// One connection target, such as a primary or a replica.
///
/// Cloning is cheap; clones share the underlying store.
pub struct Endpoint<S> {
    name: Arc<str>,
    store: Arc<S>,
}

impl<S> Endpoint<S> {
    /// Creates an endpoint from a connected store.
    ///
    /// The name identifies the endpoint in logs and in the procedure registry, so it
    /// must be unique within a topology.
    pub fn new(name: impl Into<Arc<str>>, store: S) -> Self {
        Self::from_arc(name, Arc::new(store))
    }

    /// Creates an endpoint from a store that is already shared.
    pub fn from_arc(name: impl Into<Arc<str>>, store: Arc<S>) -> Self {
        Self { name: name.into(), store }
    }

    /// Returns the endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store behind this endpoint.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub(crate) fn shared_store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }
}

impl<S> Clone for Endpoint<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> Debug for Endpoint<S> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("name", &self.name).finish_non_exhaustive()
    }
}

/// A named group of one write endpoint and any number of read endpoints.
///
/// Reads are spread over a weighted round-robin pool: every read endpoint appears
/// `read_weight` times and the write endpoint `write_weight` times, interleaved round by
/// round so consecutive reads alternate between endpoints.
///
/// # Examples
///
/// ```
/// use cairn::{Endpoint, EndpointPool};
///
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", ()))?;
/// pool.add_read(Endpoint::new("replica-a", ()));
/// pool.add_read(Endpoint::new("replica-b", ()));
///
/// let order: Vec<_> = (0..5).map(|_| pool.next_read().map(|e| e.name().to_owned())).collect::<Result<_, _>>()?;
/// assert_eq!(order, ["replica-a", "replica-b", "primary", "replica-a", "replica-b"]);
/// # Ok::<(), cairn::Error>(())
/// ```
pub struct EndpointPool<S> {
    name: String,
    read_weight: usize,
    write_weight: usize,
    write: Option<Endpoint<S>>,
    reads: Vec<Endpoint<S>>,
    read_pool: Vec<Endpoint<S>>,
    cursor: AtomicUsize,
}

impl<S> EndpointPool<S> {
    /// The default number of times each read endpoint appears in the read pool.
    pub const DEFAULT_READ_WEIGHT: usize = 2;

    /// The default number of times the write endpoint appears in the read pool.
    pub const DEFAULT_WRITE_WEIGHT: usize = 1;

    /// Creates an empty pool with the default weights.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_weights(name, Self::DEFAULT_READ_WEIGHT, Self::DEFAULT_WRITE_WEIGHT)
    }

    /// Creates an empty pool with explicit weights.
    ///
    /// A weight of zero keeps those endpoints out of the read pool entirely.
    pub fn with_weights(name: impl Into<String>, read_weight: usize, write_weight: usize) -> Self {
        Self {
            name: name.into(),
            read_weight,
            write_weight,
            write: None,
            reads: Vec::new(),
            read_pool: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the write endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pool already has a write endpoint.
    pub fn add_write(&mut self, endpoint: Endpoint<S>) -> Result<()> {
        if let Some(existing) = &self.write {
            return Err(Error::configuration(format!(
                "pool {} already has write endpoint {}",
                self.name,
                existing.name()
            )));
        }
        self.write = Some(endpoint);
        self.rebuild();
        Ok(())
    }

    /// Appends a read endpoint.
    pub fn add_read(&mut self, endpoint: Endpoint<S>) {
        self.reads.push(endpoint);
        self.rebuild();
    }

    /// Returns the write endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no write endpoint was added.
    pub fn write(&self) -> Result<&Endpoint<S>> {
        self.write
            .as_ref()
            .ok_or_else(|| Error::configuration(format!("pool {} has no write endpoint", self.name)))
    }

    /// Returns the write endpoint as a slice of zero or one element.
    #[must_use]
    pub fn writes(&self) -> &[Endpoint<S>] {
        self.write.as_slice()
    }

    /// Returns the read endpoints in insertion order.
    #[must_use]
    pub fn reads(&self) -> &[Endpoint<S>] {
        &self.reads
    }

    /// Returns the weighted read pool.
    #[must_use]
    pub fn read_pool(&self) -> &[Endpoint<S>] {
        &self.read_pool
    }

    /// Returns the next endpoint to read from.
    ///
    /// Concurrent callers may occasionally skip or repeat an entry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the read pool is empty.
    pub fn next_read(&self) -> Result<&Endpoint<S>> {
        if self.read_pool.is_empty() {
            return Err(Error::configuration(format!("pool {} has no readable endpoints", self.name)));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.read_pool.len();
        Ok(&self.read_pool[index])
    }

    fn rebuild(&mut self) {
        let rounds = self.read_weight.max(self.write_weight);
        let mut pool = Vec::with_capacity(self.reads.len() * self.read_weight + self.write.as_ref().map_or(0, |_| self.write_weight));

        for round in 0..rounds {
            if round < self.read_weight {
                pool.extend(self.reads.iter().cloned());
            }
            if round < self.write_weight {
                pool.extend(self.write.iter().cloned());
            }
        }

        self.read_pool = pool;
        self.cursor.store(0, Ordering::Relaxed);
    }
}

impl<S> Debug for EndpointPool<S> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointPool")
            .field("name", &self.name)
            .field("write", &self.write)
            .field("reads", &self.reads)
            .field("read_weight", &self.read_weight)
            .field("write_weight", &self.write_weight)
            .finish_non_exhaustive()
    }
}
