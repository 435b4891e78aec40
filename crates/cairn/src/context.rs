// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use cairn_store::{Procedure, RemoteStore, Reply, Result, procedure};
use tick::Clock;
use uuid::Uuid;

use crate::{Endpoint, ProcedureRegistry, Topology};

/// Everything the cairn components share: the topology, the procedure registry, the
/// clock and this process's node identity.
///
/// Components receive a context at construction instead of reaching for process-wide
/// state. Cloning is cheap; clones share everything.
///
/// # Examples
///
/// ```
/// use cairn::{Context, Endpoint, EndpointPool, Topology};
/// use cairn_store::testing::InMemoryStore;
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let mut pool = EndpointPool::new("main");
/// pool.add_write(Endpoint::new("primary", InMemoryStore::new()))?;
///
/// let ctx = Context::initialize(Topology::single(pool), Clock::new_frozen()).await?;
/// assert_eq!(ctx.topology().pools().len(), 1);
/// # Ok::<(), cairn::Error>(())
/// # });
/// ```
pub struct Context<S> {
    inner: Arc<ContextInner<S>>,
}

struct ContextInner<S> {
    topology: Topology<S>,
    registry: ProcedureRegistry,
    clock: Clock,
    node_id: Uuid,
}

impl<S> Context<S> {
    /// Creates a context with a random node identity without installing any procedures.
    ///
    /// Procedures are installed lazily on first use. Prefer [`initialize`](Self::initialize),
    /// which surfaces installation problems at startup.
    #[must_use]
    pub fn new(topology: Topology<S>, clock: Clock) -> Self {
        Self::with_node_id(topology, clock, Uuid::new_v4())
    }

    /// Creates a context with an explicit node identity.
    #[must_use]
    pub fn with_node_id(topology: Topology<S>, clock: Clock, node_id: Uuid) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                topology,
                registry: ProcedureRegistry::new(),
                clock,
                node_id,
            }),
        }
    }

    /// Returns the topology.
    #[must_use]
    pub fn topology(&self) -> &Topology<S> {
        &self.inner.topology
    }

    /// Returns the procedure registry.
    #[must_use]
    pub fn registry(&self) -> &ProcedureRegistry {
        &self.inner.registry
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns the identity of this process in invalidation messages.
    #[must_use]
    pub fn node_id(&self) -> Uuid {
        self.inner.node_id
    }
}

impl<S: RemoteStore> Context<S> {
    /// Creates a context and installs the whole procedure catalog on every write endpoint.
    ///
    /// # Errors
    ///
    /// Returns the first installation failure.
    pub async fn initialize(topology: Topology<S>, clock: Clock) -> Result<Self> {
        let ctx = Self::new(topology, clock);
        ctx.registry().ensure_loaded(ctx.topology(), &procedure::ALL).await?;
        tracing::info!(
            context.node_id = %ctx.node_id(),
            context.pools = ctx.topology().pools().len(),
            "context.initialized"
        );
        Ok(ctx)
    }

    pub(crate) async fn eval(&self, endpoint: &Endpoint<S>, procedure: &Procedure, keys: &[&str], args: &[String]) -> Result<Reply> {
        self.inner.registry.eval(endpoint, procedure, keys, args).await
    }
}

impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Debug for Context<S> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not part of the contract.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("topology", &self.inner.topology)
            .field("node_id", &self.inner.node_id)
            .finish_non_exhaustive()
    }
}
