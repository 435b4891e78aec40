// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Installation and invocation of atomic store procedures.

use std::sync::Arc;

use cairn_store::{ErrorKind, Procedure, ProcedureHandle, RemoteStore, Reply, Result};
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::{Endpoint, Topology};

type HandleKey = (Arc<str>, &'static str);

/// Caches one [`ProcedureHandle`] per endpoint and procedure.
///
/// Concurrent callers asking for the same handle share a single installation round
/// trip. When an endpoint forgets a procedure, the next evaluation drops the stale
/// handle, installs the procedure again and retries once.
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    handles: DashMap<HandleKey, Arc<OnceCell<ProcedureHandle>>>,
}

impl ProcedureRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `procedures` on every write endpoint of `topology` that does not have them yet.
    ///
    /// # Errors
    ///
    /// Returns the first installation failure.
    pub async fn ensure_loaded<S: RemoteStore>(&self, topology: &Topology<S>, procedures: &[Procedure]) -> Result<()> {
        for endpoint in topology.all_writes() {
            for procedure in procedures {
                self.handle(endpoint, procedure).await?;
            }
        }
        Ok(())
    }

    /// Runs `procedure` on `endpoint`, installing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns store errors from installation or evaluation. A
    /// [`ProcedureMissing`](ErrorKind::ProcedureMissing) error is only returned if the
    /// procedure goes missing again right after being reinstalled.
    pub async fn eval<S: RemoteStore>(&self, endpoint: &Endpoint<S>, procedure: &Procedure, keys: &[&str], args: &[String]) -> Result<Reply> {
        let handle = self.handle(endpoint, procedure).await?;
        match endpoint.store().eval_procedure(&handle, keys, args).await {
            Err(error) if error.is(ErrorKind::ProcedureMissing) => {
                tracing::warn!(
                    procedure.endpoint = endpoint.name(),
                    procedure.name = procedure.name(),
                    "procedure.reinstall"
                );
                self.forget(endpoint, procedure, &handle);
                let handle = self.handle(endpoint, procedure).await?;
                endpoint.store().eval_procedure(&handle, keys, args).await
            }
            result => result,
        }
    }

    /// Returns `true` if a handle for `procedure` on `endpoint` is cached.
    #[must_use]
    pub fn is_loaded<S>(&self, endpoint: &Endpoint<S>, procedure: &Procedure) -> bool {
        self.handles
            .get(&(endpoint.shared_name(), procedure.name()))
            .is_some_and(|cell| cell.initialized())
    }

    async fn handle<S: RemoteStore>(&self, endpoint: &Endpoint<S>, procedure: &Procedure) -> Result<ProcedureHandle> {
        let cell = self.cell(endpoint, procedure);
        let handle = cell
            .get_or_try_init(|| async {
                let handle = endpoint.store().load_procedure(procedure).await;
                match &handle {
                    Ok(_) => tracing::debug!(
                        procedure.endpoint = endpoint.name(),
                        procedure.name = procedure.name(),
                        "procedure.installed"
                    ),
                    Err(error) => tracing::error!(
                        procedure.endpoint = endpoint.name(),
                        procedure.name = procedure.name(),
                        error = %error,
                        "procedure.install_failed"
                    ),
                }
                handle
            })
            .await?;
        Ok(handle.clone())
    }

    fn cell<S>(&self, endpoint: &Endpoint<S>, procedure: &Procedure) -> Arc<OnceCell<ProcedureHandle>> {
        let entry = self.handles.entry((endpoint.shared_name(), procedure.name())).or_default();
        Arc::clone(entry.value())
    }

    // Only the cell holding `stale` is dropped, so a handle another caller already
    // reinstalled survives.
    fn forget<S>(&self, endpoint: &Endpoint<S>, procedure: &Procedure, stale: &ProcedureHandle) {
        self.handles
            .remove_if(&(endpoint.shared_name(), procedure.name()), |_, cell| cell.get() == Some(stale));
    }
}
