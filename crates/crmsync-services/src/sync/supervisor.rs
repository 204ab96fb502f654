//! Background run supervision
//!
//! Each tenant's background phase runs as a spawned task whose state is published
//! on a watch channel. Callers can poll or await a tenant's run, and shutdown
//! drains every run still in flight. A finished run stays visible until the next
//! spawn or drain prunes it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crmsync_core::AppError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundState {
    Running,
    Completed,
    Failed(String),
}

impl BackgroundState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, BackgroundState::Running)
    }
}

struct BackgroundRun {
    state: watch::Receiver<BackgroundState>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Clone, Default)]
pub struct BackgroundSupervisor {
    runs: Arc<Mutex<HashMap<String, BackgroundRun>>>,
}

impl BackgroundSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, BackgroundRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop runs that finished, panicked or were already joined by `drain`.
    fn prune_finished(runs: &mut HashMap<String, BackgroundRun>) {
        runs.retain(|_, run| {
            !run.state.borrow().is_finished()
                && run.handle.as_ref().is_some_and(|h| !h.is_finished())
        });
    }

    /// Spawn `run` for `tenant_id`, replacing the record of any previous run.
    pub fn spawn<F>(&self, tenant_id: &str, run: F)
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(BackgroundState::Running);
        let tenant = tenant_id.to_string();

        let handle = tokio::spawn(async move {
            let state = match run.await {
                Ok(()) => BackgroundState::Completed,
                Err(e) => {
                    tracing::error!(
                        tenant_id = %tenant,
                        error = %e,
                        error_code = e.kind().as_str(),
                        "Background sync failed"
                    );
                    BackgroundState::Failed(e.to_string())
                }
            };
            let _ = tx.send(state);
        });

        let mut runs = self.runs();
        Self::prune_finished(&mut runs);
        runs.insert(
            tenant_id.to_string(),
            BackgroundRun {
                state: rx,
                handle: Some(handle),
            },
        );
    }

    pub fn state(&self, tenant_id: &str) -> Option<BackgroundState> {
        self.runs()
            .get(tenant_id)
            .map(|run| run.state.borrow().clone())
    }

    /// Wait for the tenant's latest run to finish. `None` when no run was started.
    pub async fn wait(&self, tenant_id: &str) -> Option<BackgroundState> {
        let mut rx = self.runs().get(tenant_id)?.state.clone();
        let state = match rx.wait_for(BackgroundState::is_finished).await {
            Ok(state) => state.clone(),
            // The sender is gone without a final state: the task panicked or was aborted.
            Err(_) => BackgroundState::Failed("background task aborted".to_string()),
        };
        Some(state)
    }

    /// Tenants whose run is still in flight.
    pub fn running(&self) -> Vec<String> {
        self.runs()
            .iter()
            .filter(|(_, run)| !run.state.borrow().is_finished())
            .map(|(tenant, _)| tenant.clone())
            .collect()
    }

    /// Wait for every spawned run to finish, then forget them.
    pub async fn drain(&self) {
        let handles: Vec<(String, JoinHandle<()>)> = self
            .runs()
            .iter_mut()
            .filter_map(|(tenant, run)| run.handle.take().map(|h| (tenant.clone(), h)))
            .collect();

        if !handles.is_empty() {
            tracing::info!(count = handles.len(), "Waiting for background syncs to finish");
        }
        for (tenant, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(tenant_id = %tenant, error = %e, "Background sync task panicked");
            }
        }
        Self::prune_finished(&mut self.runs());
    }
}
