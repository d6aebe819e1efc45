//! Server-side diagnostic job lifecycle.
//!
//! The gateway runs ping and traceroute jobs asynchronously. `JobManager`
//! creates them, polls their state on a fixed interval, delivers the final
//! outcome once, and deletes them on cancel or during zombie cleanup.
//!
//! Every registered job has one poll task. A poll only proceeds while the
//! job is still registered, so cancelling a job also stops its outcome from
//! being delivered.

mod types;

pub use types::*;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::rest::GatewayApi;

/// Default delay between job state polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

type Registry = Arc<Mutex<HashMap<(JobKind, JobId), JobEntry>>>;

struct JobEntry {
    state: JobState,
    poller: Option<JoinHandle<()>>,
}

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<(JobKind, JobId), JobEntry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts, polls, cancels and cleans up gateway jobs.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct JobManager {
    api: Arc<dyn GatewayApi>,
    poll_interval: Duration,
    registry: Registry,
}

impl JobManager {
    pub fn new(api: Arc<dyn GatewayApi>) -> Self {
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Create a job and start polling it.
    ///
    /// The returned ticket carries the job id and a receiver for the final
    /// outcome. A 400 reply means the gateway rejected the host and yields
    /// [`JobStart::Rejected`]; other failures are errors.
    pub async fn start(&self, request: impl Into<JobRequest>) -> Result<JobStart> {
        let request = request.into();
        let kind = request.kind();
        let path = kind.collection_path();

        let reply = match self.api.post(&path, &request.to_body()).await {
            Ok(reply) => reply,
            Err(e) if e.is_bad_request() => {
                info!("{} job rejected by gateway: {}", kind, e);
                return Ok(JobStart::Rejected(JobOutcome::rejected()));
            }
            Err(e) => return Err(GatewayError::api(path, e)),
        };

        let id = reply
            .get("created")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| GatewayError::unexpected(&path, "creation reply carries no job id"))?;

        let (tx, rx) = oneshot::channel();
        {
            // Registered before the poller's first wake-up
            let mut registry = lock_registry(&self.registry);
            let poller = tokio::spawn(poll_job(
                self.api.clone(),
                self.registry.clone(),
                self.poll_interval,
                kind,
                id,
                tx,
            ));
            let displaced = registry.insert(
                (kind, id),
                JobEntry {
                    state: JobState::Requested,
                    poller: Some(poller),
                },
            );
            if let Some(poller) = displaced.and_then(|entry| entry.poller) {
                warn!("{} job {} reused by the gateway, dropping the old poller", kind, id);
                poller.abort();
            }
        }

        info!("{} job {} started", kind, id);
        Ok(JobStart::Started(JobTicket {
            kind,
            id,
            finished: rx,
        }))
    }

    /// Stop polling and delete a job.
    ///
    /// Cancelling an unknown or already cancelled id does nothing. A 404 on
    /// delete means the gateway already dropped the job.
    pub async fn cancel(&self, kind: JobKind, id: JobId) -> Result<()> {
        let entry = lock_registry(&self.registry).remove(&(kind, id));
        let Some(entry) = entry else {
            debug!("{} job {} not registered, nothing to cancel", kind, id);
            return Ok(());
        };

        if let Some(poller) = entry.poller {
            poller.abort();
        }

        let path = kind.job_path(id);
        match self.api.delete(&path).await {
            Ok(_) => {
                debug!("{} job {} deleted", kind, id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} job {} already gone", kind, id);
                Ok(())
            }
            Err(e) => Err(GatewayError::api(path, e)),
        }
    }

    /// Delete every job of `kind` the gateway knows about.
    ///
    /// Deletions run concurrently; returns once all of them finished, with
    /// the number of jobs listed.
    pub async fn cleanup(&self, kind: JobKind) -> Result<usize> {
        let path = kind.listing_path();
        let listing = self
            .api
            .get(&path)
            .await
            .map_err(|e| GatewayError::api(&path, e))?;

        let Some(jobs) = listing
            .get("jobs")
            .and_then(|j| j.get(kind.list_key()))
            .and_then(Value::as_array)
        else {
            warn!("{} job listing carries no {} array", kind, kind.list_key());
            return Ok(0);
        };

        let ids: Vec<JobId> = jobs
            .iter()
            .filter_map(|job| job.get("id").and_then(Value::as_u64))
            .collect();

        {
            let mut registry = lock_registry(&self.registry);
            for id in &ids {
                if let Some(entry) = registry.remove(&(kind, *id)) {
                    if let Some(poller) = entry.poller {
                        poller.abort();
                    }
                }
            }
        }

        let mut deletions = JoinSet::new();
        for id in &ids {
            let api = self.api.clone();
            let path = kind.job_path(*id);
            deletions.spawn(async move {
                match api.delete(&path).await {
                    Ok(_) => true,
                    Err(e) if e.is_not_found() => true,
                    Err(e) => {
                        warn!("failed to delete {}: {}", path, e);
                        false
                    }
                }
            });
        }

        let mut deleted = 0;
        while let Some(result) = deletions.join_next().await {
            if matches!(result, Ok(true)) {
                deleted += 1;
            }
        }

        if !ids.is_empty() {
            info!("cleaned up {}/{} {} jobs", deleted, ids.len(), kind);
        }
        Ok(ids.len())
    }

    /// Ids currently registered for `kind`, ascending
    pub fn active(&self, kind: JobKind) -> Vec<JobId> {
        let mut ids: Vec<JobId> = lock_registry(&self.registry)
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Last known state of a registered job
    pub fn state(&self, kind: JobKind, id: JobId) -> Option<JobState> {
        lock_registry(&self.registry)
            .get(&(kind, id))
            .map(|entry| entry.state.clone())
    }
}

/// Poll loop for one job; ends once an outcome is delivered or the job
/// leaves the registry.
async fn poll_job(
    api: Arc<dyn GatewayApi>,
    registry: Registry,
    interval: Duration,
    kind: JobKind,
    id: JobId,
    finished: oneshot::Sender<JobOutcome>,
) {
    loop {
        sleep(interval).await;

        if !lock_registry(&registry).contains_key(&(kind, id)) {
            debug!("{} job {} unregistered, polling stopped", kind, id);
            return;
        }

        let state = match api.get(&kind.state_path(id)).await {
            Ok(body) => body
                .get(kind.body_key())
                .and_then(|job| job.get("state"))
                .and_then(Value::as_str)
                .map(JobState::parse),
            Err(e) if e.is_not_found() => {
                deliver(&registry, kind, id, JobState::Aborted, None, finished);
                return;
            }
            Err(e) => {
                warn!("{} job {} poll failed, polling stopped: {}", kind, id, e);
                return;
            }
        };

        match state {
            Some(JobState::Requested) => {
                debug!("{} job {} still running", kind, id);
            }
            Some(JobState::Complete) => {
                fetch_results(api.as_ref(), &registry, kind, id, finished).await;
                return;
            }
            Some(state) => {
                deliver(&registry, kind, id, state, None, finished);
                return;
            }
            None => {
                warn!("{} job {} poll reply carries no state", kind, id);
                return;
            }
        }
    }
}

async fn fetch_results(
    api: &dyn GatewayApi,
    registry: &Registry,
    kind: JobKind,
    id: JobId,
    finished: oneshot::Sender<JobOutcome>,
) {
    match api.get(&kind.job_path(id)).await {
        Ok(body) => {
            let results = body
                .get(kind.body_key())
                .and_then(|job| job.get("results"))
                .and_then(|raw| JobResults::parse(kind, raw));
            match results {
                Some(results) => {
                    deliver(registry, kind, id, JobState::Complete, Some(results), finished)
                }
                None => warn!("{} job {} completed without results", kind, id),
            }
        }
        Err(e) if e.is_not_found() => {
            deliver(registry, kind, id, JobState::Aborted, None, finished);
        }
        Err(e) => warn!("{} job {} result fetch failed: {}", kind, id, e),
    }
}

/// Record the terminal state and hand the outcome to the ticket holder,
/// only if the job is still registered. The entry stays until cancelled.
fn deliver(
    registry: &Registry,
    kind: JobKind,
    id: JobId,
    state: JobState,
    results: Option<JobResults>,
    finished: oneshot::Sender<JobOutcome>,
) {
    let mut registry = lock_registry(registry);
    let Some(entry) = registry.get_mut(&(kind, id)) else {
        debug!("{} job {} finished after cancel, outcome dropped", kind, id);
        return;
    };

    entry.state = state.clone();
    entry.poller = None;
    debug!("{} job {} finished: {}", kind, id, state);

    let _ = finished.send(JobOutcome {
        id: Some(id),
        state,
        results,
    });
}
