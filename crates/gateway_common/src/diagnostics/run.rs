//! Async driver for one diagnostic run.
//!
//! `DiagnosticRun` owns the machine and applies events one at a time from a
//! channel. Effect work (requests, the ping probe, the wired monitor) runs in
//! spawned tasks that each report exactly one event tagged with the state
//! entry they belong to. Cancellation goes through a shared [`CancelToken`].

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregate::Report;
use super::machine::{DiagnosticMachine, MachineEnv};
use super::state::{Badge, CheckGroup, Effect, Event, StepData};
use super::wired::WiredMonitor;
use crate::config::DiagnosticsConfig;
use crate::jobs::{JobId, JobKind, JobManager, JobStart, PingRequest};
use crate::provisioning::ProvisioningProfile;
use crate::rest::GatewayApi;

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// Presentation
// ============================================================================

/// Receives progress of a run
pub trait DiagnosticObserver: Send {
    fn show_progress(&mut self, percent: u8, okay: bool);

    /// A check group became relevant
    fn show_check(&mut self, group: CheckGroup);

    fn set_status(&mut self, group: CheckGroup, badge: Badge);

    fn finished(&mut self, report: &Report);

    fn cancelled(&mut self);
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NullObserver;

impl DiagnosticObserver for NullObserver {
    fn show_progress(&mut self, _percent: u8, _okay: bool) {}
    fn show_check(&mut self, _group: CheckGroup) {}
    fn set_status(&mut self, _group: CheckGroup, _badge: Badge) {}
    fn finished(&mut self, _report: &Report) {}
    fn cancelled(&mut self) {}
}

// ============================================================================
// Run
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Report),
    Cancelled,
}

#[derive(Debug)]
enum RunEvent {
    Step { entry: u64, event: Event },
    JobStarted { entry: u64, id: JobId },
}

type EventSender = mpsc::UnboundedSender<RunEvent>;

/// One diagnostic run against a gateway
pub struct DiagnosticRun {
    id: Uuid,
    api: Arc<dyn GatewayApi>,
    jobs: JobManager,
    config: DiagnosticsConfig,
    machine: DiagnosticMachine,
    token: CancelToken,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    report: Option<Report>,
}

impl DiagnosticRun {
    pub fn new(
        api: Arc<dyn GatewayApi>,
        jobs: JobManager,
        profile: ProvisioningProfile,
        config: DiagnosticsConfig,
    ) -> Self {
        let env = MachineEnv::new(profile, &config);
        Self {
            id: Uuid::new_v4(),
            api,
            jobs,
            config,
            machine: DiagnosticMachine::new(env),
            token: CancelToken::new(),
            started_at: None,
            finished_at: None,
            report: None,
        }
    }

    /// Share a token created before the run, e.g. by a signal handler
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token that cancels this run when triggered
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn machine(&self) -> &DiagnosticMachine {
        &self.machine
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Drive the machine until it completes or the run is cancelled
    pub async fn run(&mut self, observer: &mut dyn DiagnosticObserver) -> RunOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.started_at = Some(Utc::now());
        info!(run = %self.id, "diagnostic run started");

        let effects = self.machine.initialise();
        if let Some(outcome) = self.apply(effects, &tx, observer).await {
            return outcome;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    return self.abort(observer).await;
                }
                event = rx.recv() => {
                    // The run holds a sender, so the channel never closes
                    let Some(event) = event else {
                        return self.abort(observer).await;
                    };
                    let effects = match event {
                        RunEvent::Step { entry, event: Event::Completed(data) } => {
                            self.machine.advance(entry, data)
                        }
                        RunEvent::Step { entry, event: Event::TimedOut } => {
                            self.machine.on_timeout(entry)
                        }
                        RunEvent::JobStarted { entry, id } => self.machine.job_started(entry, id),
                    };
                    if let Some(outcome) = self.apply(effects, &tx, observer).await {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn apply(
        &mut self,
        effects: Vec<Effect>,
        tx: &EventSender,
        observer: &mut dyn DiagnosticObserver,
    ) -> Option<RunOutcome> {
        let entry = self.machine.entry();

        for effect in effects {
            match effect {
                Effect::Resolve(data) => {
                    let _ = tx.send(RunEvent::Step {
                        entry,
                        event: Event::Completed(data),
                    });
                }
                Effect::Fetch(path) => {
                    let api = self.api.clone();
                    let limit = self.config.request_timeout();
                    self.spawn_step(tx, entry, async move {
                        match timeout(limit, api.get(path)).await {
                            Ok(Ok(body)) => Event::Completed(StepData::Json(body)),
                            Ok(Err(e)) => {
                                warn!("GET {} failed: {}", path, e);
                                Event::TimedOut
                            }
                            Err(_) => {
                                warn!("GET {} timed out after {:?}", path, limit);
                                Event::TimedOut
                            }
                        }
                    });
                }
                Effect::MonitorWired => {
                    let api = self.api.clone();
                    let monitor = WiredMonitor::new(&self.config);
                    self.spawn_step(tx, entry, async move {
                        match monitor.run(api.as_ref()).await {
                            Ok(observation) => Event::Completed(StepData::Wired(observation)),
                            Err(e) => {
                                warn!("wired monitor failed: {}", e);
                                Event::TimedOut
                            }
                        }
                    });
                }
                Effect::RunPing { host, interface } => {
                    let probe = PingProbe {
                        jobs: self.jobs.clone(),
                        token: self.token.clone(),
                        tx: tx.clone(),
                        entry,
                        request: PingRequest::new(host).on_interface(interface),
                        failure_limit: self.config.ping_failure_limit,
                    };
                    let deadline = self.config.ping_timeout();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let event = match timeout(deadline, probe.run()).await {
                            Ok(Some(ok)) => Event::Completed(StepData::Flag(ok)),
                            Ok(None) => return,
                            Err(_) => {
                                warn!("broadband ping gave no verdict within {:?}", deadline);
                                Event::TimedOut
                            }
                        };
                        let _ = tx.send(RunEvent::Step { entry, event });
                    });
                }
                Effect::CancelJob(id) => self.release_job(id).await,
                Effect::ShowCheck(group) => observer.show_check(group),
                Effect::SetStatus(group, badge) => observer.set_status(group, badge),
                Effect::Progress { percent, okay } => observer.show_progress(percent, okay),
                Effect::Finish => return Some(self.finish(observer)),
            }
        }

        None
    }

    /// Spawn effect work that reports one event unless the run is cancelled first
    fn spawn_step<F>(&self, tx: &EventSender, entry: u64, work: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let tx = tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                event = work => {
                    let _ = tx.send(RunEvent::Step { entry, event });
                }
            }
        });
    }

    async fn release_job(&self, id: JobId) {
        if let Err(e) = self.jobs.cancel(JobKind::Ping, id).await {
            warn!("failed to cancel ping job {}: {}", id, e);
        }
    }

    fn finish(&mut self, observer: &mut dyn DiagnosticObserver) -> RunOutcome {
        self.finished_at = Some(Utc::now());
        match self.machine.report() {
            Some(report) => {
                info!(run = %self.id, passed = report.passed, "diagnostic run complete");
                observer.show_progress(100, report.passed);
                observer.finished(&report);
                self.report = Some(report.clone());
                RunOutcome::Completed(report)
            }
            None => {
                warn!(run = %self.id, "finish requested before completion");
                RunOutcome::Cancelled
            }
        }
    }

    async fn abort(&mut self, observer: &mut dyn DiagnosticObserver) -> RunOutcome {
        info!(run = %self.id, state = %self.machine.current(), "diagnostic run cancelled");
        for effect in self.machine.cancel() {
            if let Effect::CancelJob(id) = effect {
                self.release_job(id).await;
            }
        }
        self.finished_at = Some(Utc::now());
        observer.show_progress(0, false);
        observer.cancelled();
        RunOutcome::Cancelled
    }
}

// ============================================================================
// Broadband ping probe
// ============================================================================

struct PingProbe {
    jobs: JobManager,
    token: CancelToken,
    tx: EventSender,
    entry: u64,
    request: PingRequest,
    failure_limit: u32,
}

impl PingProbe {
    /// Clean up zombies, run one ping job and release it.
    ///
    /// Returns the verdict, or `None` if the run was cancelled meanwhile.
    async fn run(self) -> Option<bool> {
        match self.jobs.cleanup(JobKind::Ping).await {
            Ok(count) if count > 0 => debug!("removed {} zombie ping jobs", count),
            Ok(_) => {}
            Err(e) => warn!("zombie ping cleanup failed: {}", e),
        }
        if self.token.is_cancelled() {
            return None;
        }

        let ticket = match self.jobs.start(self.request.clone()).await {
            Ok(JobStart::Started(ticket)) => ticket,
            Ok(JobStart::Rejected(outcome)) => {
                warn!("ping to {} rejected: {}", self.request.host, outcome.state);
                return Some(false);
            }
            Err(e) => {
                warn!("failed to start ping job: {}", e);
                return Some(false);
            }
        };

        let id = ticket.id;
        let _ = self.tx.send(RunEvent::JobStarted {
            entry: self.entry,
            id,
        });

        if self.token.is_cancelled() {
            self.release(id).await;
            return None;
        }

        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                self.release(id).await;
                return None;
            }
            outcome = ticket.finished => outcome.ok(),
        };

        self.release(id).await;
        let ok = outcome
            .map(|o| o.ping_succeeded(self.failure_limit))
            .unwrap_or(false);
        debug!("ping job {} verdict: {}", id, ok);
        Some(ok)
    }

    async fn release(&self, id: JobId) {
        if let Err(e) = self.jobs.cancel(JobKind::Ping, id).await {
            warn!("failed to cancel ping job {}: {}", id, e);
        }
    }
}
