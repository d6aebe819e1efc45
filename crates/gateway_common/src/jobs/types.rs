//! Job request, state and result types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tokio::sync::oneshot;

/// Server-assigned job identifier
pub type JobId = u64;

/// Kind of server-side diagnostic job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Ping,
    Traceroute,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Ping, JobKind::Traceroute];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ping => "ping",
            JobKind::Traceroute => "traceroute",
        }
    }

    /// Key of the job object in request and response bodies
    pub fn body_key(&self) -> &'static str {
        match self {
            JobKind::Ping => "pingJob",
            JobKind::Traceroute => "traceRouteJob",
        }
    }

    /// Key of the job array inside `jobs` listings
    pub fn list_key(&self) -> &'static str {
        match self {
            JobKind::Ping => "pingJobs",
            JobKind::Traceroute => "traceRouteJobs",
        }
    }

    /// `POST` target for new jobs
    pub fn collection_path(&self) -> String {
        format!("/system/diagnostics/{}/jobs", self.as_str())
    }

    /// Listing of every job of this kind, states only
    pub fn listing_path(&self) -> String {
        format!("{}?stateOnly=true", self.collection_path())
    }

    pub fn job_path(&self, id: JobId) -> String {
        format!("/system/diagnostics/{}/job/{}", self.as_str(), id)
    }

    pub fn state_path(&self, id: JobId) -> String {
        format!("{}?stateOnly=true", self.job_path(id))
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle state as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Requested,
    Complete,
    Error,
    Aborted,
    /// Job creation rejected because the host was invalid
    ErrorHostname,
    Other(String),
}

impl JobState {
    pub fn parse(state: &str) -> Self {
        match state {
            "requested" => Self::Requested,
            "complete" => Self::Complete,
            "error" => Self::Error,
            "aborted" => Self::Aborted,
            "error_hostname" => Self::ErrorHostname,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Requested => "requested",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Aborted => "aborted",
            Self::ErrorHostname => "error_hostname",
            Self::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Requested)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_pings: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_block_size: Option<u32>,
}

impl PingRequest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            interface: None,
            number_of_pings: None,
            data_block_size: None,
        }
    }

    pub fn on_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRouteRequest {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_hop_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl TraceRouteRequest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            interface: None,
            max_hop_count: None,
            port: None,
        }
    }
}

/// Parameters of a job to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    Ping(PingRequest),
    Traceroute(TraceRouteRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Ping(_) => JobKind::Ping,
            JobRequest::Traceroute(_) => JobKind::Traceroute,
        }
    }

    /// `{pingJob:{parameters:{...}}}` or `{traceRouteJob:{parameters:{...}}}`
    pub fn to_body(&self) -> Value {
        let parameters = match self {
            JobRequest::Ping(p) => serde_json::to_value(p),
            JobRequest::Traceroute(t) => serde_json::to_value(t),
        }
        .unwrap_or(Value::Null);

        let mut job = Map::new();
        job.insert(
            self.kind().body_key().to_string(),
            json!({ "parameters": parameters }),
        );
        Value::Object(job)
    }
}

impl From<PingRequest> for JobRequest {
    fn from(value: PingRequest) -> Self {
        JobRequest::Ping(value)
    }
}

impl From<TraceRouteRequest> for JobRequest {
    fn from(value: TraceRouteRequest) -> Self {
        JobRequest::Traceroute(value)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Ping job results. Only `failureCount` is interpreted; the rest is kept.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PingResults {
    #[serde(rename = "failureCount", default, skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Traceroute job results
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceRouteResults {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hops: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResults {
    Ping(PingResults),
    Traceroute(TraceRouteResults),
}

impl JobResults {
    /// Parse the `results` object of a completed job
    pub fn parse(kind: JobKind, raw: &Value) -> Option<Self> {
        match kind {
            JobKind::Ping => serde_json::from_value(raw.clone()).ok().map(JobResults::Ping),
            JobKind::Traceroute => serde_json::from_value(raw.clone())
                .ok()
                .map(JobResults::Traceroute),
        }
    }

    pub fn as_ping(&self) -> Option<&PingResults> {
        match self {
            JobResults::Ping(p) => Some(p),
            JobResults::Traceroute(_) => None,
        }
    }
}

/// Final report of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    /// `None` when the job was never created
    pub id: Option<JobId>,
    pub state: JobState,
    pub results: Option<JobResults>,
}

impl JobOutcome {
    pub fn rejected() -> Self {
        Self {
            id: None,
            state: JobState::ErrorHostname,
            results: None,
        }
    }

    /// Completed with at most `failure_limit` failed pings
    pub fn ping_succeeded(&self, failure_limit: u32) -> bool {
        if self.state != JobState::Complete {
            return false;
        }
        let failures = self
            .results
            .as_ref()
            .and_then(|r| r.as_ping())
            .and_then(|p| p.failure_count)
            .unwrap_or(0);
        failures <= failure_limit
    }
}

/// Handle to a started job. The receiver resolves with the job's terminal
/// outcome, or is dropped when the job is cancelled first.
#[derive(Debug)]
pub struct JobTicket {
    pub kind: JobKind,
    pub id: JobId,
    pub finished: oneshot::Receiver<JobOutcome>,
}

/// Result of [`JobManager::start`](super::JobManager::start)
#[derive(Debug)]
pub enum JobStart {
    Started(JobTicket),
    /// The gateway refused the job (HTTP 400); carries an `error_hostname` outcome
    Rejected(JobOutcome),
}
