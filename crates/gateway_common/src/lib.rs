//! Gateway Common - diagnostic engine and job lifecycle for broadband gateways
//!
//! Talks to the gateway's `/rest/v1` API through the [`GatewayApi`] trait.
//! A diagnostic run walks a fixed graph of health checks and folds the
//! results into a [`Report`]; ping and traceroute jobs are managed by
//! [`JobManager`].

pub mod address;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fake;
pub mod jobs;
pub mod provisioning;
pub mod rest;

pub use address::{is_valid_ipv4_address, is_valid_ipv6_address};
pub use config::{DiagnosticsConfig, GatewayConfig, GatewaySection};
pub use diagnostics::{
    CancelToken, DiagnosticObserver, DiagnosticRun, Report, RunMode, RunOutcome, StateId,
};
pub use error::{ApiError, GatewayError, Result};
pub use jobs::{JobKind, JobManager, JobOutcome, JobStart, JobState};
pub use provisioning::{ProvisioningMode, ProvisioningProfile};
pub use rest::{GatewayApi, RestClient};
