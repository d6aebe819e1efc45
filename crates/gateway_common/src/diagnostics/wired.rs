//! Ethernet flip-flop detection.
//!
//! A cable with a bad contact makes the connected host count jump up and
//! down. The monitor samples the ethernet host list on a fixed interval and
//! counts every change of the count as a reconnection.

use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use super::state::WiredObservation;
use crate::config::DiagnosticsConfig;
use crate::error::ApiError;
use crate::rest::{paths, GatewayApi};

/// Counts host count changes against an allowance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlipFlopDetector {
    last_count: usize,
    reconnections: u32,
    allowed: u32,
}

impl FlipFlopDetector {
    pub fn new(initial_count: usize, allowed: u32) -> Self {
        Self {
            last_count: initial_count,
            reconnections: 0,
            allowed,
        }
    }

    /// Record a sample; true once reconnections exceed the allowance
    pub fn observe(&mut self, count: usize) -> bool {
        if count != self.last_count {
            self.reconnections += 1;
        }
        self.last_count = count;
        self.is_unstable()
    }

    pub fn is_unstable(&self) -> bool {
        self.reconnections > self.allowed
    }

    pub fn reconnections(&self) -> u32 {
        self.reconnections
    }
}

/// Number of entries in `hosts.hosts`; a malformed body counts as none
pub fn host_count(body: &Value) -> usize {
    host_list(body).as_array().map(Vec::len).unwrap_or(0)
}

fn host_list(body: &Value) -> Value {
    body.get("hosts")
        .and_then(|h| h.get("hosts"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Samples the ethernet host list for the configured duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WiredMonitor {
    pub request_timeout: Duration,
    pub duration: Duration,
    pub interval: Duration,
    pub reconnections_allowed: u32,
}

impl WiredMonitor {
    pub fn new(config: &DiagnosticsConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            duration: config.wired_test_duration(),
            interval: config.wired_poll_interval(),
            reconnections_allowed: config.wired_reconnections_allowed,
        }
    }

    /// Run the test; stops early once the link is found unstable.
    ///
    /// The observation carries the host list of the first sample. Any
    /// request failure ends the test with that error.
    pub async fn run(&self, api: &dyn GatewayApi) -> Result<WiredObservation, ApiError> {
        let initial = self.sample(api).await?;
        let mut detector = FlipFlopDetector::new(host_count(&initial), self.reconnections_allowed);
        let started = Instant::now();

        loop {
            sleep(self.interval).await;
            if started.elapsed() >= self.duration {
                break;
            }

            let sample = self.sample(api).await?;
            if detector.observe(host_count(&sample)) {
                debug!(
                    "wired link unstable after {} reconnections",
                    detector.reconnections()
                );
                break;
            }
            if started.elapsed() >= self.duration {
                break;
            }
        }

        Ok(WiredObservation {
            hosts: host_list(&initial),
            no_link: detector.is_unstable(),
        })
    }

    async fn sample(&self, api: &dyn GatewayApi) -> Result<Value, ApiError> {
        timeout(self.request_timeout, api.get(paths::ETHERNET_HOSTS))
            .await
            .map_err(|_| ApiError::Timeout)?
    }
}
