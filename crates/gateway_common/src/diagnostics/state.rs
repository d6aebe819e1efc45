//! States, per-check results and effects of the diagnostic machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::jobs::JobId;

// ============================================================================
// States
// ============================================================================

/// One node of the diagnostic graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateId {
    Idle,
    TunerTemperature,
    Cablemodem,
    ProvisioningMode,
    BroadbandPing,
    Telephony,
    Wired,
    Wireless2g,
    Wireless5g,
    WirelessClients,
    Complete,
}

impl StateId {
    /// The checks in declaration order, which is also the order findings
    /// are emitted in
    pub const CHECKS: [StateId; 9] = [
        StateId::TunerTemperature,
        StateId::Cablemodem,
        StateId::ProvisioningMode,
        StateId::BroadbandPing,
        StateId::Telephony,
        StateId::Wired,
        StateId::Wireless2g,
        StateId::Wireless5g,
        StateId::WirelessClients,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, StateId::Idle | StateId::Complete)
    }

    /// Percentage shown when the state is entered
    pub fn progress_weight(&self) -> u8 {
        match self {
            StateId::Idle | StateId::Complete => 0,
            StateId::TunerTemperature => 10,
            StateId::Cablemodem => 20,
            StateId::ProvisioningMode => 30,
            StateId::BroadbandPing => 40,
            StateId::Telephony => 60,
            StateId::Wired => 60,
            StateId::Wireless2g => 80,
            StateId::Wireless5g => 90,
            StateId::WirelessClients => 95,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateId::Idle => "idle",
            StateId::TunerTemperature => "tuner_temperature",
            StateId::Cablemodem => "cablemodem",
            StateId::ProvisioningMode => "provisioning_mode",
            StateId::BroadbandPing => "broadband_ping",
            StateId::Telephony => "telephony",
            StateId::Wired => "wired",
            StateId::Wireless2g => "wireless_2g",
            StateId::Wireless5g => "wireless_5g",
            StateId::WirelessClients => "wireless_clients",
            StateId::Complete => "complete",
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// UI group a check reports its badge to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckGroup {
    Broadband,
    Telephone,
    Ethernet,
    Wireless,
}

impl CheckGroup {
    pub const ALL: [CheckGroup; 4] = [
        CheckGroup::Broadband,
        CheckGroup::Telephone,
        CheckGroup::Ethernet,
        CheckGroup::Wireless,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CheckGroup::Broadband => "Broadband",
            CheckGroup::Telephone => "Telephone",
            CheckGroup::Ethernet => "Ethernet",
            CheckGroup::Wireless => "Wireless",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Badge {
    Success,
    Error,
}

// ============================================================================
// Per-check results
// ============================================================================

/// Check with a single pass/fail flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub okay: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub ipv4_valid: bool,
    pub ipv6_valid: bool,
    pub okay: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PingResult {
    pub okay: bool,
    /// The one outstanding ping job of this run
    pub job: Option<JobId>,
}

/// Telephone line identifier
pub type LineId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "lines")]
pub enum TelephonyStatus {
    #[default]
    Unknown,
    /// No enabled lines, no voice service
    Disabled,
    Operational,
    /// Enabled lines that are not operational
    LinesDown(Vec<LineId>),
    /// The line query itself failed
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WiredResult {
    pub okay: bool,
    pub low_speed: bool,
    pub no_link: bool,
}

/// A connected WiFi client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiHost {
    pub mac_address: String,
    pub rssi: Option<i32>,
    /// RSSI below the configured threshold
    pub low_signal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WirelessClientsResult {
    pub okay: bool,
    pub hosts: Vec<WifiHost>,
}

/// Every result field written by the checks of one run.
///
/// `Default` is the reset state: all flags false, telephony unknown, no job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunContext {
    pub tuner_temperature: CheckResult,
    pub cablemodem: CheckResult,
    pub provisioning: ProvisioningResult,
    pub broadband_ping: PingResult,
    pub telephony: TelephonyStatus,
    pub wired: WiredResult,
    pub wireless_2g: CheckResult,
    pub wireless_5g: CheckResult,
    pub wireless_clients: WirelessClientsResult,
}

// ============================================================================
// Events and effects
// ============================================================================

/// Hosts seen by the wired monitor
#[derive(Debug, Clone, PartialEq)]
pub struct WiredObservation {
    /// `hosts.hosts` of the first sample (`Null` if malformed)
    pub hosts: Value,
    /// Host count changed more often than allowed
    pub no_link: bool,
}

/// Data a check's work delivers to its exit handler
#[derive(Debug, Clone, PartialEq)]
pub enum StepData {
    Flag(bool),
    Json(Value),
    Wired(WiredObservation),
}

impl StepData {
    pub fn flag(&self) -> bool {
        matches!(self, StepData::Flag(true))
    }

    /// JSON body, or `Null` for any other payload
    pub fn json(&self) -> &Value {
        static NULL: Value = Value::Null;
        match self {
            StepData::Json(value) => value,
            _ => &NULL,
        }
    }
}

/// What happened to the current state's work
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Completed(StepData),
    TimedOut,
}

/// Instruction from the machine to its driver
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Complete the current state right away with this data
    Resolve(StepData),
    /// GET a path and complete with its JSON body
    Fetch(&'static str),
    /// Clean up zombie pings, start one ping job and complete with its verdict
    RunPing { host: String, interface: String },
    /// Sample ethernet hosts for flip-flops
    MonitorWired,
    /// Release a ping job
    CancelJob(JobId),
    ShowCheck(CheckGroup),
    SetStatus(CheckGroup, Badge),
    Progress { percent: u8, okay: bool },
    /// The machine reached `Complete`
    Finish,
}
