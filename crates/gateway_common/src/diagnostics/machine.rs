//! The diagnostic state machine.
//!
//! Pure and synchronous: handlers update the [`RunContext`] and return
//! [`Effect`]s; the driver in `run.rs` performs them and feeds the results
//! back as events.
//!
//! Every state entry gets a new entry number. Events carry the entry they
//! were produced for and anything stale is dropped, so a state's exit or
//! timeout handler runs at most once per entry.

use serde_json::Value;
use tracing::debug;

use super::aggregate::{aggregate, Report, RunMode};
use super::state::*;
use crate::address::{is_valid_ipv4_address, is_valid_ipv6_address};
use crate::config::DiagnosticsConfig;
use crate::jobs::JobId;
use crate::provisioning::ProvisioningProfile;

/// Inputs fixed for the duration of a run
#[derive(Debug, Clone, PartialEq)]
pub struct MachineEnv {
    pub profile: ProvisioningProfile,
    pub ipv4_ping_host: String,
    pub ipv6_ping_host: String,
    pub ping_interface: String,
    pub wired_min_speed_mbps: u32,
    pub rssi_threshold_dbm: i32,
    pub mode: RunMode,
}

impl MachineEnv {
    pub fn new(profile: ProvisioningProfile, config: &DiagnosticsConfig) -> Self {
        Self {
            profile,
            ipv4_ping_host: config.ipv4_ping_host.clone(),
            ipv6_ping_host: config.ipv6_ping_host.clone(),
            ping_interface: config.ping_interface.clone(),
            wired_min_speed_mbps: config.wired_min_speed_mbps,
            rssi_threshold_dbm: config.rssi_threshold_dbm,
            mode: config.mode,
        }
    }
}

/// Result of applying one event to a state
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: StateId,
    pub effects: Vec<Effect>,
}

// ============================================================================
// Transition function
// ============================================================================

/// Run `state`'s exit or timeout handler, then enter the next state.
///
/// Terminal states ignore every event.
pub fn transition(state: StateId, event: Event, ctx: &mut RunContext, env: &MachineEnv) -> Transition {
    let mut effects = Vec::new();

    if state.is_terminal() {
        return Transition {
            next: state,
            effects,
        };
    }

    let next = match event {
        Event::Completed(data) => exit(state, &data, ctx, env, &mut effects),
        Event::TimedOut => timeout(state, ctx, &mut effects),
    };
    debug!("{} -> {}", state, next);

    match next {
        StateId::Complete => effects.push(Effect::Finish),
        StateId::Idle => {}
        next => {
            effects.push(Effect::Progress {
                percent: next.progress_weight(),
                okay: true,
            });
            enter(next, ctx, env, &mut effects);
        }
    }

    Transition { next, effects }
}

fn enter(state: StateId, ctx: &mut RunContext, env: &MachineEnv, effects: &mut Vec<Effect>) {
    use crate::rest::paths;

    match state {
        StateId::TunerTemperature => {
            // No temperature reading on this platform; always normal
            effects.push(Effect::Resolve(StepData::Flag(true)));
        }
        StateId::Cablemodem => {
            effects.push(Effect::ShowCheck(CheckGroup::Broadband));
            effects.push(Effect::Fetch(paths::CABLEMODEM_STATE));
        }
        StateId::ProvisioningMode => effects.push(Effect::Fetch(paths::PROVISIONING)),
        StateId::BroadbandPing => {
            ctx.broadband_ping.okay = true;
            // IPv6 is preferred when provisioned with a valid global address
            let host = if env.profile.supports_ipv6() && ctx.provisioning.ipv6_valid {
                env.ipv6_ping_host.clone()
            } else {
                env.ipv4_ping_host.clone()
            };
            effects.push(Effect::RunPing {
                host,
                interface: env.ping_interface.clone(),
            });
        }
        StateId::Telephony => effects.push(Effect::Fetch(paths::MTA_LINES)),
        StateId::Wired => {
            effects.push(Effect::ShowCheck(CheckGroup::Ethernet));
            ctx.wired = WiredResult {
                okay: true,
                low_speed: false,
                no_link: false,
            };
            effects.push(Effect::MonitorWired);
        }
        StateId::Wireless2g => {
            effects.push(Effect::ShowCheck(CheckGroup::Wireless));
            effects.push(Effect::Fetch(paths::WIFI_BAND_2G));
        }
        StateId::Wireless5g => effects.push(Effect::Fetch(paths::WIFI_BAND_5G)),
        StateId::WirelessClients => effects.push(Effect::Fetch(paths::WIFI_HOSTS)),
        StateId::Idle | StateId::Complete => {}
    }
}

fn exit(
    state: StateId,
    data: &StepData,
    ctx: &mut RunContext,
    env: &MachineEnv,
    effects: &mut Vec<Effect>,
) -> StateId {
    match state {
        StateId::TunerTemperature => {
            ctx.tuner_temperature.okay = data.flag();
            StateId::Cablemodem
        }
        StateId::Cablemodem => exit_cablemodem(data.json(), ctx, effects),
        StateId::ProvisioningMode => exit_provisioning(data.json(), ctx, env, effects),
        StateId::BroadbandPing => {
            // The probe released its job before reporting
            ctx.broadband_ping.job = None;
            ctx.broadband_ping.okay = data.flag();
            if ctx.broadband_ping.okay {
                effects.push(Effect::SetStatus(CheckGroup::Broadband, Badge::Success));
                StateId::Telephony
            } else {
                effects.push(Effect::SetStatus(CheckGroup::Broadband, Badge::Error));
                StateId::Wired
            }
        }
        StateId::Telephony => exit_telephony(data.json(), ctx, effects),
        StateId::Wired => exit_wired(data, ctx, env, effects),
        StateId::Wireless2g => {
            ctx.wireless_2g.okay = band_enabled(data.json());
            StateId::Wireless5g
        }
        StateId::Wireless5g => {
            ctx.wireless_5g.okay = band_enabled(data.json());
            after_5g(ctx, effects)
        }
        StateId::WirelessClients => exit_wireless_clients(data.json(), ctx, env, effects),
        StateId::Idle | StateId::Complete => state,
    }
}

fn timeout(state: StateId, ctx: &mut RunContext, effects: &mut Vec<Effect>) -> StateId {
    match state {
        StateId::TunerTemperature => StateId::Cablemodem,
        StateId::Cablemodem => {
            ctx.cablemodem.okay = false;
            effects.push(Effect::SetStatus(CheckGroup::Broadband, Badge::Error));
            StateId::Wired
        }
        StateId::ProvisioningMode => {
            ctx.provisioning.okay = false;
            effects.push(Effect::SetStatus(CheckGroup::Broadband, Badge::Error));
            StateId::Wired
        }
        StateId::BroadbandPing => {
            if let Some(id) = ctx.broadband_ping.job.take() {
                effects.push(Effect::CancelJob(id));
            }
            ctx.broadband_ping.okay = false;
            effects.push(Effect::SetStatus(CheckGroup::Broadband, Badge::Error));
            StateId::Wired
        }
        StateId::Telephony => {
            effects.push(Effect::ShowCheck(CheckGroup::Telephone));
            ctx.telephony = TelephonyStatus::Failed;
            effects.push(Effect::SetStatus(CheckGroup::Telephone, Badge::Error));
            StateId::Wired
        }
        StateId::Wired => {
            ctx.wired.okay = false;
            effects.push(Effect::SetStatus(CheckGroup::Ethernet, Badge::Error));
            StateId::Wireless2g
        }
        StateId::Wireless2g => {
            ctx.wireless_2g.okay = false;
            StateId::Wireless5g
        }
        StateId::Wireless5g => {
            ctx.wireless_5g.okay = false;
            after_5g(ctx, effects)
        }
        StateId::WirelessClients => {
            ctx.wireless_clients.okay = false;
            effects.push(Effect::SetStatus(CheckGroup::Wireless, Badge::Error));
            StateId::Complete
        }
        StateId::Idle | StateId::Complete => state,
    }
}

// ============================================================================
// Exit handlers
// ============================================================================

fn exit_cablemodem(body: &Value, ctx: &mut RunContext, effects: &mut Vec<Effect>) -> StateId {
    let status = body
        .get("cablemodem")
        .filter(|cm| cm.is_object())
        .map(|cm| cm.get("status").and_then(Value::as_str).unwrap_or_default());

    match status {
        Some("operational") => {
            ctx.cablemodem.okay = true;
            StateId::ProvisioningMode
        }
        other => {
            if other.is_none() {
                debug!("cablemodem reply carries no cablemodem object");
            }
            ctx.cablemodem.okay = false;
            effects.push(Effect::SetStatus(CheckGroup::Broadband, Badge::Error));
            StateId::Wired
        }
    }
}

fn exit_provisioning(
    body: &Value,
    ctx: &mut RunContext,
    env: &MachineEnv,
    effects: &mut Vec<Effect>,
) -> StateId {
    let provisioning = body.get("provisioning");

    if let Some(ipv4) = provisioning.and_then(|p| p.get("ipv4")) {
        ctx.provisioning.ipv4_valid = ipv4
            .get("address")
            .and_then(Value::as_str)
            .is_some_and(is_valid_ipv4_address);
    }
    if let Some(ipv6) = provisioning.and_then(|p| p.get("ipv6")) {
        ctx.provisioning.ipv6_valid = ipv6
            .get("globalAddress")
            .and_then(Value::as_str)
            .is_some_and(is_valid_ipv6_address);
    }

    let can_ping = (env.profile.supports_ipv6() && ctx.provisioning.ipv6_valid)
        || (env.profile.supports_ipv4() && ctx.provisioning.ipv4_valid);
    ctx.provisioning.okay = can_ping;

    if can_ping {
        StateId::BroadbandPing
    } else {
        effects.push(Effect::SetStatus(CheckGroup::Broadband, Badge::Error));
        StateId::Wired
    }
}

fn exit_telephony(body: &Value, ctx: &mut RunContext, effects: &mut Vec<Effect>) -> StateId {
    let Some(lines) = body.get("lines").and_then(Value::as_array) else {
        debug!("telephony reply carries no lines array");
        effects.push(Effect::ShowCheck(CheckGroup::Telephone));
        ctx.telephony = TelephonyStatus::Failed;
        effects.push(Effect::SetStatus(CheckGroup::Telephone, Badge::Error));
        return StateId::Wired;
    };

    let mut has_enabled = false;
    let mut down = Vec::new();
    for (index, element) in lines.iter().enumerate() {
        let line = element.get("line");
        let enabled = line.and_then(|l| l.get("enable")).and_then(Value::as_bool) == Some(true);
        if !enabled {
            continue;
        }
        has_enabled = true;
        let operational =
            line.and_then(|l| l.get("operational")).and_then(Value::as_bool) == Some(true);
        if !operational {
            let id = element
                .get("id")
                .and_then(Value::as_u64)
                .map(|id| id as LineId)
                .unwrap_or(index as LineId + 1);
            down.push(id);
        }
    }

    if !has_enabled {
        ctx.telephony = TelephonyStatus::Disabled;
    } else if !down.is_empty() {
        effects.push(Effect::ShowCheck(CheckGroup::Telephone));
        ctx.telephony = TelephonyStatus::LinesDown(down);
        effects.push(Effect::SetStatus(CheckGroup::Telephone, Badge::Error));
    } else {
        effects.push(Effect::ShowCheck(CheckGroup::Telephone));
        ctx.telephony = TelephonyStatus::Operational;
        effects.push(Effect::SetStatus(CheckGroup::Telephone, Badge::Success));
    }

    StateId::Wired
}

fn exit_wired(
    data: &StepData,
    ctx: &mut RunContext,
    env: &MachineEnv,
    effects: &mut Vec<Effect>,
) -> StateId {
    let (hosts, no_link) = match data {
        StepData::Wired(observation) => (&observation.hosts, observation.no_link),
        other => (other.json(), false),
    };
    ctx.wired.no_link = no_link;
    ctx.wired.low_speed = false;

    let mut failed = match hosts.as_array() {
        Some(hosts) => {
            let mut missing_config = false;
            for host in hosts {
                let Some(config) = host.get("config").filter(|c| c.is_object()) else {
                    missing_config = true;
                    break;
                };
                let slow = config
                    .get("speed")
                    .and_then(Value::as_f64)
                    .is_some_and(|speed| speed < f64::from(env.wired_min_speed_mbps));
                if slow {
                    ctx.wired.low_speed = true;
                    break;
                }
            }
            missing_config
        }
        None => true,
    };
    failed |= ctx.wired.low_speed || ctx.wired.no_link;

    ctx.wired.okay = !failed;
    let badge = if failed { Badge::Error } else { Badge::Success };
    effects.push(Effect::SetStatus(CheckGroup::Ethernet, badge));
    StateId::Wireless2g
}

fn band_enabled(body: &Value) -> bool {
    body.get("state").and_then(|s| s.get("enable")).and_then(Value::as_bool) == Some(true)
}

fn after_5g(ctx: &RunContext, effects: &mut Vec<Effect>) -> StateId {
    if ctx.wireless_5g.okay || ctx.wireless_2g.okay {
        StateId::WirelessClients
    } else {
        // Both bands off, nothing to check clients on
        effects.push(Effect::SetStatus(CheckGroup::Wireless, Badge::Error));
        StateId::Complete
    }
}

fn exit_wireless_clients(
    body: &Value,
    ctx: &mut RunContext,
    env: &MachineEnv,
    effects: &mut Vec<Effect>,
) -> StateId {
    let Some(hosts) = body
        .get("hosts")
        .and_then(|h| h.get("hosts"))
        .and_then(Value::as_array)
    else {
        debug!("wifi host reply carries no host list");
        ctx.wireless_clients = WirelessClientsResult::default();
        effects.push(Effect::SetStatus(CheckGroup::Wireless, Badge::Error));
        return StateId::Complete;
    };

    ctx.wireless_clients.hosts = hosts
        .iter()
        .map(|host| {
            let rssi = host
                .get("config")
                .and_then(|c| c.get("rssi"))
                .and_then(Value::as_f64);
            WifiHost {
                mac_address: host
                    .get("macAddress")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                rssi: rssi.map(|rssi| rssi.round() as i32),
                low_signal: rssi.is_some_and(|rssi| rssi < f64::from(env.rssi_threshold_dbm)),
            }
        })
        .collect();

    // Latches false on any weak client
    ctx.wireless_clients.okay = !ctx.wireless_clients.hosts.iter().any(|h| h.low_signal);

    let badge = if ctx.wireless_clients.okay {
        Badge::Success
    } else {
        Badge::Error
    };
    effects.push(Effect::SetStatus(CheckGroup::Wireless, badge));
    StateId::Complete
}

// ============================================================================
// Machine
// ============================================================================

/// Current state, entry counter and results of one run.
#[derive(Debug, Clone)]
pub struct DiagnosticMachine {
    current: StateId,
    entry: u64,
    ctx: RunContext,
    env: MachineEnv,
}

impl DiagnosticMachine {
    pub fn new(env: MachineEnv) -> Self {
        Self {
            current: StateId::Idle,
            entry: 0,
            ctx: RunContext::default(),
            env,
        }
    }

    pub fn current(&self) -> StateId {
        self.current
    }

    /// Entry number of the current state
    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn env(&self) -> &MachineEnv {
        &self.env
    }

    /// Reset all results and enter the first check
    pub fn initialise(&mut self) -> Vec<Effect> {
        self.ctx = RunContext::default();
        self.current = StateId::TunerTemperature;
        self.entry += 1;

        let mut effects = vec![Effect::Progress {
            percent: self.current.progress_weight(),
            okay: true,
        }];
        enter(self.current, &mut self.ctx, &self.env, &mut effects);
        effects
    }

    /// The current state's work completed with `data`
    pub fn advance(&mut self, entry: u64, data: StepData) -> Vec<Effect> {
        self.apply(entry, Event::Completed(data))
    }

    /// The current state's work timed out or failed
    pub fn on_timeout(&mut self, entry: u64) -> Vec<Effect> {
        self.apply(entry, Event::TimedOut)
    }

    fn apply(&mut self, entry: u64, event: Event) -> Vec<Effect> {
        if self.current.is_terminal() {
            return Vec::new();
        }
        if entry != self.entry {
            debug!(
                "dropping stale event for entry {} (current {} entry {})",
                entry, self.current, self.entry
            );
            return Vec::new();
        }

        let transition = transition(self.current, event, &mut self.ctx, &self.env);
        self.current = transition.next;
        self.entry += 1;
        transition.effects
    }

    /// Abort the run.
    ///
    /// Runs the current state's timeout handler for the resources it
    /// releases, then parks the machine in `Idle`. Only job releases are
    /// returned. Calling it again does nothing.
    pub fn cancel(&mut self) -> Vec<Effect> {
        if self.current.is_terminal() {
            return Vec::new();
        }

        let mut effects = Vec::new();
        timeout(self.current, &mut self.ctx, &mut effects);
        debug!("{} cancelled", self.current);

        self.current = StateId::Idle;
        self.entry += 1;
        effects.retain(|e| matches!(e, Effect::CancelJob(_)));
        effects
    }

    /// A ping job was created for `entry`.
    ///
    /// Recorded if that BroadbandPing entry is still current; otherwise the
    /// job is orphaned and must be cancelled.
    pub fn job_started(&mut self, entry: u64, id: JobId) -> Vec<Effect> {
        if self.current == StateId::BroadbandPing && entry == self.entry {
            if let Some(previous) = self.ctx.broadband_ping.job.replace(id) {
                return vec![Effect::CancelJob(previous)];
            }
            Vec::new()
        } else {
            debug!("ping job {} started after its state was left", id);
            vec![Effect::CancelJob(id)]
        }
    }

    /// Aggregated result, once the machine reached `Complete`
    pub fn report(&self) -> Option<Report> {
        (self.current == StateId::Complete)
            .then(|| aggregate(&self.ctx, &self.env.profile, self.env.mode))
    }
}
