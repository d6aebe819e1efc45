//! Verdict and findings of a completed run.
//!
//! A pure fold over the [`RunContext`]: the overall pass/fail plus the
//! ordered list of findings each check contributes.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::{RunContext, StateId, TelephonyStatus};
use crate::provisioning::{ProvisioningMode, ProvisioningProfile};

/// Headline wording of the final verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Standard,
    /// Run started from a "my connection has a problem" flow
    Troubleshoot,
}

/// Message shown to the user.
///
/// Each message has a stable code for the localization layer; `text()` is
/// the English rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum Message {
    #[serde(rename = "c_lo13")]
    TemperatureNormal,
    #[serde(rename = "c_lo12")]
    TemperatureHigh,
    #[serde(rename = "c_lo14")]
    BroadbandUp,
    #[serde(rename = "c_lo20")]
    BroadbandDown,
    #[serde(rename = "c_lo17")]
    DualStackValid,
    #[serde(rename = "c_lo15")]
    Ipv6Valid,
    #[serde(rename = "c_lo16")]
    Ipv4Valid,
    #[serde(rename = "c_lo18")]
    Ipv4Invalid,
    #[serde(rename = "c_lo19")]
    Ipv6Invalid,
    #[serde(rename = "c_lo21")]
    BroadbandReady,
    #[serde(rename = "c_lo22")]
    BroadbandNotReady,
    #[serde(rename = "c_dn18")]
    NoVoiceService,
    #[serde(rename = "c_dn16")]
    LineNotReady { index: u32 },
    #[serde(rename = "c_lo24")]
    WiredLowSpeed,
    #[serde(rename = "c_lo23")]
    WiredNoLink,
    #[serde(rename = "c_dn05")]
    Band2gDisabled,
    #[serde(rename = "c_dn19")]
    Band5gDisabled,
    #[serde(rename = "c_dn07")]
    LowSignal { client_mac: String },
    #[serde(rename = "c_dn04")]
    MoveCloser,
    #[serde(rename = "c_dn02")]
    ConnectionWorking,
    #[serde(rename = "c_dn06")]
    ConnectionProblem,
    #[serde(rename = "c_lo10")]
    ProblemFixed,
    #[serde(rename = "c_lo11")]
    EnjoyBroadband,
    #[serde(rename = "c_lo25")]
    ProblemNotFixed,
}

impl Message {
    pub fn code(&self) -> &'static str {
        match self {
            Message::TemperatureNormal => "c_lo13",
            Message::TemperatureHigh => "c_lo12",
            Message::BroadbandUp => "c_lo14",
            Message::BroadbandDown => "c_lo20",
            Message::DualStackValid => "c_lo17",
            Message::Ipv6Valid => "c_lo15",
            Message::Ipv4Valid => "c_lo16",
            Message::Ipv4Invalid => "c_lo18",
            Message::Ipv6Invalid => "c_lo19",
            Message::BroadbandReady => "c_lo21",
            Message::BroadbandNotReady => "c_lo22",
            Message::NoVoiceService => "c_dn18",
            Message::LineNotReady { .. } => "c_dn16",
            Message::WiredLowSpeed => "c_lo24",
            Message::WiredNoLink => "c_lo23",
            Message::Band2gDisabled => "c_dn05",
            Message::Band5gDisabled => "c_dn19",
            Message::LowSignal { .. } => "c_dn07",
            Message::MoveCloser => "c_dn04",
            Message::ConnectionWorking => "c_dn02",
            Message::ConnectionProblem => "c_dn06",
            Message::ProblemFixed => "c_lo10",
            Message::EnjoyBroadband => "c_lo11",
            Message::ProblemNotFixed => "c_lo25",
        }
    }

    pub fn text(&self) -> String {
        match self {
            Message::TemperatureNormal => "Gateway temperature is normal.".into(),
            Message::TemperatureHigh => {
                "Gateway temperature is too high. Make sure it stands upright and is well ventilated."
                    .into()
            }
            Message::BroadbandUp => "Broadband is up.".into(),
            Message::BroadbandDown => {
                "Broadband is down. Check the coax cable is firmly connected.".into()
            }
            Message::DualStackValid => "IPv4 and IPv6 addresses are valid.".into(),
            Message::Ipv6Valid => "IPv6 address is valid.".into(),
            Message::Ipv4Valid => "IPv4 address is valid.".into(),
            Message::Ipv4Invalid => "IPv4 address is not valid.".into(),
            Message::Ipv6Invalid => "IPv6 address is not valid.".into(),
            Message::BroadbandReady => "Broadband is ready.".into(),
            Message::BroadbandNotReady => "Broadband is down.".into(),
            Message::NoVoiceService => "No voice service.".into(),
            Message::LineNotReady { index } => format!("Telephone line {} is not ready.", index),
            Message::WiredLowSpeed => {
                "An Ethernet device is connected at low speed. Check the cable.".into()
            }
            Message::WiredNoLink => "An Ethernet link keeps dropping. Check the cable.".into(),
            Message::Band2gDisabled => "Primary 2.4 GHz WiFi is disabled.".into(),
            Message::Band5gDisabled => "Primary 5 GHz WiFi is disabled.".into(),
            Message::LowSignal { client_mac } => format!(
                "Device {} has low signal strength, please move it closer to the gateway.",
                client_mac
            ),
            Message::MoveCloser => "Place your WiFi device near the gateway.".into(),
            Message::ConnectionWorking => "Your broadband connection is working.".into(),
            Message::ConnectionProblem => "Your broadband connection has a problem.".into(),
            Message::ProblemFixed => "The problem is fixed.".into(),
            Message::EnjoyBroadband => "Enjoy your super fast broadband.".into(),
            Message::ProblemNotFixed => "The problem is not fixed yet.".into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// One numbered line of the check list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub row: u32,
    pub check: StateId,
    pub message: Message,
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub passed: bool,
    pub mode: RunMode,
    pub provisioning: ProvisioningMode,
    pub headline: Vec<Message>,
    pub findings: Vec<Finding>,
    pub context: RunContext,
}

// ============================================================================
// Aggregation
// ============================================================================

/// Fold the per-check results into a report
pub fn aggregate(ctx: &RunContext, profile: &ProvisioningProfile, mode: RunMode) -> Report {
    let passed = overall_passed(ctx, profile);

    let mut findings = Vec::new();
    let mut row = 1;
    for check in StateId::CHECKS {
        row = comments(check, ctx, profile, row, &mut findings);
    }

    Report {
        passed,
        mode,
        provisioning: profile.mode,
        headline: headline(passed, mode),
        findings,
        context: ctx.clone(),
    }
}

/// A failed telephony query fails the run; lines down only add findings.
pub fn overall_passed(ctx: &RunContext, profile: &ProvisioningProfile) -> bool {
    ctx.tuner_temperature.okay
        && ctx.cablemodem.okay
        && (profile.supports_ipv4() || profile.supports_ipv6())
        && ctx.broadband_ping.okay
        && ctx.telephony != TelephonyStatus::Failed
        && ctx.wired.okay
        && ctx.wireless_2g.okay
        && ctx.wireless_5g.okay
        && ctx.wireless_clients.okay
}

pub fn headline(passed: bool, mode: RunMode) -> Vec<Message> {
    match (passed, mode) {
        (true, RunMode::Standard) => vec![Message::ConnectionWorking],
        (true, RunMode::Troubleshoot) => vec![Message::ProblemFixed, Message::EnjoyBroadband],
        (false, RunMode::Standard) => vec![Message::ConnectionProblem],
        (false, RunMode::Troubleshoot) => vec![Message::ProblemNotFixed],
    }
}

/// Append `check`'s findings starting at `row`; returns the next free row.
pub fn comments(
    check: StateId,
    ctx: &RunContext,
    profile: &ProvisioningProfile,
    row: u32,
    out: &mut Vec<Finding>,
) -> u32 {
    let mut row = row;
    let mut add = |message: Message| {
        out.push(Finding {
            row,
            check,
            message,
        });
        row += 1;
    };

    match check {
        StateId::TunerTemperature => add(if ctx.tuner_temperature.okay {
            Message::TemperatureNormal
        } else {
            Message::TemperatureHigh
        }),
        StateId::Cablemodem => add(if ctx.cablemodem.okay {
            Message::BroadbandUp
        } else {
            Message::BroadbandDown
        }),
        StateId::ProvisioningMode => {
            let v4 = ctx.provisioning.ipv4_valid;
            let v6 = ctx.provisioning.ipv6_valid;
            if profile.supports_dualstack() {
                match (v6, v4) {
                    (true, true) => add(Message::DualStackValid),
                    (true, false) => {
                        add(Message::Ipv6Valid);
                        add(Message::Ipv4Invalid);
                    }
                    (false, true) => {
                        add(Message::Ipv4Valid);
                        add(Message::Ipv6Invalid);
                    }
                    (false, false) => {
                        add(Message::Ipv4Invalid);
                        add(Message::Ipv6Invalid);
                    }
                }
            } else if profile.ipv4_only() {
                add(if v4 { Message::Ipv4Valid } else { Message::Ipv4Invalid });
            } else if profile.ipv6_only() {
                add(if v6 { Message::Ipv6Valid } else { Message::Ipv6Invalid });
            }
        }
        StateId::BroadbandPing => add(if ctx.broadband_ping.okay {
            Message::BroadbandReady
        } else {
            Message::BroadbandNotReady
        }),
        StateId::Telephony => match &ctx.telephony {
            TelephonyStatus::Disabled => add(Message::NoVoiceService),
            TelephonyStatus::LinesDown(lines) => {
                for index in lines {
                    add(Message::LineNotReady { index: *index });
                }
            }
            _ => {}
        },
        StateId::Wired => {
            if !ctx.wired.okay {
                if ctx.wired.low_speed {
                    add(Message::WiredLowSpeed);
                }
                if ctx.wired.no_link {
                    add(Message::WiredNoLink);
                }
            }
        }
        StateId::Wireless2g => {
            if !ctx.wireless_2g.okay {
                add(Message::Band2gDisabled);
            }
        }
        StateId::Wireless5g => {
            if !ctx.wireless_5g.okay {
                add(Message::Band5gDisabled);
            }
        }
        StateId::WirelessClients => {
            if !ctx.wireless_clients.okay {
                for host in ctx.wireless_clients.hosts.iter().filter(|h| h.low_signal) {
                    add(Message::LowSignal {
                        client_mac: host.mac_address.clone(),
                    });
                }
                add(Message::MoveCloser);
            }
        }
        StateId::Idle | StateId::Complete => {}
    }

    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::state::{CheckResult, WifiHost};

    fn all_good() -> RunContext {
        let mut ctx = RunContext::default();
        ctx.tuner_temperature.okay = true;
        ctx.cablemodem.okay = true;
        ctx.provisioning.ipv4_valid = true;
        ctx.provisioning.ipv6_valid = true;
        ctx.provisioning.okay = true;
        ctx.broadband_ping.okay = true;
        ctx.telephony = TelephonyStatus::Operational;
        ctx.wired.okay = true;
        ctx.wireless_2g = CheckResult { okay: true };
        ctx.wireless_5g = CheckResult { okay: true };
        ctx.wireless_clients.okay = true;
        ctx
    }

    fn dual() -> ProvisioningProfile {
        ProvisioningProfile::new(ProvisioningMode::DualStack)
    }

    #[test]
    fn test_all_good_passes() {
        let report = aggregate(&all_good(), &dual(), RunMode::Standard);
        assert!(report.passed);
        assert_eq!(report.headline, vec![Message::ConnectionWorking]);

        let codes: Vec<&str> = report.findings.iter().map(|f| f.message.code()).collect();
        assert_eq!(codes, vec!["c_lo13", "c_lo14", "c_lo17", "c_lo21"]);
        let rows: Vec<u32> = report.findings.iter().map(|f| f.row).collect();
        assert_eq!(rows, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_telephony_asymmetry() {
        let mut ctx = all_good();
        ctx.telephony = TelephonyStatus::LinesDown(vec![1, 2]);
        let report = aggregate(&ctx, &dual(), RunMode::Standard);
        assert!(report.passed);
        let lines: Vec<&Message> = report
            .findings
            .iter()
            .filter(|f| f.check == StateId::Telephony)
            .map(|f| &f.message)
            .collect();
        assert_eq!(
            lines,
            vec![&Message::LineNotReady { index: 1 }, &Message::LineNotReady { index: 2 }]
        );

        ctx.telephony = TelephonyStatus::Failed;
        assert!(!overall_passed(&ctx, &dual()));

        ctx.telephony = TelephonyStatus::Disabled;
        assert!(overall_passed(&ctx, &dual()));
    }

    #[test]
    fn test_unknown_provisioning_fails() {
        let report = aggregate(
            &all_good(),
            &ProvisioningProfile::default(),
            RunMode::Standard,
        );
        assert!(!report.passed);
        assert!(report
            .findings
            .iter()
            .all(|f| f.check != StateId::ProvisioningMode));
    }

    #[test]
    fn test_provisioning_comments_by_mode() {
        let mut ctx = all_good();
        ctx.provisioning.ipv4_valid = false;

        let mut out = Vec::new();
        let next = comments(StateId::ProvisioningMode, &ctx, &dual(), 5, &mut out);
        assert_eq!(next, 7);
        assert_eq!(out[0].message, Message::Ipv6Valid);
        assert_eq!(out[1].message, Message::Ipv4Invalid);
        assert_eq!(out[1].row, 6);

        let mut out = Vec::new();
        let v4 = ProvisioningProfile::new(ProvisioningMode::Ipv4);
        comments(StateId::ProvisioningMode, &ctx, &v4, 1, &mut out);
        assert_eq!(out[0].message, Message::Ipv4Invalid);
    }

    #[test]
    fn test_weak_clients_named_then_hint() {
        let mut ctx = all_good();
        ctx.wireless_clients.okay = false;
        ctx.wireless_clients.hosts = vec![
            WifiHost {
                mac_address: "aa:bb:cc:dd:ee:01".into(),
                rssi: Some(-70),
                low_signal: true,
            },
            WifiHost {
                mac_address: "aa:bb:cc:dd:ee:02".into(),
                rssi: Some(-50),
                low_signal: false,
            },
        ];

        let report = aggregate(&ctx, &dual(), RunMode::Troubleshoot);
        assert!(!report.passed);
        assert_eq!(report.headline, vec![Message::ProblemNotFixed]);

        let tail: Vec<&Message> = report.findings.iter().rev().take(2).map(|f| &f.message).collect();
        assert_eq!(tail[0], &Message::MoveCloser);
        assert_eq!(
            tail[1],
            &Message::LowSignal {
                client_mac: "aa:bb:cc:dd:ee:01".into()
            }
        );
    }

    #[test]
    fn test_wired_findings_only_on_failure() {
        let mut ctx = all_good();
        ctx.wired.low_speed = true;
        let mut out = Vec::new();
        comments(StateId::Wired, &ctx, &dual(), 1, &mut out);
        assert!(out.is_empty());

        ctx.wired.okay = false;
        ctx.wired.no_link = true;
        comments(StateId::Wired, &ctx, &dual(), 1, &mut out);
        let codes: Vec<&str> = out.iter().map(|f| f.message.code()).collect();
        assert_eq!(codes, vec!["c_lo24", "c_lo23"]);
    }

    #[test]
    fn test_message_serializes_with_code() {
        let value = serde_json::to_value(Message::LineNotReady { index: 2 }).unwrap();
        assert_eq!(value, serde_json::json!({"code": "c_dn16", "index": 2}));
    }
}
