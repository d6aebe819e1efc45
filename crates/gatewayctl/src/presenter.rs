//! Terminal presentation of diagnostic runs and job results

use gateway_common::diagnostics::{Badge, CheckGroup, DiagnosticObserver, Report};
use gateway_common::jobs::{JobOutcome, JobState};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde_json::Value;
use std::io::IsTerminal;

/// Whether stdout takes colors and progress bars
pub fn stdout_is_rich() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

// ============================================================================
// Run progress
// ============================================================================

/// Progress bar plus one line per check group verdict
pub struct ConsolePresenter {
    bar: Option<ProgressBar>,
    color: bool,
    quiet: bool,
}

impl ConsolePresenter {
    pub fn new(color: bool) -> Self {
        let bar = color.then(|| {
            let bar = ProgressBar::new(100);
            if let Ok(style) =
                ProgressStyle::with_template("{spinner} [{bar:30}] {pos:>3}% {msg}")
            {
                bar.set_style(style.progress_chars("=> "));
            }
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            bar
        });
        Self {
            bar,
            color,
            quiet: false,
        }
    }

    /// No progress output at all (JSON mode)
    pub fn quiet() -> Self {
        Self {
            bar: None,
            color: false,
            quiet: true,
        }
    }

    fn line(&self, text: String) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) => bar.println(text),
            None => println!("{}", text),
        }
    }
}

impl DiagnosticObserver for ConsolePresenter {
    fn show_progress(&mut self, percent: u8, _okay: bool) {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(percent));
        }
    }

    fn show_check(&mut self, group: CheckGroup) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("checking {}", group.label()));
        }
    }

    fn set_status(&mut self, group: CheckGroup, badge: Badge) {
        self.line(status_line(group, badge, self.color));
    }

    fn finished(&mut self, _report: &Report) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn cancelled(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon_with_message("cancelled");
        }
        if !self.quiet {
            eprintln!("Diagnostics cancelled");
        }
    }
}

fn status_line(group: CheckGroup, badge: Badge, color: bool) -> String {
    let mark = match (badge, color) {
        (Badge::Success, true) => "OK".green().to_string(),
        (Badge::Error, true) => "FAIL".red().to_string(),
        (Badge::Success, false) => "OK".to_string(),
        (Badge::Error, false) => "FAIL".to_string(),
    };
    format!("{:<12} {}", group.label(), mark)
}

// ============================================================================
// Report
// ============================================================================

/// Human-readable report: verdict, headline, then numbered findings
pub fn render_report(report: &Report, color: bool) -> String {
    let mut out = String::new();

    let verdict = match (report.passed, color) {
        (true, true) => "PASSED".green().bold().to_string(),
        (false, true) => "FAILED".red().bold().to_string(),
        (true, false) => "PASSED".to_string(),
        (false, false) => "FAILED".to_string(),
    };
    out.push_str(&format!("Diagnostics {}\n", verdict));
    for message in &report.headline {
        out.push_str(&format!("{}\n", message));
    }
    out.push('\n');

    for finding in &report.findings {
        out.push_str(&format!("{:>2}. {}\n", finding.row, finding.message));
    }
    out
}

// ============================================================================
// Jobs and hosts
// ============================================================================

pub fn render_job(outcome: &JobOutcome) -> String {
    let mut out = match outcome.id {
        Some(id) => format!("job {}: {}\n", id, outcome.state),
        None => format!("job not created: {}\n", outcome.state),
    };
    if outcome.state == JobState::ErrorHostname {
        out.push_str("The gateway could not resolve the host.\n");
    }
    if let Some(results) = &outcome.results {
        match serde_json::to_string_pretty(results) {
            Ok(text) => {
                out.push_str(&text);
                out.push('\n');
            }
            Err(e) => out.push_str(&format!("(results not printable: {})\n", e)),
        }
    }
    out
}

/// One line per host: MAC, name, interface and link detail
pub fn render_hosts(body: &Value) -> String {
    let Some(hosts) = body
        .get("hosts")
        .and_then(|h| h.get("hosts"))
        .and_then(Value::as_array)
    else {
        return "No hosts reported\n".to_string();
    };
    if hosts.is_empty() {
        return "No hosts connected\n".to_string();
    }

    let mut out = String::new();
    for host in hosts {
        let config = host.get("config");
        let field = |key: &str| {
            config
                .and_then(|c| c.get(key))
                .and_then(Value::as_str)
                .unwrap_or("-")
        };
        let name = match field("hostname") {
            "-" => field("deviceName"),
            name => name,
        };
        let detail = match (
            config.and_then(|c| c.get("speed")).and_then(Value::as_f64),
            config.and_then(|c| c.get("rssi")).and_then(Value::as_f64),
        ) {
            (Some(speed), _) => format!("{} Mbps", speed),
            (None, Some(rssi)) => format!("{} dBm", rssi),
            (None, None) => String::new(),
        };
        let mac = host.get("macAddress").and_then(Value::as_str).unwrap_or("-");
        out.push_str(&format!(
            "{:<18} {:<24} {:<10} {}\n",
            mac,
            name,
            field("interface"),
            detail
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_line_plain() {
        assert_eq!(
            status_line(CheckGroup::Ethernet, Badge::Error, false).trim_end(),
            format!("{:<12} FAIL", CheckGroup::Ethernet.label())
        );
    }

    #[test]
    fn test_render_hosts() {
        let body = json!({"hosts": {"hosts": [
            {"macAddress": "aa:bb", "config": {"hostname": "laptop", "interface": "wifi", "rssi": -55}},
            {"macAddress": "cc:dd", "config": {"deviceName": "tv", "interface": "ethernet", "speed": 1000}}
        ]}});
        let text = render_hosts(&body);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("aa:bb") && lines[0].contains("laptop") && lines[0].ends_with("-55 dBm"));
        assert!(lines[1].contains("tv") && lines[1].ends_with("1000 Mbps"));

        assert_eq!(render_hosts(&json!({})), "No hosts reported\n");
        assert_eq!(render_hosts(&json!({"hosts": {"hosts": []}})), "No hosts connected\n");
    }

    #[test]
    fn test_render_rejected_job() {
        let text = render_job(&JobOutcome::rejected());
        assert!(text.starts_with("job not created: error_hostname"));
        assert!(text.contains("could not resolve"));
    }
}
