//! Log setup for gatewayctl
//!
//! Logs go to stderr so `--json` output on stdout stays clean. `RUST_LOG`
//! wins over `-v` when set.

use tracing_subscriber::EnvFilter;

/// Default filter for a `-v` count
pub fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "gateway_common=debug,gatewayctl=debug,warn",
        _ => "trace",
    }
}

pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    // A second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(default_filter(0), "warn");
        assert!(default_filter(1).contains("gateway_common=debug"));
        assert_eq!(default_filter(5), "trace");
    }
}
