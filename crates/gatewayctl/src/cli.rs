//! Command line definition

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use gateway_common::jobs::JobKind;
use gateway_common::rest::paths;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gatewayctl")]
#[command(about = "Broadband gateway diagnostics", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ~/.config/gateway-diag/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Gateway URL, overrides the configuration
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full diagnostic check list
    Diagnose {
        /// Word the verdict for a reported problem
        #[arg(long)]
        troubleshoot: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ping a host from the gateway
    Ping {
        host: String,

        /// Gateway interface to ping from (e.g. wan0)
        #[arg(long)]
        interface: Option<String>,

        /// Number of pings
        #[arg(long)]
        count: Option<u32>,

        /// Data block size in bytes
        #[arg(long)]
        size: Option<u32>,
    },

    /// Trace the route to a host from the gateway
    Traceroute {
        host: String,

        #[arg(long)]
        interface: Option<String>,

        #[arg(long)]
        max_hops: Option<u32>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Delete leftover diagnostic jobs on the gateway
    Cleanup {
        #[arg(long, value_enum, default_value_t = KindArg::All)]
        kind: KindArg,
    },

    /// List connected hosts
    Hosts {
        #[arg(long, value_enum)]
        interface: Option<InterfaceArg>,
    },

    /// Show or create the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long, conflicts_with = "init")]
        show: bool,

        /// Write a default configuration to the user config path
        #[arg(long)]
        init: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Ping,
    Traceroute,
    All,
}

impl KindArg {
    pub fn kinds(self) -> Vec<JobKind> {
        match self {
            KindArg::Ping => vec![JobKind::Ping],
            KindArg::Traceroute => vec![JobKind::Traceroute],
            KindArg::All => JobKind::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InterfaceArg {
    Ethernet,
    Wifi,
}

impl InterfaceArg {
    /// Host listing path for an optional interface filter
    pub fn hosts_path(interface: Option<Self>) -> &'static str {
        match interface {
            Some(InterfaceArg::Ethernet) => paths::ETHERNET_HOSTS,
            Some(InterfaceArg::Wifi) => paths::WIFI_HOSTS,
            None => paths::CONNECTED_HOSTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gatewayctl", "diagnose", "--json", "-vv", "--url", "http://10.0.0.1"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.url.as_deref(), Some("http://10.0.0.1"));
        assert!(matches!(
            cli.command,
            Commands::Diagnose {
                troubleshoot: false,
                json: true
            }
        ));
    }

    #[test]
    fn test_cleanup_defaults_to_all_kinds() {
        let cli = Cli::try_parse_from(["gatewayctl", "cleanup"]).unwrap();
        let Commands::Cleanup { kind } = cli.command else {
            panic!("cleanup expected");
        };
        assert_eq!(kind.kinds(), JobKind::ALL.to_vec());
    }

    #[test]
    fn test_config_flags_conflict() {
        assert!(Cli::try_parse_from(["gatewayctl", "config", "--show", "--init"]).is_err());
    }
}
