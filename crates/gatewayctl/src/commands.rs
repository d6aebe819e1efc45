//! Command implementations

use anyhow::{bail, Context, Result};
use gateway_common::diagnostics::{CancelToken, DiagnosticRun, RunMode, RunOutcome};
use gateway_common::jobs::{
    JobManager, JobOutcome, JobRequest, JobStart, JobState, PingRequest, TraceRouteRequest,
};
use gateway_common::{GatewayApi, GatewayConfig, ProvisioningProfile, RestClient};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands, InterfaceArg, KindArg};
use crate::presenter::{render_hosts, render_job, render_report, stdout_is_rich, ConsolePresenter};

/// Traceroutes walk many hops; give them longer than a ping
const TRACEROUTE_TIMEOUT: Duration = Duration::from_secs(120);

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Passed,
    Error,
    /// Diagnostics ran and found a problem, or a job did not complete
    Failed,
    Cancelled,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Passed => 0,
            Exit::Error => 1,
            Exit::Failed => 2,
            Exit::Cancelled => 130,
        }
    }
}

pub async fn execute(cli: Cli) -> Result<Exit> {
    let Cli {
        config: config_path,
        url,
        command,
        ..
    } = cli;

    let command = match command {
        Commands::Config { show, init } => {
            return config_command(config_path.as_deref(), url.as_deref(), show, init);
        }
        command => command,
    };

    let config = load_config(config_path.as_deref(), url.as_deref())?;
    let api: Arc<dyn GatewayApi> = Arc::new(connect(&config).await?);
    run_session(api, &config, command).await
}

/// Run one gateway command, then end the session whatever the outcome
pub async fn run_session(
    api: Arc<dyn GatewayApi>,
    config: &GatewayConfig,
    command: Commands,
) -> Result<Exit> {
    let result = match command {
        Commands::Diagnose { troubleshoot, json } => {
            diagnose(api.clone(), config, troubleshoot, json).await
        }
        Commands::Ping {
            host,
            interface,
            count,
            size,
        } => {
            let mut request = PingRequest::new(host);
            request.interface = interface;
            request.number_of_pings = count;
            request.data_block_size = size;
            run_job(api.clone(), config, request.into(), config.diagnostics.ping_timeout()).await
        }
        Commands::Traceroute {
            host,
            interface,
            max_hops,
            port,
        } => {
            let mut request = TraceRouteRequest::new(host);
            request.interface = interface;
            request.max_hop_count = max_hops;
            request.port = port;
            run_job(api.clone(), config, request.into(), TRACEROUTE_TIMEOUT).await
        }
        Commands::Cleanup { kind } => cleanup(api.clone(), kind).await,
        Commands::Hosts { interface } => hosts(api.as_ref(), interface).await,
        Commands::Config { .. } => Ok(Exit::Passed),
    };

    if let Err(e) = api.logout().await {
        warn!("logout failed: {}", e);
    }
    result
}

// ============================================================================
// Session
// ============================================================================

fn load_config(path: Option<&Path>, url: Option<&str>) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load(path).context("failed to load configuration")?;
    if let Some(url) = url {
        config.gateway.url = url.to_string();
        config.validate().context("invalid --url")?;
    }
    Ok(config)
}

/// Build the client and log in when a password is available
async fn connect(config: &GatewayConfig) -> Result<RestClient> {
    let client = RestClient::new(&config.gateway)?;

    match std::env::var(&config.gateway.password_env) {
        Ok(password) if !password.is_empty() => {
            client
                .login(&password)
                .await
                .with_context(|| format!("login to {} failed", client.base_url()))?;
        }
        _ => debug!(
            "{} not set, talking to the gateway without a session",
            config.gateway.password_env
        ),
    }

    Ok(client)
}

// ============================================================================
// diagnose
// ============================================================================

async fn diagnose(
    api: Arc<dyn GatewayApi>,
    config: &GatewayConfig,
    troubleshoot: bool,
    json_output: bool,
) -> Result<Exit> {
    let mut settings = config.diagnostics.clone();
    if troubleshoot {
        settings.mode = RunMode::Troubleshoot;
    }

    let token = CancelToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };

    let profile = tokio::select! {
        biased;
        _ = token.cancelled() => {
            interrupt.abort();
            return Ok(Exit::Cancelled);
        }
        profile = ProvisioningProfile::load(api.as_ref()) => profile,
    };
    let profile = match profile {
        Ok(profile) => profile,
        Err(e) => {
            interrupt.abort();
            return Err(e).context("failed to read the provisioning mode");
        }
    };
    info!("gateway provisioning: {}", profile.mode);

    let jobs = JobManager::new(api.clone()).with_poll_interval(settings.poll_interval());
    let mut run = DiagnosticRun::new(api, jobs, profile, settings).with_cancel_token(token);

    let mut presenter = if json_output {
        ConsolePresenter::quiet()
    } else {
        ConsolePresenter::new(stdout_is_rich())
    };
    let outcome = run.run(&mut presenter).await;
    interrupt.abort();

    let report = match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Cancelled => return Ok(Exit::Cancelled),
    };

    if json_output {
        let document = json!({
            "id": run.id().to_string(),
            "startedAt": run.started_at(),
            "finishedAt": run.finished_at(),
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        println!();
        print!("{}", render_report(&report, stdout_is_rich()));
    }

    Ok(if report.passed { Exit::Passed } else { Exit::Failed })
}

// ============================================================================
// ping / traceroute
// ============================================================================

enum Wait {
    Finished(JobOutcome),
    Dropped,
    TimedOut,
    Interrupted,
}

async fn run_job(
    api: Arc<dyn GatewayApi>,
    config: &GatewayConfig,
    request: JobRequest,
    deadline: Duration,
) -> Result<Exit> {
    let kind = request.kind();
    let jobs = JobManager::new(api).with_poll_interval(config.diagnostics.poll_interval());

    let ticket = match jobs
        .start(request)
        .await
        .with_context(|| format!("failed to start {} job", kind))?
    {
        JobStart::Started(ticket) => ticket,
        JobStart::Rejected(outcome) => {
            print!("{}", render_job(&outcome));
            return Ok(Exit::Failed);
        }
    };
    let id = ticket.id;
    println!("{} job {} started", kind, id);

    let wait = tokio::select! {
        _ = tokio::signal::ctrl_c() => Wait::Interrupted,
        finished = timeout(deadline, ticket.finished) => match finished {
            Ok(Ok(outcome)) => Wait::Finished(outcome),
            Ok(Err(_)) => Wait::Dropped,
            Err(_) => Wait::TimedOut,
        },
    };

    jobs.cancel(kind, id)
        .await
        .with_context(|| format!("failed to delete {} job {}", kind, id))?;

    match wait {
        Wait::Finished(outcome) => {
            print!("{}", render_job(&outcome));
            Ok(if outcome.state == JobState::Complete {
                Exit::Passed
            } else {
                Exit::Failed
            })
        }
        Wait::Dropped => {
            eprintln!("{} job {} ended without a result", kind, id);
            Ok(Exit::Failed)
        }
        Wait::TimedOut => {
            eprintln!("{} job {} gave no result within {:?}", kind, id, deadline);
            Ok(Exit::Failed)
        }
        Wait::Interrupted => Ok(Exit::Cancelled),
    }
}

// ============================================================================
// cleanup / hosts
// ============================================================================

async fn cleanup(api: Arc<dyn GatewayApi>, kind: KindArg) -> Result<Exit> {
    let jobs = JobManager::new(api);
    for kind in kind.kinds() {
        let removed = jobs
            .cleanup(kind)
            .await
            .with_context(|| format!("failed to clean up {} jobs", kind))?;
        println!("{}: removed {} job(s)", kind, removed);
    }
    Ok(Exit::Passed)
}

async fn hosts(api: &dyn GatewayApi, interface: Option<InterfaceArg>) -> Result<Exit> {
    let path = InterfaceArg::hosts_path(interface);
    let body = api
        .get(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    print!("{}", render_hosts(&body));
    Ok(Exit::Passed)
}

// ============================================================================
// config
// ============================================================================

fn config_command(path: Option<&Path>, url: Option<&str>, show: bool, init: bool) -> Result<Exit> {
    if init {
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => GatewayConfig::user_config_path().context("no user config directory")?,
        };
        init_config(&target)?;
        println!("Wrote default configuration to {}", target.display());
        return Ok(Exit::Passed);
    }

    if !show {
        debug!("config without flags, showing the effective configuration");
    }
    let config = load_config(path, url)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(Exit::Passed)
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    GatewayConfig::default()
        .save_to(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
