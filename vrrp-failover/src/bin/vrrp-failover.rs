// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to check that HA routers fail over between network
//! nodes

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use clap::Subcommand;
use slog::info;
use slog::Logger;
use vrrp_failover::cmd::fatal;
use vrrp_failover::cmd::CmdError;
use vrrp_failover::control_plane::ControlPlane;
use vrrp_failover::icmp::IcmpPinger;
use vrrp_failover::openstack::OpenStackClient;
use vrrp_failover::ssh::RusshExecutor;
use vrrp_failover::tracker::MastershipTracker;
use vrrp_failover::validation::validate;
use vrrp_failover::validation::ValidationContext;
use vrrp_failover::Config;
use vrrp_failover::FailoverScenario;
use vrrp_failover::ScenarioReport;

#[derive(Debug, Parser)]
#[clap(
    name = "vrrp-failover",
    about = "Verify that an L3 HA router fails over between network nodes"
)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the configuration, then run the failover scenario
    Run {
        #[clap(name = "CONFIG", action)]
        config_file_path: Utf8PathBuf,

        /// Print the report as JSON
        #[clap(long, action)]
        json: bool,
    },
    /// Check the configuration and the control plane without failing over
    Validate {
        #[clap(name = "CONFIG", action)]
        config_file_path: Utf8PathBuf,
    },
    /// Print the agent currently hosting a router's VRRP master
    Master {
        #[clap(name = "CONFIG", action)]
        config_file_path: Utf8PathBuf,

        #[clap(name = "ROUTER_ID", action)]
        router_id: String,
    },
}

impl Command {
    fn config_file_path(&self) -> &Utf8PathBuf {
        match self {
            Command::Run { config_file_path, .. }
            | Command::Validate { config_file_path }
            | Command::Master { config_file_path, .. } => config_file_path,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(cmd_error) = do_run().await {
        fatal(cmd_error);
    }
}

async fn do_run() -> Result<(), CmdError> {
    let args = Args::try_parse().map_err(|err| match err.kind() {
        clap::error::ErrorKind::DisplayHelp
        | clap::error::ErrorKind::DisplayVersion => err.exit(),
        _ => CmdError::Usage(err.to_string().trim_end().to_string()),
    })?;

    let config = Config::from_file(args.command.config_file_path())
        .map_err(|e| CmdError::Failure(anyhow::anyhow!("{}", e)))?;
    let log = config
        .log
        .to_logger("vrrp-failover")
        .context("initializing logger")
        .map_err(CmdError::Failure)?;

    let result = match &args.command {
        Command::Run { json, .. } => cmd_run(&log, &config, *json).await,
        Command::Validate { .. } => cmd_validate(&log, &config).await,
        Command::Master { router_id, .. } => {
            cmd_master(&log, &config, router_id).await
        }
    };
    result.map_err(CmdError::Failure)
}

async fn cmd_run(
    log: &Logger,
    config: &Config,
    json: bool,
) -> anyhow::Result<()> {
    let control_plane = OpenStackClient::connect(log, &config.openstack)
        .await
        .context("connecting to OpenStack")?;
    check_config(config, &control_plane).await?;

    let default_key = match &config.ssh.default_private_key {
        None => None,
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading private key {}", path))?,
        ),
    };
    let executor = RusshExecutor::new(log, config.ssh.connect_timeout());
    let pinger = IcmpPinger::new(config.ping.reply_timeout());
    let scenario = FailoverScenario::new(
        log,
        &control_plane,
        &executor,
        &pinger,
        config.poll,
        config.ssh.wait(),
        default_key,
    );

    let s = &config.scenario;
    let report = scenario
        .run_for_server(
            &s.server_id,
            s.floating_ip(),
            s.tenant_networks.clone(),
            s.l3_nodes.clone(),
            s.command.clone(),
        )
        .await
        .context("running failover scenario")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn cmd_validate(log: &Logger, config: &Config) -> anyhow::Result<()> {
    let control_plane = OpenStackClient::connect(log, &config.openstack)
        .await
        .context("connecting to OpenStack")?;
    check_config(config, &control_plane).await?;
    info!(log, "configuration is valid");
    println!("configuration is valid");
    Ok(())
}

async fn cmd_master(
    log: &Logger,
    config: &Config,
    router_id: &str,
) -> anyhow::Result<()> {
    let control_plane = OpenStackClient::connect(log, &config.openstack)
        .await
        .context("connecting to OpenStack")?;
    let tracker = MastershipTracker::new(log, &control_plane, config.poll);
    let master = tracker.get_master_agent(router_id).await?;
    println!("{}", master);
    Ok(())
}

/// Runs every precondition check, including those that need the control
/// plane
async fn check_config(
    config: &Config,
    control_plane: &dyn ControlPlane,
) -> anyhow::Result<()> {
    let (service_types, networks) = futures::try_join!(
        control_plane.service_types(),
        control_plane.list_networks(),
    )
    .context("querying control plane")?;

    let s = &config.scenario;
    validate(&ValidationContext {
        command: &s.command,
        l3_nodes: &s.l3_nodes,
        default_key_available: config.ssh.default_private_key.is_some(),
        poll: config.poll,
        ssh_wait: config.ssh.wait(),
        floating_network: s.floating_network.as_deref(),
        service_types: Some(&service_types),
        networks: Some(&networks),
    })?;
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    println!(
        "router {}: VRRP master moved from {} to {}",
        report.router_id, report.old_master, report.new_master
    );
    for action in &report.actions {
        println!(
            "    {:<40} {}",
            action.name,
            humantime::format_duration(action.duration)
        );
    }
}
