// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The VRRP failover scenario
//!
//! Given a server reachable through a floating IP, the scenario finds the
//! HA router in front of it and the network node currently hosting the
//! router's VRRP master.  It then runs a failure-inducing command on that node
//! and checks both that the server stays reachable and that mastership moved
//! to a different agent.

use crate::atomic::AtomicAction;
use crate::atomic::AtomicActions;
use crate::config::PollConfig;
use crate::control_plane::ControlPlane;
use crate::control_plane::ControlPlaneError;
use crate::icmp::Pinger;
use crate::injector::FailoverError;
use crate::injector::FailoverInjector;
use crate::reachability::ReachabilityError;
use crate::reachability::ReachabilityProbe;
use crate::router::get_router;
use crate::router::RouterLookupError;
use crate::ssh::RemoteExecutor;
use crate::tracker::MastershipTracker;
use crate::tracker::TrackerError;
use crate::types::Agent;
use crate::types::CommandSpec;
use crate::types::FloatingIp;
use crate::types::L3NodeTable;
use crate::types::RouterId;
use crate::types::Server;
use crate::types::TenantNetwork;
use serde::Serialize;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use thiserror::Error;

pub const ACTION_MASTER_INIT: &str = "VRRP.get_master_agent.init";
pub const ACTION_PING_INIT: &str = "VRRP.wait_for_ping.init_server";
pub const ACTION_FAILOVER: &str = "VRRP.failover";
pub const ACTION_PING_AFTER: &str = "VRRP.wait_for_ping.after_failover";
pub const ACTION_MASTER_AFTER: &str = "VRRP.get_master_agent.after_failover";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("resolving router")]
    RouterLookup(#[from] RouterLookupError),
    #[error("resolving master agent")]
    Tracker(#[from] TrackerError),
    #[error("waiting for server to answer ping")]
    Reachability(#[from] ReachabilityError),
    #[error("injecting failover")]
    Failover(#[from] FailoverError),
    #[error("querying control plane")]
    ControlPlane(#[from] ControlPlaneError),
    #[error("no credentials for L3 node \"{0}\"")]
    UnknownHost(String),
    #[error("{0}")]
    Assertion(String),
}

/// What the scenario runs against
#[derive(Clone, Debug)]
pub struct ScenarioInput {
    pub server: Server,
    pub floating_ip: FloatingIp,
    pub tenant_networks: Vec<TenantNetwork>,
    pub l3_nodes: L3NodeTable,
    pub command: CommandSpec,
}

/// Outcome of a successful run
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioReport {
    pub router_id: RouterId,
    pub old_master: Agent,
    pub new_master: Agent,
    pub actions: Vec<AtomicAction>,
}

pub struct FailoverScenario<'a> {
    log: Logger,
    control_plane: &'a dyn ControlPlane,
    executor: &'a dyn RemoteExecutor,
    pinger: &'a dyn Pinger,
    poll: PollConfig,
    ssh_wait: PollConfig,
    default_key: Option<String>,
}

impl<'a> FailoverScenario<'a> {
    pub fn new(
        log: &Logger,
        control_plane: &'a dyn ControlPlane,
        executor: &'a dyn RemoteExecutor,
        pinger: &'a dyn Pinger,
        poll: PollConfig,
        ssh_wait: PollConfig,
        default_key: Option<String>,
    ) -> FailoverScenario<'a> {
        FailoverScenario {
            log: log.new(o!("component" => "FailoverScenario")),
            control_plane,
            executor,
            pinger,
            poll,
            ssh_wait,
            default_key,
        }
    }

    /// Fetches `server_id` from the control plane and runs the scenario
    /// against it
    pub async fn run_for_server(
        &self,
        server_id: &str,
        floating_ip: FloatingIp,
        tenant_networks: Vec<TenantNetwork>,
        l3_nodes: L3NodeTable,
        command: CommandSpec,
    ) -> Result<ScenarioReport, ScenarioError> {
        let server = self.control_plane.get_server(server_id).await?;
        self.run(&ScenarioInput {
            server,
            floating_ip,
            tenant_networks,
            l3_nodes,
            command,
        })
        .await
    }

    /// Runs the scenario, logging the steps that finished before any failure
    pub async fn run(
        &self,
        input: &ScenarioInput,
    ) -> Result<ScenarioReport, ScenarioError> {
        let mut actions = AtomicActions::new();
        let result = self.run_with_actions(input, &mut actions).await;
        if let Err(error) = &result {
            for action in actions.actions() {
                warn!(self.log, "action before failure";
                    "action" => &action.name,
                    "duration" => ?action.duration,
                    "succeeded" => action.succeeded,
                );
            }
            warn!(self.log, "failover scenario failed";
                "error" => %error,
                "actions_recorded" => actions.actions().len(),
            );
        }
        result
    }

    /// Runs the scenario, recording each step into `actions`
    ///
    /// `actions` keeps the steps that finished when an error is returned,
    /// including the failed one.
    pub async fn run_with_actions(
        &self,
        input: &ScenarioInput,
        actions: &mut AtomicActions,
    ) -> Result<ScenarioReport, ScenarioError> {
        let log = &self.log;
        let tracker =
            MastershipTracker::new(log, self.control_plane, self.poll);
        let probe = ReachabilityProbe::new(log, self.pinger, self.poll);
        let injector = FailoverInjector::new(
            log,
            self.executor,
            self.ssh_wait,
            self.default_key.clone(),
        );

        let router_id = get_router(
            log,
            &input.server,
            &input.floating_ip,
            &input.tenant_networks,
        )?;
        let log = log.new(o!("router_id" => router_id.clone()));
        info!(log, "starting failover scenario";
            "server_id" => &input.server.id,
            "floating_ip" => %input.floating_ip.ip,
        );

        let old_master = actions
            .time(
                &log,
                ACTION_MASTER_INIT,
                tracker.get_master_agent(&router_id),
            )
            .await?;
        actions
            .time(
                &log,
                ACTION_PING_INIT,
                probe.wait_for_ping(input.floating_ip.ip),
            )
            .await?;

        let Some(host) = input.l3_nodes.get(&old_master.host) else {
            return Err(ScenarioError::UnknownHost(old_master.host.clone()));
        };
        actions
            .time(
                &log,
                ACTION_FAILOVER,
                injector.failover(host, &input.command),
            )
            .await?;

        actions
            .time(
                &log,
                ACTION_PING_AFTER,
                probe.wait_for_ping(input.floating_ip.ip),
            )
            .await?;
        let new_master = actions
            .time(
                &log,
                ACTION_MASTER_AFTER,
                tracker.get_master_agent(&router_id),
            )
            .await?;

        if new_master.id == old_master.id {
            return Err(ScenarioError::Assertion(
                "router remains ACTIVE on the same node".to_string(),
            ));
        }

        info!(log, "router failed over";
            "old_master" => %old_master,
            "new_master" => %new_master,
        );
        Ok(ScenarioReport {
            router_id,
            old_master,
            new_master,
            actions: actions.actions().to_vec(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::icmp::IcmpStatus;
    use crate::sim::SimControlPlane;
    use crate::sim::SimPinger;
    use crate::sim::SimRemoteExecutor;
    use crate::types::HaState;
    use crate::types::HostCredential;
    use std::collections::BTreeMap;
    use vrrp_test_utils::dev::test_setup_log;

    const POLL: PollConfig = PollConfig { timeout_secs: 10, interval_secs: 1 };

    fn agent(id: &str, host: &str, ha_state: HaState) -> Agent {
        Agent {
            id: id.to_string(),
            host: host.to_string(),
            ha_state,
            alive: Some(true),
            admin_state_up: Some(true),
        }
    }

    fn input() -> ScenarioInput {
        let fip = "172.24.4.10".parse().unwrap();
        ScenarioInput {
            server: Server {
                id: "vm1".to_string(),
                name: "vm1".to_string(),
                networks: BTreeMap::from([(
                    "private".to_string(),
                    vec!["10.0.0.5".parse().unwrap(), fip],
                )]),
            },
            floating_ip: FloatingIp { ip: fip, fixed_ip: None },
            tenant_networks: vec![TenantNetwork {
                name: "private".to_string(),
                router_id: Some("r1".to_string()),
            }],
            l3_nodes: L3NodeTable::from([(
                "net1".to_string(),
                HostCredential {
                    address: "10.35.186.187".to_string(),
                    port: 21,
                    username: "root".to_string(),
                    password: Some("123456".to_string()),
                    key_filename: None,
                    pkey: None,
                },
            )]),
            command: CommandSpec::inline(
                "systemctl stop keepalived",
                "/bin/sh",
            ),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_failure() {
        let logctx = test_setup_log("test_stops_at_first_failure");
        let control_plane = SimControlPlane::new();
        control_plane
            .set_agent_states("r1", vec![agent("a", "net1", HaState::Active)]);
        let executor = SimRemoteExecutor::new();
        let pinger = SimPinger::new();

        let scenario = FailoverScenario::new(
            &logctx.log,
            &control_plane,
            &executor,
            &pinger,
            POLL,
            POLL,
            None,
        );
        let error = scenario.run(&input()).await.expect_err("no ping reply");
        assert!(matches!(error, ScenarioError::Reachability(_)));
        assert_eq!(executor.connect_attempts(), 0);
        assert_eq!(control_plane.agent_queries("r1"), 1);
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_keeps_recorded_actions() {
        let logctx = test_setup_log("test_failed_run_keeps_recorded_actions");
        let control_plane = SimControlPlane::new();
        control_plane
            .set_agent_states("r1", vec![agent("a", "net1", HaState::Active)]);
        let executor = SimRemoteExecutor::new();
        executor.set_exit_code(Some(1));
        let pinger = SimPinger::new();
        pinger.push_statuses(
            "172.24.4.10".parse().unwrap(),
            &[IcmpStatus::Up],
        );

        let scenario = FailoverScenario::new(
            &logctx.log,
            &control_plane,
            &executor,
            &pinger,
            POLL,
            POLL,
            None,
        );
        let mut actions = AtomicActions::new();
        let error = scenario
            .run_with_actions(&input(), &mut actions)
            .await
            .expect_err("command exits non-zero");
        assert!(matches!(error, ScenarioError::Failover(_)));

        let recorded: Vec<(&str, bool)> = actions
            .actions()
            .iter()
            .map(|a| (a.name.as_str(), a.succeeded))
            .collect();
        assert_eq!(
            recorded,
            [
                (ACTION_MASTER_INIT, true),
                (ACTION_PING_INIT, true),
                (ACTION_FAILOVER, false),
            ]
        );
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_master_host() {
        let logctx = test_setup_log("test_unknown_master_host");
        let control_plane = SimControlPlane::new();
        control_plane
            .set_agent_states("r1", vec![agent("b", "net9", HaState::Active)]);
        let executor = SimRemoteExecutor::new();
        let pinger = SimPinger::new();
        pinger.push_statuses(
            "172.24.4.10".parse().unwrap(),
            &[IcmpStatus::Up],
        );

        let scenario = FailoverScenario::new(
            &logctx.log,
            &control_plane,
            &executor,
            &pinger,
            POLL,
            POLL,
            None,
        );
        let error = scenario.run(&input()).await.expect_err("net9 unknown");
        assert!(
            matches!(&error, ScenarioError::UnknownHost(host) if host == "net9")
        );
        assert_eq!(executor.connect_attempts(), 0);
        logctx.cleanup_successful();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_server_fetches_server() {
        let logctx = test_setup_log("test_run_for_server_fetches_server");
        let control_plane = SimControlPlane::new();
        let executor = SimRemoteExecutor::new();
        let pinger = SimPinger::new();
        let scenario = FailoverScenario::new(
            &logctx.log,
            &control_plane,
            &executor,
            &pinger,
            POLL,
            POLL,
            None,
        );

        let input = input();
        let error = scenario
            .run_for_server(
                "vm1",
                input.floating_ip,
                input.tenant_networks.clone(),
                input.l3_nodes.clone(),
                input.command.clone(),
            )
            .await
            .expect_err("server does not exist");
        assert!(matches!(error, ScenarioError::ControlPlane(_)));

        // With the server present, the run gets as far as router lookup and
        // then times out waiting for an active agent.
        control_plane.add_server(input.server.clone());
        let error = scenario
            .run_for_server(
                "vm1",
                input.floating_ip,
                input.tenant_networks,
                input.l3_nodes,
                input.command,
            )
            .await
            .expect_err("no agents");
        assert!(matches!(
            error,
            ScenarioError::Tracker(TrackerError::Timeout { .. })
        ));
        logctx.cleanup_successful();
    }
}
