// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end failover runs against simulated collaborators

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use vrrp_failover::config::PollConfig;
use vrrp_failover::icmp::IcmpStatus;
use vrrp_failover::injector::FailoverError;
use vrrp_failover::reachability::ReachabilityError;
use vrrp_failover::router::RouterLookupError;
use vrrp_failover::scenario;
use vrrp_failover::scenario::ScenarioInput;
use vrrp_failover::sim::SimControlPlane;
use vrrp_failover::sim::SimPinger;
use vrrp_failover::sim::SimRemoteExecutor;
use vrrp_failover::tracker::TrackerError;
use vrrp_failover::types::Agent;
use vrrp_failover::types::CommandSpec;
use vrrp_failover::types::FloatingIp;
use vrrp_failover::types::HaState;
use vrrp_failover::types::HostCredential;
use vrrp_failover::types::L3NodeTable;
use vrrp_failover::types::Server;
use vrrp_failover::types::TenantNetwork;
use vrrp_failover::FailoverScenario;
use vrrp_failover::ScenarioError;
use vrrp_failover::ScenarioReport;
use vrrp_test_utils::dev::test_setup_log;
use vrrp_test_utils::dev::LogContext;

const ROUTER_ID: &str = "8d2e4b10";
const POLL: PollConfig = PollConfig { timeout_secs: 20, interval_secs: 1 };
const SSH_WAIT: PollConfig = PollConfig { timeout_secs: 10, interval_secs: 2 };

fn agent(id: &str, host: &str, ha_state: HaState) -> Agent {
    Agent {
        id: id.to_string(),
        host: host.to_string(),
        ha_state,
        alive: Some(true),
        admin_state_up: Some(true),
    }
}

fn master_on_net1() -> Vec<Agent> {
    vec![
        agent("a", "net1", HaState::Active),
        agent("b", "net2", HaState::Standby),
    ]
}

fn master_on_net2() -> Vec<Agent> {
    vec![
        agent("a", "net1", HaState::Standby),
        agent("b", "net2", HaState::Active),
    ]
}

fn node(address: &str, port: u16) -> HostCredential {
    HostCredential {
        address: address.to_string(),
        port,
        username: "root".to_string(),
        password: Some("123456".to_string()),
        key_filename: None,
        pkey: None,
    }
}

fn floating_ip() -> IpAddr {
    "172.24.4.10".parse().unwrap()
}

/// A server on network "private" behind ROUTER_ID, whose router's master
/// starts on net1
struct ScenarioContext {
    logctx: LogContext,
    control_plane: Arc<SimControlPlane>,
    executor: SimRemoteExecutor,
    pinger: SimPinger,
    input: ScenarioInput,
}

impl ScenarioContext {
    fn new(test_name: &str) -> ScenarioContext {
        let logctx = test_setup_log(test_name);
        let control_plane = Arc::new(SimControlPlane::new());
        control_plane.set_agent_states(ROUTER_ID, master_on_net1());
        let pinger = SimPinger::new();
        pinger.push_statuses(floating_ip(), &[IcmpStatus::Up]);

        let input = ScenarioInput {
            server: Server {
                id: "vm1".to_string(),
                name: "vm1".to_string(),
                networks: BTreeMap::from([(
                    "private".to_string(),
                    vec!["10.0.0.5".parse().unwrap(), floating_ip()],
                )]),
            },
            floating_ip: FloatingIp {
                ip: floating_ip(),
                fixed_ip: Some("10.0.0.5".parse().unwrap()),
            },
            tenant_networks: vec![TenantNetwork {
                name: "private".to_string(),
                router_id: Some(ROUTER_ID.to_string()),
            }],
            l3_nodes: L3NodeTable::from([
                ("net1".to_string(), node("10.35.186.187", 21)),
                ("net2".to_string(), node("10.35.186.188", 22)),
            ]),
            command: CommandSpec::inline(
                "systemctl stop keepalived",
                "/bin/sh",
            ),
        };

        ScenarioContext {
            logctx,
            control_plane,
            executor: SimRemoteExecutor::new(),
            pinger,
            input,
        }
    }

    /// Makes running the failover command move mastership to net2
    fn failover_moves_master(&self) {
        let control_plane = Arc::clone(&self.control_plane);
        self.executor.on_execute(move |_, _| {
            control_plane.set_agent_states(ROUTER_ID, master_on_net2());
        });
    }

    async fn run(&self) -> Result<ScenarioReport, ScenarioError> {
        FailoverScenario::new(
            &self.logctx.log,
            &*self.control_plane,
            &self.executor,
            &self.pinger,
            POLL,
            SSH_WAIT,
            None,
        )
        .run(&self.input)
        .await
    }

    fn cleanup_successful(self) {
        self.logctx.cleanup_successful();
    }
}

#[tokio::test(start_paused = true)]
async fn test_failover_moves_master() {
    let cptestctx = ScenarioContext::new("test_failover_moves_master");
    cptestctx.failover_moves_master();

    let report = cptestctx.run().await.unwrap();
    assert_eq!(report.router_id, ROUTER_ID);
    assert_eq!(report.old_master, agent("a", "net1", HaState::Active));
    assert_eq!(report.new_master, agent("b", "net2", HaState::Active));

    let names: Vec<&str> =
        report.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        [
            scenario::ACTION_MASTER_INIT,
            scenario::ACTION_PING_INIT,
            scenario::ACTION_FAILOVER,
            scenario::ACTION_PING_AFTER,
            scenario::ACTION_MASTER_AFTER,
        ]
    );
    assert!(report.actions.iter().all(|a| a.succeeded));

    // The command ran once, on the node hosting the old master.
    let executed = cptestctx.executor.executed();
    assert_eq!(executed.len(), 1);
    let (target, command) = &executed[0];
    assert_eq!(target.socket_address(), "10.35.186.187:21");
    assert_eq!(command, &cptestctx.input.command);
    assert_eq!(cptestctx.executor.sessions_closed(), 1);
    assert_eq!(cptestctx.control_plane.agent_queries(ROUTER_ID), 2);
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_master_unchanged() {
    let cptestctx = ScenarioContext::new("test_master_unchanged");

    let error = cptestctx.run().await.expect_err("master never moves");
    assert!(matches!(error, ScenarioError::Assertion(_)));
    assert_eq!(error.to_string(), "router remains ACTIVE on the same node");
    assert_eq!(cptestctx.executor.executed().len(), 1);
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_command_failure_stops_run() {
    let cptestctx = ScenarioContext::new("test_command_failure_stops_run");
    cptestctx.failover_moves_master();
    cptestctx.executor.set_exit_code(Some(1));
    cptestctx.executor.set_stderr("keepalived: unit not found");

    let error = cptestctx.run().await.expect_err("command exits 1");
    let ScenarioError::Failover(failover_error) = &error else {
        panic!("unexpected error: {:#?}", error);
    };
    assert!(matches!(
        failover_error,
        FailoverError::CommandExecution { code: 1, .. }
    ));
    assert_eq!(
        failover_error.to_string(),
        "Error running command inline script \"systemctl stop keepalived\" \
         via `/bin/sh`. Error 1: keepalived: unit not found"
    );

    // Neither the second ping wait nor the second master lookup ran.
    assert_eq!(cptestctx.control_plane.agent_queries(ROUTER_ID), 1);
    assert_eq!(cptestctx.pinger.pings(floating_ip()), 1);
    assert_eq!(cptestctx.executor.sessions_closed(), 1);
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_non_positive_exit_codes_succeed() {
    for (i, exit_code) in [Some(0), Some(-1), None].into_iter().enumerate() {
        let cptestctx = ScenarioContext::new(&format!(
            "test_non_positive_exit_codes_succeed_{}",
            i
        ));
        cptestctx.failover_moves_master();
        cptestctx.executor.set_exit_code(exit_code);

        let report = cptestctx.run().await.unwrap();
        assert_eq!(report.new_master.host, "net2");
        cptestctx.cleanup_successful();
    }
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_ssh() {
    let cptestctx = ScenarioContext::new("test_waits_for_ssh");
    cptestctx.failover_moves_master();
    cptestctx.executor.refuse_connections(3);

    let report = cptestctx.run().await.unwrap();
    assert_eq!(cptestctx.executor.connect_attempts(), 4);
    let failover = &report.actions[2];
    assert_eq!(failover.name, scenario::ACTION_FAILOVER);
    assert_eq!(failover.duration, Duration::from_secs(6));
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_ssh_never_available() {
    let cptestctx = ScenarioContext::new("test_ssh_never_available");
    cptestctx.executor.refuse_connections(usize::MAX);

    let error = cptestctx.run().await.expect_err("ssh never comes up");
    assert!(matches!(
        error,
        ScenarioError::Failover(FailoverError::Connect { port: 21, .. })
    ));
    assert!(cptestctx.executor.executed().is_empty());
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_server_unreachable_after_failover() {
    let cptestctx =
        ScenarioContext::new("test_server_unreachable_after_failover");
    cptestctx.failover_moves_master();
    cptestctx.pinger.push_statuses(floating_ip(), &[IcmpStatus::Down]);

    let error = cptestctx.run().await.expect_err("server stays down");
    let ScenarioError::Reachability(ReachabilityError::Timeout { ip, .. }) =
        error
    else {
        panic!("unexpected error: {:#?}", error);
    };
    assert_eq!(ip, floating_ip());
    assert_eq!(cptestctx.control_plane.agent_queries(ROUTER_ID), 1);
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_split_brain_after_failover_converges() {
    let cptestctx =
        ScenarioContext::new("test_split_brain_after_failover_converges");
    let control_plane = Arc::clone(&cptestctx.control_plane);
    cptestctx.executor.on_execute(move |_, _| {
        control_plane.set_agent_states(ROUTER_ID, vec![]);
        control_plane.push_agent_states(
            ROUTER_ID,
            vec![
                vec![
                    agent("a", "net1", HaState::Active),
                    agent("b", "net2", HaState::Active),
                ],
                vec![
                    agent("a", "net1", HaState::Active),
                    agent("b", "net2", HaState::Active),
                ],
                master_on_net2(),
            ],
        );
    });

    let report = cptestctx.run().await.unwrap();
    assert_eq!(report.new_master.id, "b");
    // one query before failover, then an empty list and two split-brain
    // lists before convergence
    assert_eq!(cptestctx.control_plane.agent_queries(ROUTER_ID), 5);
    assert_eq!(report.actions[4].duration, Duration::from_secs(3));
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_master_never_converges() {
    let cptestctx = ScenarioContext::new("test_master_never_converges");
    cptestctx.control_plane.set_agent_states(
        ROUTER_ID,
        vec![
            agent("a", "net1", HaState::Active),
            agent("b", "net2", HaState::Active),
        ],
    );

    let error = cptestctx.run().await.expect_err("split brain");
    let ScenarioError::Tracker(TrackerError::Timeout { last_observed, .. }) =
        &error
    else {
        panic!("unexpected error: {:#?}", error);
    };
    assert_eq!(last_observed.len(), 2);
    assert!(cptestctx.executor.executed().is_empty());
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_unknown_master_host() {
    let cptestctx = ScenarioContext::new("test_unknown_master_host");
    cptestctx.control_plane.set_agent_states(
        ROUTER_ID,
        vec![agent("c", "net3", HaState::Active)],
    );

    let error = cptestctx.run().await.expect_err("net3 has no credentials");
    assert_eq!(error.to_string(), "no credentials for L3 node \"net3\"");
    assert_eq!(cptestctx.executor.connect_attempts(), 0);
    cptestctx.cleanup_successful();
}

#[tokio::test(start_paused = true)]
async fn test_ambiguous_network() {
    let mut cptestctx = ScenarioContext::new("test_ambiguous_network");
    cptestctx
        .input
        .server
        .networks
        .insert("private2".to_string(), vec![floating_ip()]);

    let error = cptestctx.run().await.expect_err("two networks match");
    let ScenarioError::RouterLookup(RouterLookupError::Networks(networks)) =
        &error
    else {
        panic!("unexpected error: {:#?}", error);
    };
    assert_eq!(networks, &["private", "private2"]);
    assert_eq!(cptestctx.control_plane.agent_queries(ROUTER_ID), 0);
    cptestctx.cleanup_successful();
}
