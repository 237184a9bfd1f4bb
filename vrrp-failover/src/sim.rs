// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated control plane, SSH and ping, for running failover scenarios
//! without a cloud
//!
//! Each simulated collaborator replays scripted behavior and counts how it
//! was used so that tests can assert on it.

use crate::control_plane::ControlPlane;
use crate::control_plane::ControlPlaneError;
use crate::icmp::IcmpStatus;
use crate::icmp::Pinger;
use crate::ssh::CommandOutput;
use crate::ssh::RemoteExecutor;
use crate::ssh::RemoteSession;
use crate::ssh::SshError;
use crate::ssh::SshTarget;
use crate::types::Agent;
use crate::types::CommandSpec;
use crate::types::NetworkSummary;
use crate::types::Server;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;

/// Control plane whose router agent states follow a script
///
/// Each router has a queue of agent lists.  Every query consumes the front of
/// the queue, except that the last entry is sticky and is returned for all
/// later queries.  Routers with no script have no agents.
pub struct SimControlPlane {
    inner: Mutex<SimControlPlaneInner>,
}

struct SimControlPlaneInner {
    agent_states: BTreeMap<String, VecDeque<Vec<Agent>>>,
    agent_queries: BTreeMap<String, usize>,
    agent_query_error: Option<String>,
    servers: BTreeMap<String, Server>,
    networks: Vec<NetworkSummary>,
    service_types: Vec<String>,
}

impl Default for SimControlPlane {
    fn default() -> Self {
        SimControlPlane::new()
    }
}

impl SimControlPlane {
    pub fn new() -> SimControlPlane {
        SimControlPlane {
            inner: Mutex::new(SimControlPlaneInner {
                agent_states: BTreeMap::new(),
                agent_queries: BTreeMap::new(),
                agent_query_error: None,
                servers: BTreeMap::new(),
                networks: Vec::new(),
                service_types: ["identity", "network", "compute"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }),
        }
    }

    /// Appends agent lists to the script for `router_id`
    pub fn push_agent_states(&self, router_id: &str, states: Vec<Vec<Agent>>) {
        self.inner
            .lock()
            .unwrap()
            .agent_states
            .entry(router_id.to_string())
            .or_default()
            .extend(states);
    }

    /// Replaces the script for `router_id` with a single, sticky agent list
    pub fn set_agent_states(&self, router_id: &str, agents: Vec<Agent>) {
        self.inner
            .lock()
            .unwrap()
            .agent_states
            .insert(router_id.to_string(), VecDeque::from([agents]));
    }

    /// Makes every agent query fail with `message`
    pub fn fail_agent_queries(&self, message: &str) {
        self.inner.lock().unwrap().agent_query_error =
            Some(message.to_string());
    }

    pub fn agent_queries(&self, router_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .agent_queries
            .get(router_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn add_server(&self, server: Server) {
        self.inner.lock().unwrap().servers.insert(server.id.clone(), server);
    }

    pub fn add_network(&self, network: NetworkSummary) {
        self.inner.lock().unwrap().networks.push(network);
    }

    pub fn set_service_types(&self, service_types: &[&str]) {
        self.inner.lock().unwrap().service_types =
            service_types.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait]
impl ControlPlane for SimControlPlane {
    async fn list_l3_agents_hosting_router(
        &self,
        router_id: &str,
    ) -> Result<Vec<Agent>, ControlPlaneError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.agent_queries.entry(router_id.to_string()).or_default() += 1;
        if let Some(message) = &inner.agent_query_error {
            return Err(ControlPlaneError::Other(message.clone()));
        }
        let Some(queue) = inner.agent_states.get_mut(router_id) else {
            return Ok(Vec::new());
        };
        let agents = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(agents)
    }

    async fn get_server(
        &self,
        server_id: &str,
    ) -> Result<Server, ControlPlaneError> {
        self.inner.lock().unwrap().servers.get(server_id).cloned().ok_or_else(
            || ControlPlaneError::Other(format!("no server {}", server_id)),
        )
    }

    async fn list_networks(
        &self,
    ) -> Result<Vec<NetworkSummary>, ControlPlaneError> {
        Ok(self.inner.lock().unwrap().networks.clone())
    }

    async fn service_types(&self) -> Result<Vec<String>, ControlPlaneError> {
        Ok(self.inner.lock().unwrap().service_types.clone())
    }
}

type ExecuteHook = Box<dyn Fn(&SshTarget, &CommandSpec) + Send + Sync>;

/// Remote executor that records what it was asked to run
///
/// By default connections succeed and commands exit 0.
#[derive(Clone)]
pub struct SimRemoteExecutor {
    inner: Arc<Mutex<SimRemoteInner>>,
}

struct SimRemoteInner {
    refuse_remaining: usize,
    reject_auth: bool,
    fail_execution: bool,
    exit_code: Option<i64>,
    stdout: String,
    stderr: String,
    connect_attempts: usize,
    sessions_opened: usize,
    sessions_closed: usize,
    targets: Vec<SshTarget>,
    executed: Vec<(SshTarget, CommandSpec)>,
    on_execute: Option<ExecuteHook>,
}

impl Default for SimRemoteExecutor {
    fn default() -> Self {
        SimRemoteExecutor::new()
    }
}

impl SimRemoteExecutor {
    pub fn new() -> SimRemoteExecutor {
        SimRemoteExecutor {
            inner: Arc::new(Mutex::new(SimRemoteInner {
                refuse_remaining: 0,
                reject_auth: false,
                fail_execution: false,
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                connect_attempts: 0,
                sessions_opened: 0,
                sessions_closed: 0,
                targets: Vec::new(),
                executed: Vec::new(),
                on_execute: None,
            })),
        }
    }

    /// Refuses the next `count` connection attempts
    pub fn refuse_connections(&self, count: usize) {
        self.inner.lock().unwrap().refuse_remaining = count;
    }

    pub fn reject_auth(&self) {
        self.inner.lock().unwrap().reject_auth = true;
    }

    /// Makes sessions drop while a command runs
    pub fn fail_execution(&self) {
        self.inner.lock().unwrap().fail_execution = true;
    }

    pub fn set_exit_code(&self, exit_code: Option<i64>) {
        self.inner.lock().unwrap().exit_code = exit_code;
    }

    pub fn set_stderr(&self, stderr: &str) {
        self.inner.lock().unwrap().stderr = stderr.to_string();
    }

    /// Calls `hook` each time a command runs, before its output is returned
    ///
    /// This is how a test makes the simulated failure take effect, e.g. by
    /// moving mastership in a [`SimControlPlane`].
    pub fn on_execute<F>(&self, hook: F)
    where
        F: Fn(&SshTarget, &CommandSpec) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().on_execute = Some(Box::new(hook));
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().unwrap().connect_attempts
    }

    pub fn sessions_opened(&self) -> usize {
        self.inner.lock().unwrap().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.inner.lock().unwrap().sessions_closed
    }

    /// Targets of every successful connection
    pub fn targets(&self) -> Vec<SshTarget> {
        self.inner.lock().unwrap().targets.clone()
    }

    pub fn executed(&self) -> Vec<(SshTarget, CommandSpec)> {
        self.inner.lock().unwrap().executed.clone()
    }
}

#[async_trait]
impl RemoteExecutor for SimRemoteExecutor {
    async fn connect(
        &self,
        target: &SshTarget,
    ) -> Result<Box<dyn RemoteSession>, SshError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_attempts += 1;
        if inner.refuse_remaining > 0 {
            inner.refuse_remaining -= 1;
            return Err(SshError::Connect {
                address: target.socket_address(),
                err: std::io::ErrorKind::ConnectionRefused.into(),
            });
        }
        if inner.reject_auth {
            return Err(SshError::AuthRejected {
                username: target.username.clone(),
            });
        }
        inner.sessions_opened += 1;
        inner.targets.push(target.clone());
        Ok(Box::new(SimSession {
            inner: Arc::clone(&self.inner),
            target: target.clone(),
        }))
    }
}

struct SimSession {
    inner: Arc<Mutex<SimRemoteInner>>,
    target: SshTarget,
}

#[async_trait]
impl RemoteSession for SimSession {
    async fn execute(
        &mut self,
        command: &CommandSpec,
    ) -> Result<CommandOutput, SshError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_execution {
            return Err(SshError::Connect {
                address: self.target.socket_address(),
                err: std::io::ErrorKind::ConnectionReset.into(),
            });
        }
        inner.executed.push((self.target.clone(), command.clone()));
        if let Some(hook) = &inner.on_execute {
            hook(&self.target, command);
        }
        Ok(CommandOutput {
            exit_code: inner.exit_code,
            stdout: inner.stdout.clone(),
            stderr: inner.stderr.clone(),
        })
    }

    async fn close(self: Box<Self>) -> Result<(), SshError> {
        self.inner.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

/// Pinger that replays a per-address script of statuses
///
/// Like [`SimControlPlane`], the last status in each script is sticky.
/// Addresses with no script are down.
#[derive(Default)]
pub struct SimPinger {
    hosts: Mutex<BTreeMap<IpAddr, SimHost>>,
}

struct SimHost {
    statuses: VecDeque<IcmpStatus>,
    last: IcmpStatus,
    failures: usize,
    pings: usize,
}

impl Default for SimHost {
    fn default() -> Self {
        SimHost {
            statuses: VecDeque::new(),
            last: IcmpStatus::Down,
            failures: 0,
            pings: 0,
        }
    }
}

impl SimPinger {
    pub fn new() -> SimPinger {
        SimPinger::default()
    }

    pub fn push_statuses(&self, ip: IpAddr, statuses: &[IcmpStatus]) {
        self.hosts
            .lock()
            .unwrap()
            .entry(ip)
            .or_default()
            .statuses
            .extend(statuses.iter().copied());
    }

    /// Makes the next `count` pings of `ip` fail with an I/O error
    pub fn fail_next(&self, ip: IpAddr, count: usize) {
        self.hosts.lock().unwrap().entry(ip).or_default().failures = count;
    }

    pub fn pings(&self, ip: IpAddr) -> usize {
        self.hosts.lock().unwrap().get(&ip).map_or(0, |h| h.pings)
    }
}

#[async_trait]
impl Pinger for SimPinger {
    async fn ping(&self, ip: IpAddr) -> Result<IcmpStatus, std::io::Error> {
        let mut hosts = self.hosts.lock().unwrap();
        let host = hosts.entry(ip).or_default();
        host.pings += 1;
        if host.failures > 0 {
            host.failures -= 1;
            return Err(std::io::ErrorKind::PermissionDenied.into());
        }
        if let Some(status) = host.statuses.pop_front() {
            host.last = status;
        }
        Ok(host.last)
    }
}
