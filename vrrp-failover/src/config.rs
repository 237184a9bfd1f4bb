// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a failover
//! run's configuration

use crate::types::CommandSpec;
use crate::types::FloatingIp;
use crate::types::L3NodeTable;
use crate::types::TenantNetwork;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_INTERVAL_SECS: u64 = 1;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PING_REPLY_TIMEOUT_MS: u64 = 1000;

/// Configuration for a failover run
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Logging configuration for the run.
    pub log: ConfigLogging,
    /// Polling used while waiting for a master agent and for ping.
    #[serde(default)]
    pub poll: PollConfig,
    /// How to wait for and talk to sshd on the network nodes.
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub ping: PingConfig,
    pub openstack: OpenStackConfig,
    pub scenario: ScenarioConfig,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

/// Returns `value` seconds, or `default` seconds when `value` is 0
fn secs_or_default(value: u64, default: u64) -> Duration {
    Duration::from_secs(if value == 0 { default } else { value })
}

/// Fixed-interval polling with a hard timeout
///
/// A value of 0 for either field selects the default.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PollConfig {
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub interval_secs: u64,
}

impl PollConfig {
    pub fn timeout(&self) -> Duration {
        secs_or_default(self.timeout_secs, DEFAULT_TIMEOUT_SECS)
    }

    pub fn interval(&self) -> Duration {
        secs_or_default(self.interval_secs, DEFAULT_INTERVAL_SECS)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SshConfig {
    /// how long to wait for sshd on a node to accept a session
    #[serde(default)]
    pub wait_timeout_secs: u64,
    #[serde(default)]
    pub wait_interval_secs: u64,
    /// bound on a single TCP connect and SSH handshake
    #[serde(default)]
    pub connect_timeout_secs: u64,
    /// private key offered to nodes that have no `key_filename`
    #[serde(default)]
    pub default_private_key: Option<Utf8PathBuf>,
}

impl SshConfig {
    pub fn wait(&self) -> PollConfig {
        PollConfig {
            timeout_secs: self.wait_timeout_secs,
            interval_secs: self.wait_interval_secs,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        secs_or_default(self.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PingConfig {
    /// how long one echo request waits for its reply
    #[serde(default)]
    pub reply_timeout_ms: u64,
}

impl PingConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(if self.reply_timeout_ms == 0 {
            DEFAULT_PING_REPLY_TIMEOUT_MS
        } else {
            self.reply_timeout_ms
        })
    }
}

fn default_domain() -> String {
    String::from("Default")
}

fn default_interface() -> String {
    String::from("public")
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Keystone credentials and endpoint selection
#[derive(Clone, Deserialize, Serialize)]
pub struct OpenStackConfig {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    #[serde(default = "default_domain")]
    pub user_domain_name: String,
    #[serde(default = "default_domain")]
    pub project_domain_name: String,
    #[serde(default)]
    pub region: Option<String>,
    /// catalog interface to use ("public", "internal" or "admin")
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for OpenStackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenStackConfig")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("project_name", &self.project_name)
            .field("user_domain_name", &self.user_domain_name)
            .field("project_domain_name", &self.project_domain_name)
            .field("region", &self.region)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// The server under test and how to fail over its router
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub server_id: String,
    pub floating_ip: IpAddr,
    #[serde(default)]
    pub fixed_ip: Option<IpAddr>,
    /// external network the floating IP was allocated from
    #[serde(default)]
    pub floating_network: Option<String>,
    #[serde(default)]
    pub tenant_networks: Vec<TenantNetwork>,
    pub command: CommandSpec,
    /// credentials for the network nodes, keyed by agent host name
    #[serde(default)]
    pub l3_nodes: L3NodeTable,
}

impl ScenarioConfig {
    pub fn floating_ip(&self) -> FloatingIp {
        FloatingIp { ip: self.floating_ip, fixed_ip: self.fixed_ip }
    }
}
