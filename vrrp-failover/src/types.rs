// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared by the tracker, injector and scenario

use camino::Utf8PathBuf;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Identifier of a logical router managed by the control plane
pub type RouterId = String;

/// HA state an L3 agent reports for one router it hosts
///
/// Bindings of routers without HA report `null`, which reads as an empty
/// [`HaState::Other`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum HaState {
    /// this agent is the VRRP master and forwards traffic
    Active,
    Standby,
    /// anything else the control plane reports (e.g. "fault", "unknown")
    Other(String),
}

impl Default for HaState {
    fn default() -> Self {
        HaState::Other(String::new())
    }
}

impl From<String> for HaState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => HaState::Active,
            "standby" => HaState::Standby,
            _ => HaState::Other(s),
        }
    }
}

impl From<Option<String>> for HaState {
    fn from(s: Option<String>) -> Self {
        s.map(HaState::from).unwrap_or_default()
    }
}

impl From<HaState> for String {
    fn from(s: HaState) -> Self {
        s.to_string()
    }
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaState::Active => f.write_str("active"),
            HaState::Standby => f.write_str("standby"),
            HaState::Other(s) => f.write_str(s),
        }
    }
}

/// An L3 agent hosting a router, as reported by the network control plane
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Agent {
    pub id: String,
    pub host: String,
    #[serde(default)]
    pub ha_state: HaState,
    #[serde(default)]
    pub alive: Option<bool>,
    #[serde(default)]
    pub admin_state_up: Option<bool>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.ha_state == HaState::Active
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.id, self.host)
    }
}

/// Formats a list of agents as `[(id, host), ...]` for log messages
pub struct AgentList<'a>(pub &'a [Agent]);

impl fmt::Display for AgentList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, agent) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", agent)?;
        }
        f.write_str("]")
    }
}

/// A compute instance and the addresses it has on each network
///
/// The address list for a network includes floating addresses as well as
/// fixed ones, which is how the compute API reports them.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub networks: BTreeMap<String, Vec<IpAddr>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FloatingIp {
    pub ip: IpAddr,
    /// fixed address the floating IP is mapped to, when known
    pub fixed_ip: Option<IpAddr>,
}

/// A network in the tenant's context, along with the router fronting it
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TenantNetwork {
    pub name: String,
    #[serde(default)]
    pub router_id: Option<RouterId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    pub external: bool,
}

fn default_ssh_port() -> u16 {
    22
}

/// How to reach and authenticate to a network node for failure injection
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostCredential {
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// path to a private key file
    #[serde(default)]
    pub key_filename: Option<Utf8PathBuf>,
    /// in-memory private key, PEM or OpenSSH encoded
    #[serde(default)]
    pub pkey: Option<String>,
}

impl fmt::Debug for HostCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredential")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_filename", &self.key_filename)
            .field("pkey", &self.pkey.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Maps the host name an agent reports to credentials for that host
pub type L3NodeTable = BTreeMap<String, HostCredential>;

/// Command run on a network node to trigger failover
///
/// Exactly one of `script_file`, `script_inline` and `remote_path` must be
/// set.  Scripts are streamed to `interpreter` on stdin; `remote_path` names
/// an executable already present on the node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandSpec {
    #[serde(default)]
    pub script_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub script_inline: Option<String>,
    #[serde(default)]
    pub remote_path: Option<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub command_args: Vec<String>,
}

/// What a [`CommandSpec`] actually runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandSource<'a> {
    ScriptFile { path: &'a Utf8PathBuf, interpreter: &'a str },
    ScriptInline { script: &'a str, interpreter: &'a str },
    RemotePath { path: &'a str, interpreter: Option<&'a str> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandSpecError {
    #[error(
        "exactly one of \"script_file\", \"script_inline\" and \
         \"remote_path\" must be given (found {0})"
    )]
    Source(usize),
    #[error("\"interpreter\" is required with \"{0}\"")]
    MissingInterpreter(&'static str),
    #[error("\"{0}\" must not be empty")]
    Empty(&'static str),
}

impl CommandSpec {
    pub fn inline(script: &str, interpreter: &str) -> CommandSpec {
        CommandSpec {
            script_inline: Some(script.to_string()),
            interpreter: Some(interpreter.to_string()),
            ..Default::default()
        }
    }

    pub fn source(&self) -> Result<CommandSource<'_>, CommandSpecError> {
        let count = [
            self.script_file.is_some(),
            self.script_inline.is_some(),
            self.remote_path.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if count != 1 {
            return Err(CommandSpecError::Source(count));
        }

        let interpreter = match self.interpreter.as_deref() {
            Some("") => return Err(CommandSpecError::Empty("interpreter")),
            other => other,
        };

        if let Some(path) = &self.script_file {
            let interpreter = interpreter
                .ok_or(CommandSpecError::MissingInterpreter("script_file"))?;
            if path.as_str().is_empty() {
                return Err(CommandSpecError::Empty("script_file"));
            }
            Ok(CommandSource::ScriptFile { path, interpreter })
        } else if let Some(script) = &self.script_inline {
            let interpreter = interpreter
                .ok_or(CommandSpecError::MissingInterpreter("script_inline"))?;
            Ok(CommandSource::ScriptInline { script, interpreter })
        } else {
            // `count == 1` guarantees this is set.
            let path = self.remote_path.as_deref().unwrap_or_default();
            if path.is_empty() {
                return Err(CommandSpecError::Empty("remote_path"));
            }
            Ok(CommandSource::RemotePath { path, interpreter })
        }
    }

    /// Returns the command line to execute on the remote host
    ///
    /// The interpreter is used verbatim so that it may carry its own flags
    /// (e.g. "/bin/sh -e").  Arguments are shell-quoted.
    pub fn command_line(&self) -> Result<String, CommandSpecError> {
        let mut line = match self.source()? {
            CommandSource::ScriptFile { interpreter, .. }
            | CommandSource::ScriptInline { interpreter, .. } => {
                interpreter.to_string()
            }
            CommandSource::RemotePath { path, interpreter: None } => {
                shell_words::quote(path).into_owned()
            }
            CommandSource::RemotePath { path, interpreter: Some(i) } => {
                format!("{} {}", i, shell_words::quote(path))
            }
        };
        for arg in &self.command_args {
            line.push(' ');
            line.push_str(&shell_words::quote(arg));
        }
        Ok(line)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source() {
            Ok(CommandSource::ScriptFile { path, .. }) => {
                write!(f, "script file {:?}", path.as_str())?
            }
            Ok(CommandSource::ScriptInline { script, .. }) => {
                write!(f, "inline script {:?}", script)?
            }
            Ok(CommandSource::RemotePath { path, .. }) => {
                write!(f, "remote command {:?}", path)?
            }
            Err(_) => return write!(f, "invalid command {:?}", self),
        }
        if let Ok(line) = self.command_line() {
            write!(f, " via `{}`", line)?;
        }
        Ok(())
    }
}
