// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preconditions checked before a failover run starts
//!
//! Each check is a plain function over a [`ValidationContext`].  [`validate`]
//! runs all of them and reports every failure, not just the first.

use crate::config::PollConfig;
use crate::types::CommandSource;
use crate::types::CommandSpec;
use crate::types::CommandSpecError;
use crate::types::L3NodeTable;
use crate::types::NetworkSummary;
use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;

/// Service types a failover run talks to
pub const REQUIRED_SERVICES: &[&str] = &["network", "compute"];

/// Everything the checks look at
///
/// Fields that come from the control plane are optional; checks that need
/// them are skipped when they are absent.
pub struct ValidationContext<'a> {
    pub command: &'a CommandSpec,
    pub l3_nodes: &'a L3NodeTable,
    /// whether a default private key is configured for nodes without one
    pub default_key_available: bool,
    pub poll: PollConfig,
    pub ssh_wait: PollConfig,
    pub floating_network: Option<&'a str>,
    pub service_types: Option<&'a [String]>,
    pub networks: Option<&'a [NetworkSummary]>,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("command")]
    Command(#[from] CommandSpecError),
    #[error("script file {path} is not readable")]
    ScriptFile {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("no L3 nodes configured")]
    NoL3Nodes,
    #[error("L3 node \"{host}\": {reason}")]
    L3Node { host: String, reason: &'static str },
    #[error("{setting}: {reason}")]
    Timing { setting: &'static str, reason: &'static str },
    #[error("required service \"{0}\" is not in the service catalog")]
    MissingService(String),
    #[error("external network \"{0}\" does not exist")]
    ExternalNetwork(String),
}

/// All failed checks from one call to [`validate`]
#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} precondition(s) failed", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
            let mut source = std::error::Error::source(error);
            while let Some(cause) = source {
                write!(f, ": {}", cause)?;
                source = cause.source();
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

type Check = fn(&ValidationContext<'_>) -> Vec<ValidationError>;

const CHECKS: &[Check] = &[
    valid_command,
    l3_nodes_present,
    poll_settings,
    required_services,
    external_network_exists,
];

pub fn validate(ctx: &ValidationContext<'_>) -> Result<(), ValidationErrors> {
    let errors: Vec<ValidationError> =
        CHECKS.iter().flat_map(|check| check(ctx)).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

pub fn valid_command(ctx: &ValidationContext<'_>) -> Vec<ValidationError> {
    match ctx.command.source() {
        Err(err) => vec![err.into()],
        Ok(CommandSource::ScriptFile { path, .. }) => {
            match std::fs::File::open(path) {
                Ok(_) => vec![],
                Err(err) => vec![ValidationError::ScriptFile {
                    path: path.clone(),
                    err,
                }],
            }
        }
        Ok(_) => vec![],
    }
}

pub fn l3_nodes_present(ctx: &ValidationContext<'_>) -> Vec<ValidationError> {
    if ctx.l3_nodes.is_empty() {
        return vec![ValidationError::NoL3Nodes];
    }

    let mut errors = Vec::new();
    for (host, cred) in ctx.l3_nodes {
        let mut fail = |reason| {
            errors.push(ValidationError::L3Node { host: host.clone(), reason })
        };
        if cred.address.is_empty() {
            fail("address is empty");
        }
        if cred.username.is_empty() {
            fail("username is empty");
        }
        if cred.port == 0 {
            fail("port must be non-zero");
        }
        if cred.password.is_none()
            && cred.key_filename.is_none()
            && cred.pkey.is_none()
            && !ctx.default_key_available
        {
            fail("no password or key, and no default key is configured");
        }
    }
    errors
}

pub fn poll_settings(ctx: &ValidationContext<'_>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (setting, poll) in [("poll", ctx.poll), ("ssh wait", ctx.ssh_wait)] {
        if poll.interval() > poll.timeout() {
            errors.push(ValidationError::Timing {
                setting,
                reason: "interval is longer than timeout",
            });
        }
    }
    errors
}

pub fn required_services(
    ctx: &ValidationContext<'_>,
) -> Vec<ValidationError> {
    let Some(service_types) = ctx.service_types else {
        return vec![];
    };
    REQUIRED_SERVICES
        .iter()
        .filter(|required| !service_types.iter().any(|s| s == *required))
        .map(|required| ValidationError::MissingService(required.to_string()))
        .collect()
}

pub fn external_network_exists(
    ctx: &ValidationContext<'_>,
) -> Vec<ValidationError> {
    let (Some(name), Some(networks)) = (ctx.floating_network, ctx.networks)
    else {
        return vec![];
    };
    if networks.iter().any(|n| n.external && n.name == name) {
        vec![]
    } else {
        vec![ValidationError::ExternalNetwork(name.to_string())]
    }
}
