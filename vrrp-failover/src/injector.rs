// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Injects a failure on a network node by running a command over SSH

use crate::config::PollConfig;
use crate::poll;
use crate::poll::wait_for_condition;
use crate::poll::CondCheckError;
use crate::ssh::RemoteExecutor;
use crate::ssh::RemoteSession;
use crate::ssh::SshError;
use crate::ssh::SshTarget;
use crate::types::CommandSpec;
use crate::types::HostCredential;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("Error running command {command}. Error {code}: {stderr}")]
    CommandExecution { command: String, code: i64, stderr: String },
    #[error(
        "SSH on {address}:{port} did not become available after {elapsed:?}"
    )]
    Connect {
        address: String,
        port: u16,
        elapsed: Duration,
        #[source]
        last_error: Option<SshError>,
    },
    #[error("opening SSH session on {address}:{port}")]
    Auth {
        address: String,
        port: u16,
        #[source]
        err: SshError,
    },
    #[error("running command on {address}:{port}")]
    Session {
        address: String,
        port: u16,
        #[source]
        err: SshError,
    },
}

/// Runs a failover command on a network node and checks its exit status
pub struct FailoverInjector<'a> {
    log: Logger,
    executor: &'a dyn RemoteExecutor,
    wait: PollConfig,
    default_key: Option<String>,
}

impl<'a> FailoverInjector<'a> {
    /// `wait` bounds how long to wait for sshd to accept a session.
    /// `default_key` is the in-memory private key offered to hosts that name
    /// neither a `key_filename` nor a `pkey`.
    pub fn new(
        log: &Logger,
        executor: &'a dyn RemoteExecutor,
        wait: PollConfig,
        default_key: Option<String>,
    ) -> FailoverInjector<'a> {
        FailoverInjector {
            log: log.new(o!("component" => "FailoverInjector")),
            executor,
            wait,
            default_key,
        }
    }

    /// Runs `command` on `host`
    ///
    /// Fails with [`FailoverError::CommandExecution`] only when the remote
    /// exit code is positive.  A zero, negative or missing exit code counts
    /// as success.
    pub async fn failover(
        &self,
        host: &HostCredential,
        command: &CommandSpec,
    ) -> Result<(), FailoverError> {
        info!(
            self.log,
            "Host: {}. Injecting Failover {}", host.address, command;
            "address" => &host.address,
            "port" => host.port,
        );

        let target = SshTarget::new(host, self.default_key.as_deref());
        let mut session = self.wait_for_ssh(&target).await?;

        // The session is closed whether or not the command ran.
        let result = session.execute(command).await;
        if let Err(err) = session.close().await {
            warn!(self.log, "failed to close SSH session";
                "address" => &host.address,
                "error" => %err,
            );
        }
        let output = result.map_err(|err| FailoverError::Session {
            address: host.address.clone(),
            port: host.port,
            err,
        })?;

        info!(self.log, "failover command finished";
            "address" => &host.address,
            "exit_code" => ?output.exit_code,
        );
        match output.exit_code {
            Some(code) if code > 0 => Err(FailoverError::CommandExecution {
                command: command.to_string(),
                code,
                stderr: output.stderr,
            }),
            _ => Ok(()),
        }
    }

    /// Opens a session on `target`, retrying while sshd is unreachable
    async fn wait_for_ssh(
        &self,
        target: &SshTarget,
    ) -> Result<Box<dyn RemoteSession>, FailoverError> {
        let last_error = Mutex::new(None);
        let last_error = &last_error;
        let log = &self.log;
        let executor = self.executor;

        let result = wait_for_condition::<_, SshError, _, _>(
            move || async move {
                match executor.connect(target).await {
                    Ok(session) => Ok(session),
                    Err(err) if err.is_transient() => {
                        info!(log, "SSH not available yet";
                            "address" => target.socket_address(),
                            "error" => %err,
                        );
                        *last_error.lock().unwrap() = Some(err);
                        Err(CondCheckError::NotYet)
                    }
                    Err(err) => Err(CondCheckError::Failed(err)),
                }
            },
            &self.wait.interval(),
            &self.wait.timeout(),
        )
        .await;

        result.map_err(|error| match error {
            poll::Error::TimedOut(elapsed) => FailoverError::Connect {
                address: target.address.clone(),
                port: target.port,
                elapsed,
                last_error: last_error.lock().unwrap().take(),
            },
            poll::Error::PermanentError(err) => FailoverError::Auth {
                address: target.address.clone(),
                port: target.port,
                err,
            },
        })
    }
}
