// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running one command on a remote host over SSH

use crate::types::CommandSource;
use crate::types::CommandSpec;
use crate::types::CommandSpecError;
use crate::types::HostCredential;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use russh::client;
use russh::ChannelMsg;
use russh::Disconnect;
use slog::debug;
use slog::o;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// SSH extended-data stream number for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("connecting to {address}")]
    Connect {
        address: String,
        #[source]
        err: std::io::Error,
    },
    #[error("timed out after {timeout:?} connecting to {address}")]
    ConnectTimeout { address: String, timeout: Duration },
    #[error("SSH transport error")]
    Transport(#[from] russh::Error),
    #[error("loading private key {path}")]
    KeyFile {
        path: Utf8PathBuf,
        #[source]
        err: russh_keys::Error,
    },
    #[error("decoding in-memory private key")]
    KeyDecode(#[source] russh_keys::Error),
    #[error("authentication rejected for user \"{username}\"")]
    AuthRejected { username: String },
    #[error("no key or password to offer for user \"{username}\"")]
    NoCredentials { username: String },
    #[error("reading script file {path}")]
    ScriptFile {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("invalid command")]
    Command(#[from] CommandSpecError),
}

impl SshError {
    /// Returns true if the error means sshd is not (yet) reachable, as
    /// opposed to a problem that retrying will not fix
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SshError::Connect { .. }
                | SshError::ConnectTimeout { .. }
                | SshError::Transport(_)
        )
    }
}

/// Private key material offered during authentication
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    File(Utf8PathBuf),
    InMemory(String),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::File(path) => f.debug_tuple("File").field(path).finish(),
            KeySource::InMemory(_) => f.write_str("InMemory(<redacted>)"),
        }
    }
}

/// Credentials offered to sshd, in order: the key (if any), then the
/// password (if any)
#[derive(Clone, PartialEq, Eq)]
pub struct SshAuth {
    pub key: Option<KeySource>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshAuth")
            .field("key", &self.key)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SshAuth {
    /// Chooses the key to offer for `host`
    ///
    /// An explicit `key_filename` wins and suppresses both the host's `pkey`
    /// and `default_key`.  Without one, the host's `pkey` is used, falling
    /// back to `default_key`.
    pub fn resolve(
        host: &HostCredential,
        default_key: Option<&str>,
    ) -> SshAuth {
        let key = match &host.key_filename {
            Some(path) => Some(KeySource::File(path.clone())),
            None => host
                .pkey
                .as_deref()
                .or(default_key)
                .map(|key| KeySource::InMemory(key.to_string())),
        };
        SshAuth { key, password: host.password.clone() }
    }
}

/// Where and as whom to open an SSH session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshTarget {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

impl SshTarget {
    pub fn new(host: &HostCredential, default_key: Option<&str>) -> SshTarget {
        SshTarget {
            address: host.address.clone(),
            port: host.port,
            username: host.username.clone(),
            auth: SshAuth::resolve(host, default_key),
        }
    }

    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Exit status and output of a remote command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` if the remote side closed the channel without reporting one
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
}

/// Opens sessions on remote hosts
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Makes one attempt to open an authenticated session
    async fn connect(
        &self,
        target: &SshTarget,
    ) -> Result<Box<dyn RemoteSession>, SshError>;
}

/// An authenticated session on a remote host
#[async_trait]
pub trait RemoteSession: Send {
    async fn execute(
        &mut self,
        command: &CommandSpec,
    ) -> Result<CommandOutput, SshError>;

    async fn close(self: Box<Self>) -> Result<(), SshError>;
}

/// [`RemoteExecutor`] built on russh
pub struct RusshExecutor {
    log: Logger,
    connect_timeout: Duration,
}

impl RusshExecutor {
    pub fn new(log: &Logger, connect_timeout: Duration) -> RusshExecutor {
        RusshExecutor {
            log: log.new(o!("component" => "RusshExecutor")),
            connect_timeout,
        }
    }
}

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Network nodes are addressed from operator-supplied configuration
        // and there is no known_hosts to check them against.
        Ok(true)
    }
}

#[async_trait]
impl RemoteExecutor for RusshExecutor {
    async fn connect(
        &self,
        target: &SshTarget,
    ) -> Result<Box<dyn RemoteSession>, SshError> {
        let address = target.socket_address();
        let log = self.log.new(o!("address" => address.clone()));

        // Keys are loaded before touching the network so that a bad key is
        // reported as such and not retried.
        let key = match &target.auth.key {
            None => None,
            Some(KeySource::File(path)) => Some(
                russh_keys::load_secret_key(path, None).map_err(|err| {
                    SshError::KeyFile { path: path.clone(), err }
                })?,
            ),
            Some(KeySource::InMemory(pem)) => Some(
                russh_keys::decode_secret_key(pem, None)
                    .map_err(SshError::KeyDecode)?,
            ),
        };
        if key.is_none() && target.auth.password.is_none() {
            return Err(SshError::NoCredentials {
                username: target.username.clone(),
            });
        }

        debug!(log, "connecting");
        let timeout = self.connect_timeout;
        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((target.address.as_str(), target.port)),
        )
        .await
        .map_err(|_| SshError::ConnectTimeout {
            address: address.clone(),
            timeout,
        })?
        .map_err(|err| SshError::Connect { address: address.clone(), err })?;

        let mut handle = tokio::time::timeout(
            timeout,
            client::connect_stream(
                Arc::new(client_config()),
                stream,
                ClientHandler,
            ),
        )
        .await
        .map_err(|_| SshError::ConnectTimeout {
            address: address.clone(),
            timeout,
        })??;

        let mut authenticated = false;
        if let Some(key) = key {
            debug!(log, "offering public key");
            authenticated = handle
                .authenticate_publickey(&target.username, Arc::new(key))
                .await?;
        }
        if !authenticated {
            if let Some(password) = &target.auth.password {
                debug!(log, "offering password");
                authenticated = handle
                    .authenticate_password(&target.username, password)
                    .await?;
            }
        }
        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(SshError::AuthRejected {
                username: target.username.clone(),
            });
        }

        debug!(log, "session established");
        Ok(Box::new(RusshSession { log, handle }))
    }
}

/// Session settings for every connection
///
/// `connect_timeout` bounds only the TCP connect and the handshake.  A
/// session stays open for as long as the remote command runs, however long
/// it is silent.
fn client_config() -> client::Config {
    client::Config { inactivity_timeout: None, ..Default::default() }
}

struct RusshSession {
    log: Logger,
    handle: client::Handle<ClientHandler>,
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn execute(
        &mut self,
        command: &CommandSpec,
    ) -> Result<CommandOutput, SshError> {
        let command_line = command.command_line()?;
        let stdin = match command.source()? {
            CommandSource::ScriptFile { path, .. } => {
                Some(tokio::fs::read(path).await.map_err(|err| {
                    SshError::ScriptFile { path: path.clone(), err }
                })?)
            }
            CommandSource::ScriptInline { script, .. } => {
                Some(script.as_bytes().to_vec())
            }
            CommandSource::RemotePath { .. } => None,
        };

        debug!(self.log, "executing"; "command" => &command_line);
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command_line.as_str()).await?;
        if let Some(stdin) = stdin {
            channel.data(&stdin[..]).await?;
        }
        channel.eof().await?;

        let mut output = CommandOutput::default();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext }
                    if ext == SSH_EXTENDED_DATA_STDERR =>
                {
                    stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    output.exit_code = Some(i64::from(exit_status));
                }
                ChannelMsg::Close => break,
                _ => (),
            }
        }
        output.stdout = String::from_utf8_lossy(&stdout).into_owned();
        output.stderr = String::from_utf8_lossy(&stderr).into_owned();
        debug!(self.log, "command finished";
            "exit_code" => ?output.exit_code,
        );
        Ok(output)
    }

    async fn close(self: Box<Self>) -> Result<(), SshError> {
        debug!(self.log, "closing session");
        self.handle.disconnect(Disconnect::ByApplication, "", "en").await?;
        Ok(())
    }
}
