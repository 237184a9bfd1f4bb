// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waiting for a server to answer ping

use crate::config::PollConfig;
use crate::icmp::IcmpStatus;
use crate::icmp::Pinger;
use crate::poll;
use crate::poll::wait_for_condition;
use crate::poll::CondCheckError;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::convert::Infallible;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReachabilityError {
    #[error("{ip} did not answer ping after {elapsed:?}")]
    Timeout { ip: IpAddr, elapsed: Duration },
}

pub struct ReachabilityProbe<'a> {
    log: Logger,
    pinger: &'a dyn Pinger,
    poll: PollConfig,
}

impl<'a> ReachabilityProbe<'a> {
    pub fn new(
        log: &Logger,
        pinger: &'a dyn Pinger,
        poll: PollConfig,
    ) -> ReachabilityProbe<'a> {
        ReachabilityProbe {
            log: log.new(o!("component" => "ReachabilityProbe")),
            pinger,
            poll,
        }
    }

    /// Pings `ip` until it answers
    pub async fn wait_for_ping(
        &self,
        ip: IpAddr,
    ) -> Result<(), ReachabilityError> {
        let log = &self.log;
        let pinger = self.pinger;
        let result = wait_for_condition::<_, Infallible, _, _>(
            move || async move {
                match pinger.ping(ip).await {
                    Ok(IcmpStatus::Up) => Ok(()),
                    Ok(IcmpStatus::Down) => {
                        debug!(log, "no reply"; "ip" => %ip);
                        Err(CondCheckError::NotYet)
                    }
                    Err(err) => {
                        warn!(log, "ping failed"; "ip" => %ip, "error" => %err);
                        Err(CondCheckError::NotYet)
                    }
                }
            },
            &self.poll.interval(),
            &self.poll.timeout(),
        )
        .await;

        match result {
            Ok(()) => {
                info!(self.log, "server answers ping"; "ip" => %ip);
                Ok(())
            }
            Err(poll::Error::TimedOut(elapsed)) => {
                Err(ReachabilityError::Timeout { ip, elapsed })
            }
            Err(poll::Error::PermanentError(never)) => match never {},
        }
    }
}
