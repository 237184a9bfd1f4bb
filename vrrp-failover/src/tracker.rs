// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tracks which L3 agent is the VRRP master for a router

use crate::config::PollConfig;
use crate::control_plane::ControlPlane;
use crate::control_plane::ControlPlaneError;
use crate::poll;
use crate::poll::wait_for_condition;
use crate::poll::CondCheckError;
use crate::types::Agent;
use crate::types::AgentList;
use slog::info;
use slog::o;
use slog::Logger;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(
        "router {router_id} did not converge to a single active agent \
         after {elapsed:?} (last active set: {})",
        AgentList(last_observed)
    )]
    Timeout { router_id: String, elapsed: Duration, last_observed: Vec<Agent> },
    #[error("listing L3 agents hosting router {router_id}")]
    ControlPlane {
        router_id: String,
        #[source]
        err: ControlPlaneError,
    },
}

/// Finds the agent currently active for a router, waiting out convergence
pub struct MastershipTracker<'a> {
    log: Logger,
    control_plane: &'a dyn ControlPlane,
    poll: PollConfig,
}

impl<'a> MastershipTracker<'a> {
    pub fn new(
        log: &Logger,
        control_plane: &'a dyn ControlPlane,
        poll: PollConfig,
    ) -> MastershipTracker<'a> {
        MastershipTracker {
            log: log.new(o!("component" => "MastershipTracker")),
            control_plane,
            poll,
        }
    }

    /// Returns the agents currently reporting "active" for `router_id`
    pub async fn active_agents(
        &self,
        router_id: &str,
    ) -> Result<Vec<Agent>, ControlPlaneError> {
        let agents =
            self.control_plane.list_l3_agents_hosting_router(router_id).await?;
        let active: Vec<Agent> =
            agents.into_iter().filter(Agent::is_active).collect();
        info!(
            self.log,
            "Router {} is ACTIVE on: {}", router_id, AgentList(&active);
            "router_id" => router_id,
            "active_count" => active.len(),
        );
        Ok(active)
    }

    /// Waits until exactly one agent reports "active" for `router_id` and
    /// returns it
    ///
    /// Zero active agents and more than one (split brain while VRRP
    /// converges) are both treated as "not yet".
    pub async fn get_master_agent(
        &self,
        router_id: &str,
    ) -> Result<Agent, TrackerError> {
        let last_observed = Mutex::new(Vec::new());
        let last_observed = &last_observed;

        let result = wait_for_condition::<_, ControlPlaneError, _, _>(
            move || async move {
                let mut active = self.active_agents(router_id).await?;
                if active.len() == 1 {
                    return Ok(active.remove(0));
                }
                *last_observed.lock().unwrap() = active;
                Err(CondCheckError::NotYet)
            },
            &self.poll.interval(),
            &self.poll.timeout(),
        )
        .await;

        match result {
            Ok(master) => {
                info!(
                    self.log,
                    "Found router {} master on agent {}", router_id, master;
                    "router_id" => router_id,
                    "agent_id" => &master.id,
                    "host" => &master.host,
                );
                Ok(master)
            }
            Err(poll::Error::TimedOut(elapsed)) => Err(TrackerError::Timeout {
                router_id: router_id.to_string(),
                elapsed,
                last_observed: std::mem::take(
                    &mut *last_observed.lock().unwrap(),
                ),
            }),
            Err(poll::Error::PermanentError(err)) => {
                Err(TrackerError::ControlPlane {
                    router_id: router_id.to_string(),
                    err,
                })
            }
        }
    }
}
