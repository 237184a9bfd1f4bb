// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the cloud control plane

use crate::types::Agent;
use crate::types::NetworkSummary;
use crate::types::Server;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("authenticating to {url}")]
    Auth {
        url: String,
        #[source]
        err: reqwest::Error,
    },
    #[error("no \"{service_type}\" endpoint in the service catalog")]
    NoEndpoint { service_type: String },
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        err: reqwest::Error,
    },
    #[error("request to {url} returned {status}: {body}")]
    Status { url: String, status: reqwest::StatusCode, body: String },
    #[error("{0}")]
    Other(String),
}

/// Queries a failover run makes against the cloud
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Lists the L3 agents hosting `router_id`, with their HA state
    async fn list_l3_agents_hosting_router(
        &self,
        router_id: &str,
    ) -> Result<Vec<Agent>, ControlPlaneError>;

    async fn get_server(
        &self,
        server_id: &str,
    ) -> Result<Server, ControlPlaneError>;

    async fn list_networks(
        &self,
    ) -> Result<Vec<NetworkSummary>, ControlPlaneError>;

    /// Returns the service types present in the service catalog
    async fn service_types(&self) -> Result<Vec<String>, ControlPlaneError>;
}
