// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`ControlPlane`] implementation backed by the OpenStack HTTP APIs
//!
//! Authentication uses Keystone v3 passwords.  Endpoints for the network
//! (Neutron) and compute (Nova) services come from the catalog returned with
//! the token.

use crate::config::OpenStackConfig;
use crate::control_plane::ControlPlane;
use crate::control_plane::ControlPlaneError;
use crate::types::Agent;
use crate::types::NetworkSummary;
use crate::types::Server;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

const SUBJECT_TOKEN_HEADER: &str = "x-subject-token";
const AUTH_TOKEN_HEADER: &str = "x-auth-token";

pub struct OpenStackClient {
    log: Logger,
    client: reqwest::Client,
    catalog: Vec<CatalogEntry>,
    network_url: String,
    compute_url: String,
}

#[derive(Clone, Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Clone, Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct AgentsResponse {
    #[serde(default)]
    agents: Vec<Agent>,
}

#[derive(Deserialize)]
struct NetworksResponse {
    #[serde(default)]
    networks: Vec<NeutronNetwork>,
}

#[derive(Deserialize)]
struct NeutronNetwork {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "router:external", default)]
    external: bool,
}

#[derive(Deserialize)]
struct ServerResponse {
    server: NovaServer,
}

#[derive(Deserialize)]
struct NovaServer {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<NovaAddress>>,
}

#[derive(Deserialize)]
struct NovaAddress {
    addr: IpAddr,
}

impl OpenStackClient {
    /// Authenticates against Keystone and returns a client for the services
    /// in the resulting catalog
    pub async fn connect(
        log: &Logger,
        config: &OpenStackConfig,
    ) -> Result<OpenStackClient, ControlPlaneError> {
        let log = log.new(o!(
            "component" => "OpenStackClient",
            "auth_url" => config.auth_url.clone(),
        ));

        let login_client = build_reqwest_client(config, HeaderMap::new())
            .map_err(|err| ControlPlaneError::Auth {
                url: config.auth_url.clone(),
                err,
            })?;

        let url =
            format!("{}/v3/auth/tokens", config.auth_url.trim_end_matches('/'));
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": config.username,
                            "domain": { "name": config.user_domain_name },
                            "password": config.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": config.project_name,
                        "domain": { "name": config.project_domain_name },
                    }
                }
            }
        });

        debug!(log, "requesting token"; "username" => &config.username);
        let response = login_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| ControlPlaneError::Auth { url: url.clone(), err })?;
        let response = check_status(&url, response).await?;

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .ok_or_else(|| {
                ControlPlaneError::Other(format!(
                    "expected {} header after login",
                    SUBJECT_TOKEN_HEADER
                ))
            })?
            .clone();
        let TokenResponse { token: TokenBody { catalog } } = response
            .json()
            .await
            .map_err(|err| ControlPlaneError::Request {
                url: url.clone(),
                err,
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTH_TOKEN_HEADER, token);
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        let client = build_reqwest_client(config, headers)
            .map_err(|err| ControlPlaneError::Auth { url: url.clone(), err })?;

        let interface = config.interface.as_str();
        let region = config.region.as_deref();
        let network_url =
            find_endpoint(&catalog, "network", interface, region)?;
        let compute_url =
            find_endpoint(&catalog, "compute", interface, region)?;
        info!(log, "authenticated";
            "network_url" => &network_url,
            "compute_url" => &compute_url,
        );

        Ok(OpenStackClient { log, client, catalog, network_url, compute_url })
    }

    fn neutron_url(&self, path: &str) -> String {
        let base = self.network_url.trim_end_matches('/');
        if base.ends_with("/v2.0") {
            format!("{}{}", base, path)
        } else {
            format!("{}/v2.0{}", base, path)
        }
    }

    fn nova_url(&self, path: &str) -> String {
        format!("{}{}", self.compute_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ControlPlaneError> {
        debug!(self.log, "GET"; "url" => url);
        let response = self.client.get(url).send().await.map_err(|err| {
            ControlPlaneError::Request { url: url.to_string(), err }
        })?;
        let response = check_status(url, response).await?;
        response.json().await.map_err(|err| ControlPlaneError::Request {
            url: url.to_string(),
            err,
        })
    }
}

#[async_trait]
impl ControlPlane for OpenStackClient {
    async fn list_l3_agents_hosting_router(
        &self,
        router_id: &str,
    ) -> Result<Vec<Agent>, ControlPlaneError> {
        let url =
            self.neutron_url(&format!("/routers/{}/l3-agents", router_id));
        let AgentsResponse { agents } = self.get_json(&url).await?;
        Ok(agents)
    }

    async fn get_server(
        &self,
        server_id: &str,
    ) -> Result<Server, ControlPlaneError> {
        let url = self.nova_url(&format!("/servers/{}", server_id));
        let ServerResponse { server } = self.get_json(&url).await?;
        let networks = server
            .addresses
            .into_iter()
            .map(|(name, addrs)| {
                (name, addrs.into_iter().map(|a| a.addr).collect())
            })
            .collect();
        Ok(Server { id: server.id, name: server.name, networks })
    }

    async fn list_networks(
        &self,
    ) -> Result<Vec<NetworkSummary>, ControlPlaneError> {
        let url = self.neutron_url("/networks");
        let NetworksResponse { networks } = self.get_json(&url).await?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id,
                name: n.name,
                external: n.external,
            })
            .collect())
    }

    async fn service_types(&self) -> Result<Vec<String>, ControlPlaneError> {
        Ok(self.catalog.iter().map(|e| e.service_type.clone()).collect())
    }
}

fn build_reqwest_client(
    config: &OpenStackConfig,
    headers: HeaderMap,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
}

async fn check_status(
    url: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ControlPlaneError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ControlPlaneError::Status { url: url.to_string(), status, body })
}

fn find_endpoint(
    catalog: &[CatalogEntry],
    service_type: &str,
    interface: &str,
    region: Option<&str>,
) -> Result<String, ControlPlaneError> {
    catalog
        .iter()
        .filter(|entry| entry.service_type == service_type)
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == interface
                && region
                    .map_or(true, |r| endpoint.region.as_deref() == Some(r))
        })
        .map(|endpoint| endpoint.url.clone())
        .ok_or_else(|| ControlPlaneError::NoEndpoint {
            service_type: service_type.to_string(),
        })
}
