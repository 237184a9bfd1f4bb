// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolving the router that fronts a server

use crate::types::FloatingIp;
use crate::types::RouterId;
use crate::types::Server;
use crate::types::TenantNetwork;
use slog::debug;
use slog::Logger;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterLookupError {
    #[error("Found too many networks: {0:?}")]
    Networks(Vec<String>),
    #[error("Found too many routers: {0:?}")]
    Routers(Vec<Option<RouterId>>),
}

/// Returns the id of the gateway router for `server`
///
/// The server's network is the one whose addresses include the floating IP
/// (or the fixed IP it maps to).  Its router comes from the tenant's network
/// list.  Each network is expected to have exactly one router; anything else
/// is an error.
pub fn get_router(
    log: &Logger,
    server: &Server,
    fip: &FloatingIp,
    tenant_networks: &[TenantNetwork],
) -> Result<RouterId, RouterLookupError> {
    let nets: Vec<&String> = server
        .networks
        .iter()
        .filter(|(_, addresses)| {
            addresses.iter().any(|addr| {
                *addr == fip.ip || Some(*addr) == fip.fixed_ip
            })
        })
        .map(|(name, _)| name)
        .collect();
    let &[net] = nets.as_slice() else {
        return Err(RouterLookupError::Networks(
            nets.into_iter().cloned().collect(),
        ));
    };
    debug!(log, "Server's network: {}", net; "server_id" => &server.id);

    let routers: Vec<&Option<RouterId>> = tenant_networks
        .iter()
        .filter(|n| n.name == *net)
        .map(|n| &n.router_id)
        .collect();
    let &[Some(router)] = routers.as_slice() else {
        return Err(RouterLookupError::Routers(
            routers.into_iter().cloned().collect(),
        ));
    };
    debug!(log, "Server's router: {}", router; "server_id" => &server.id);

    Ok(router.clone())
}
