// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Verifies that an L3 HA router fails over between network nodes
//!
//! A [`scenario::FailoverScenario`] finds the VRRP master for the router in
//! front of a server, breaks the master's network node over SSH, and checks
//! that mastership moves while the server stays reachable.  The control
//! plane, SSH and ping are behind traits; [`openstack`], [`ssh`] and [`icmp`]
//! hold the real implementations and [`sim`] holds scripted ones.

pub mod atomic;
pub mod cmd;
pub mod config;
pub mod control_plane;
pub mod icmp;
pub mod injector;
pub mod openstack;
pub mod poll;
pub mod reachability;
pub mod router;
pub mod scenario;
pub mod sim;
pub mod ssh;
pub mod tracker;
pub mod types;
pub mod validation;

pub use config::Config;
pub use scenario::FailoverScenario;
pub use scenario::ScenarioError;
pub use scenario::ScenarioReport;
