// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tests for the example configuration shipped with the crate

use camino::Utf8Path;
use camino::Utf8PathBuf;
use std::time::Duration;
use vrrp_failover::types::CommandSource;
use vrrp_failover::validation::validate;
use vrrp_failover::validation::ValidationContext;
use vrrp_failover::Config;

fn example_config() -> Config {
    let path = Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("configs")
        .join("example.toml");
    Config::from_file(&path).unwrap()
}

#[test]
fn test_example_config() {
    let config = example_config();
    assert_eq!(config.poll.timeout(), Duration::from_secs(120));
    assert_eq!(config.ssh.connect_timeout(), Duration::from_secs(15));
    assert_eq!(config.ping.reply_timeout(), Duration::from_millis(1000));
    assert_eq!(config.openstack.region.as_deref(), Some("RegionOne"));

    let scenario = &config.scenario;
    assert_eq!(
        scenario.floating_ip().fixed_ip,
        Some("10.0.0.5".parse().unwrap())
    );
    assert_eq!(scenario.tenant_networks.len(), 1);
    assert_eq!(
        scenario.command.source().unwrap(),
        CommandSource::ScriptInline {
            script: "systemctl stop keepalived",
            interpreter: "/bin/sh",
        }
    );

    let net1 = &scenario.l3_nodes["net1"];
    assert_eq!(net1.port, 21);
    assert_eq!(net1.password.as_deref(), Some("123456"));
    let net2 = &scenario.l3_nodes["net2"];
    assert_eq!(net2.port, 22);
    assert_eq!(
        net2.key_filename.as_deref(),
        Some(Utf8Path::new("/root/.ssh/id_rsa"))
    );
}

#[test]
fn test_example_config_passes_local_checks() {
    let config = example_config();
    let scenario = &config.scenario;
    validate(&ValidationContext {
        command: &scenario.command,
        l3_nodes: &scenario.l3_nodes,
        default_key_available: config.ssh.default_private_key.is_some(),
        poll: config.poll,
        ssh_wait: config.ssh.wait(),
        floating_network: scenario.floating_network.as_deref(),
        service_types: None,
        networks: None,
    })
    .unwrap();
}
