//! Integration tests for bridge firewall orchestration and the bridge driver.

use std::sync::Arc;

use serde_json::json;
use skiff_common::{EndpointId, NetworkId};
use skiff_network::bridge::{BridgeConfig, StaticResolver, setup_ip_tables, teardown_ip_tables};
use skiff_network::iptables::{Failure, Iptables, MemoryIptables, Table};
use skiff_network::options;
use skiff_network::{BridgeDriver, Driver, NetworkError, Options, PortMapper};

fn args(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn resolver() -> StaticResolver {
    StaticResolver::new().with_interface("docker0", "172.17.0.1/16".parse().unwrap())
}

fn config(icc: bool, masquerade: bool, hairpin: bool) -> BridgeConfig {
    BridgeConfig {
        enable_icc: icc,
        enable_ip_masquerade: masquerade,
        hairpin_mode: hairpin,
        ..BridgeConfig::new("docker0")
    }
}

fn setup(ipt: &Arc<MemoryIptables>, config: &BridgeConfig) {
    let mut mapper = PortMapper::new(ipt.clone(), &config.bridge_name);
    setup_ip_tables(ipt.as_ref(), &resolver(), config, &mut mapper).unwrap();
}

#[test]
fn docker0_setup_issues_rules_in_order() {
    let ipt = Arc::new(MemoryIptables::new());
    let mut mapper = PortMapper::new(ipt.clone(), "docker0");

    let chains =
        setup_ip_tables(ipt.as_ref(), &resolver(), &config(true, true, false), &mut mapper)
            .unwrap();

    assert_eq!(
        ipt.commands(),
        vec![
            args("-t nat -I POSTROUTING -s 172.17.0.1/16 ! -o docker0 -j MASQUERADE"),
            args("-D FORWARD -i docker0 -o docker0 -j DROP"),
            args("-A FORWARD -i docker0 -o docker0 -j ACCEPT"),
            args("-I FORWARD -i docker0 ! -o docker0 -j ACCEPT"),
            args("-I FORWARD -o docker0 -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"),
            args("-t nat -n -L DOCKER"),
            args("-t nat -N DOCKER"),
            args("-t nat -A PREROUTING -m addrtype --dst-type LOCAL -j DOCKER"),
            args("-t nat -A OUTPUT -m addrtype --dst-type LOCAL ! --dst 127.0.0.0/8 -j DOCKER"),
            args("-t filter -n -L DOCKER"),
            args("-t filter -N DOCKER"),
            args("-t filter -I FORWARD -o docker0 -j DOCKER"),
        ]
    );

    assert!(
        ipt.commands()
            .iter()
            .all(|cmd| !cmd.iter().any(|arg| arg == "--src-type"))
    );
    assert_eq!(chains.nat.table, Table::Nat);
    assert_eq!(mapper.chain(), Some(&chains.filter));

    // The ICC rule sits behind every rule inserted at the head.
    assert_eq!(
        ipt.rules(Table::Filter, "FORWARD").last(),
        Some(&args("-i docker0 -o docker0 -j ACCEPT"))
    );
}

#[test]
fn disabled_iptables_fails_before_any_command() {
    let ipt = Arc::new(MemoryIptables::new());
    let mut mapper = PortMapper::new(ipt.clone(), "docker0");
    let config = BridgeConfig {
        enable_ip_tables: false,
        ..config(true, true, false)
    };

    let err = setup_ip_tables(ipt.as_ref(), &StaticResolver::new(), &config, &mut mapper)
        .unwrap_err();

    assert!(matches!(err, NetworkError::IptablesDisabled { .. }));
    assert_eq!(ipt.command_count(), 0);
    assert_eq!(ipt.exists_queries(), 0);
    assert!(mapper.chain().is_none());
}

#[test]
fn icc_flip_matches_clean_setup() {
    let flipped = Arc::new(MemoryIptables::new());
    setup(&flipped, &config(false, true, true));
    setup(&flipped, &config(true, true, true));

    let clean = Arc::new(MemoryIptables::new());
    setup(&clean, &config(true, true, true));

    assert_eq!(flipped.snapshot(), clean.snapshot());
    assert!(!flipped.exists(Table::Filter, "FORWARD", &args("-i docker0 -o docker0 -j DROP")));
}

#[test]
fn setup_is_idempotent() {
    let ipt = Arc::new(MemoryIptables::new());
    setup(&ipt, &config(true, true, true));
    let before = ipt.snapshot();

    setup(&ipt, &config(true, true, true));

    assert_eq!(ipt.snapshot(), before);
}

#[test]
fn unexpected_output_fails_setup() {
    let ipt = Arc::new(MemoryIptables::new());
    ipt.fail_matching("MASQUERADE", Failure::Output("iptables: warning".to_string()));
    let mut mapper = PortMapper::new(ipt.clone(), "docker0");

    let err = setup_ip_tables(ipt.as_ref(), &resolver(), &config(true, true, false), &mut mapper)
        .unwrap_err();

    assert!(matches!(err, NetworkError::IptablesSetup { .. }));
    assert!(err.to_string().starts_with("Failed to Setup IP tables: Error iptables POSTROUTING"));
    // No rollback and no later steps.
    assert!(!ipt.has_chain(Table::Nat, "DOCKER"));
}

#[test]
fn unresolvable_bridge_fails_setup() {
    let ipt = Arc::new(MemoryIptables::new());
    let mut mapper = PortMapper::new(ipt.clone(), "br-missing");

    let err = setup_ip_tables(
        ipt.as_ref(),
        &resolver(),
        &BridgeConfig::new("br-missing"),
        &mut mapper,
    )
    .unwrap_err();

    assert!(matches!(err, NetworkError::AddressResolution { .. }));
    assert_eq!(ipt.command_count(), 0);
}

#[test]
fn chain_creation_failure_names_table() {
    let ipt = Arc::new(MemoryIptables::new());
    ipt.fail_matching("-t filter -N", Failure::Error("permission denied".to_string()));
    let mut mapper = PortMapper::new(ipt.clone(), "docker0");

    let err = setup_ip_tables(ipt.as_ref(), &resolver(), &config(true, true, false), &mut mapper)
        .unwrap_err();

    assert!(matches!(err, NetworkError::ChainCreation { table: Table::Filter, .. }));
    assert!(mapper.chain().is_none());
}

#[test]
fn teardown_removes_bridge_rules() {
    let ipt = Arc::new(MemoryIptables::new());
    let config = config(false, true, true);
    let mut mapper = PortMapper::new(ipt.clone(), "docker0");
    let chains = setup_ip_tables(ipt.as_ref(), &resolver(), &config, &mut mapper).unwrap();

    teardown_ip_tables(ipt.as_ref(), &resolver(), &config, Some(&chains)).unwrap();

    assert!(ipt.rules(Table::Filter, "FORWARD").is_empty());
    assert!(ipt.rules(Table::Nat, "POSTROUTING").is_empty());
    assert!(ipt.has_chain(Table::Filter, "DOCKER"));
}

#[test]
fn teardown_swallows_icc_failures() {
    let ipt = Arc::new(MemoryIptables::new());
    let config = config(false, false, false);
    setup(&ipt, &config);
    ipt.fail_matching("-j DROP", Failure::Error("permission denied".to_string()));

    teardown_ip_tables(ipt.as_ref(), &resolver(), &config, None).unwrap();

    assert!(ipt.exists(Table::Filter, "FORWARD", &args("-i docker0 -o docker0 -j DROP")));
}

fn driver() -> (BridgeDriver, Arc<MemoryIptables>) {
    let ipt = Arc::new(MemoryIptables::new());
    let driver = BridgeDriver::new(ipt.clone(), Arc::new(resolver()));
    (driver, ipt)
}

fn opts(value: serde_json::Value) -> Options {
    serde_json::from_value(value).unwrap()
}

#[test_log::test(tokio::test)]
async fn bridge_driver_lifecycle() {
    let (driver, ipt) = driver();
    let nid = NetworkId::new("net1").unwrap();
    let eid = EndpointId::new("ep1").unwrap();

    driver
        .config(&opts(json!({(options::ENABLE_USERLAND_PROXY): false})))
        .await
        .unwrap();
    driver
        .create_network(
            &nid,
            &opts(json!({(options::BRIDGE_NAME): "docker0", (options::ENABLE_ICC): "false"})),
        )
        .await
        .unwrap();

    let config = driver.network_config(&nid).unwrap();
    assert!(config.hairpin_mode);
    assert!(!config.enable_icc);

    let info = driver
        .create_endpoint(
            &nid,
            &eid,
            &opts(json!({
                (options::ENDPOINT_ADDRESS): "172.17.0.2",
                (options::PORT_BINDINGS): [{"host_port": 8080, "container_port": 80}]
            })),
        )
        .await
        .unwrap();
    assert!(info.interfaces.is_empty());
    assert_eq!(
        ipt.rules(Table::Nat, "DOCKER"),
        vec![args("-p tcp -d 0/0 --dport 8080 ! -i docker0 -j DNAT --to-destination 172.17.0.2:80")]
    );

    let details = driver.endpoint_info(&nid, &eid).await.unwrap();
    assert_eq!(details[options::PORT_BINDINGS][0]["host_port"], 8080);

    let join = driver
        .join(&nid, &eid, "/var/run/netns/c1", &Options::new())
        .await
        .unwrap();
    assert_eq!(join.gateway, "172.17.0.1");
    driver.leave(&nid, &eid, &Options::new()).await.unwrap();

    driver.delete_endpoint(&nid, &eid).await.unwrap();
    assert!(ipt.rules(Table::Nat, "DOCKER").is_empty());

    driver.delete_network(&nid).await.unwrap();
    assert!(ipt.rules(Table::Filter, "FORWARD").is_empty());
    assert!(ipt.rules(Table::Nat, "POSTROUTING").is_empty());
    assert!(driver.network_config(&nid).is_none());
}

#[test_log::test(tokio::test)]
async fn bridge_driver_without_iptables_programs_nothing() {
    let (driver, ipt) = driver();
    let nid = NetworkId::new("net1").unwrap();

    driver
        .config(&opts(json!({(options::ENABLE_IP_TABLES): false})))
        .await
        .unwrap();
    driver
        .create_network(&nid, &opts(json!({(options::BRIDGE_NAME): "docker0"})))
        .await
        .unwrap();
    driver.delete_network(&nid).await.unwrap();

    assert_eq!(ipt.command_count(), 0);
}

#[test_log::test(tokio::test)]
async fn bridge_driver_rejects_duplicates_and_unknown_ids() {
    let (driver, _) = driver();
    let nid = NetworkId::new("net1").unwrap();
    let eid = EndpointId::new("ep1").unwrap();
    let network = opts(json!({(options::BRIDGE_NAME): "docker0"}));

    driver.create_network(&nid, &network).await.unwrap();
    assert!(matches!(
        driver.create_network(&nid, &network).await,
        Err(NetworkError::NetworkExists { .. })
    ));

    assert!(matches!(
        driver.join(&nid, &eid, "sb", &Options::new()).await,
        Err(NetworkError::UnknownEndpoint { .. })
    ));
    assert!(matches!(
        driver.delete_network(&NetworkId::new("other").unwrap()).await,
        Err(NetworkError::UnknownNetwork { .. })
    ));

    driver.create_endpoint(&nid, &eid, &Options::new()).await.unwrap();
    assert!(matches!(
        driver.create_endpoint(&nid, &eid, &Options::new()).await,
        Err(NetworkError::EndpointExists { .. })
    ));
}

#[test_log::test(tokio::test)]
async fn published_ports_need_an_address() {
    let (driver, _) = driver();
    let nid = NetworkId::new("net1").unwrap();
    let eid = EndpointId::new("ep1").unwrap();
    driver
        .create_network(&nid, &opts(json!({(options::BRIDGE_NAME): "docker0"})))
        .await
        .unwrap();

    let err = driver
        .create_endpoint(
            &nid,
            &eid,
            &opts(json!({(options::PORT_BINDINGS): [{"host_port": 53, "container_port": 53, "protocol": "udp"}]})),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::InvalidOption { .. }));
}

#[test_log::test(tokio::test)]
async fn failed_port_mapping_is_undone() {
    let (driver, ipt) = driver();
    let nid = NetworkId::new("net1").unwrap();
    let eid = EndpointId::new("ep1").unwrap();
    driver
        .create_network(&nid, &opts(json!({(options::BRIDGE_NAME): "docker0"})))
        .await
        .unwrap();
    ipt.fail_matching("--dport 9090", Failure::Error("permission denied".to_string()));

    let err = driver
        .create_endpoint(
            &nid,
            &eid,
            &opts(json!({
                (options::ENDPOINT_ADDRESS): "172.17.0.2",
                (options::PORT_BINDINGS): [
                    {"host_port": 8080, "container_port": 80},
                    {"host_port": 9090, "container_port": 90}
                ]
            })),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::Iptables { .. }));
    assert!(ipt.rules(Table::Nat, "DOCKER").is_empty());
    assert!(matches!(
        driver.endpoint_info(&nid, &eid).await,
        Err(NetworkError::UnknownEndpoint { .. })
    ));
}

#[test_log::test(tokio::test)]
async fn host_port_is_published_once_per_bridge() {
    let (driver, ipt) = driver();
    let nid = NetworkId::new("net1").unwrap();
    let a = EndpointId::new("a").unwrap();
    let b = EndpointId::new("b").unwrap();
    driver
        .create_network(&nid, &opts(json!({(options::BRIDGE_NAME): "docker0"})))
        .await
        .unwrap();
    let publish = |address: &str| {
        opts(json!({
            (options::ENDPOINT_ADDRESS): address,
            (options::PORT_BINDINGS): [{"host_port": 8080, "container_port": 80}]
        }))
    };

    driver.create_endpoint(&nid, &a, &publish("172.17.0.2")).await.unwrap();
    let err = driver
        .create_endpoint(&nid, &b, &publish("172.17.0.3"))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::PortAllocated { host_port: 8080, .. }));
    assert!(matches!(
        driver.delete_endpoint(&nid, &b).await,
        Err(NetworkError::UnknownEndpoint { .. })
    ));

    assert_eq!(
        ipt.rules(Table::Nat, "DOCKER"),
        vec![args("-p tcp -d 0/0 --dport 8080 ! -i docker0 -j DNAT --to-destination 172.17.0.2:80")]
    );
}

#[test_log::test(tokio::test)]
async fn failed_accept_rule_leaves_no_dnat() {
    let (driver, ipt) = driver();
    let nid = NetworkId::new("net1").unwrap();
    let eid = EndpointId::new("ep1").unwrap();
    driver
        .create_network(&nid, &opts(json!({(options::BRIDGE_NAME): "docker0"})))
        .await
        .unwrap();
    ipt.fail_matching(
        "-d 172.17.0.2 --dport 80 -j ACCEPT",
        Failure::Error("permission denied".to_string()),
    );

    let result = driver
        .create_endpoint(
            &nid,
            &eid,
            &opts(json!({
                (options::ENDPOINT_ADDRESS): "172.17.0.2",
                (options::PORT_BINDINGS): [{"host_port": 8080, "container_port": 80}]
            })),
        )
        .await;

    assert!(matches!(result, Err(NetworkError::Iptables { .. })));
    assert!(ipt.rules(Table::Nat, "DOCKER").is_empty());
    assert!(ipt.rules(Table::Filter, "DOCKER").is_empty());
}

#[test_log::test(tokio::test)]
async fn failed_network_delete_can_be_retried() {
    let (driver, ipt) = driver();
    let nid = NetworkId::new("net1").unwrap();
    driver
        .create_network(&nid, &opts(json!({(options::BRIDGE_NAME): "docker0"})))
        .await
        .unwrap();
    ipt.fail_matching(
        "-D FORWARD -i docker0 ! -o",
        Failure::Error("permission denied".to_string()),
    );

    assert!(driver.delete_network(&nid).await.is_err());
    assert!(driver.network_config(&nid).is_some());

    ipt.clear_failures();
    driver.delete_network(&nid).await.unwrap();

    assert!(driver.network_config(&nid).is_none());
    assert!(ipt.rules(Table::Filter, "FORWARD").is_empty());
    assert!(ipt.rules(Table::Nat, "POSTROUTING").is_empty());
}

#[test]
fn bridge_config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.toml");
    std::fs::write(&path, "bridge_name = \"docker0\"\nhairpin_mode = true\n").unwrap();

    let config = BridgeConfig::load(&path).unwrap();

    assert_eq!(config.bridge_name, "docker0");
    assert!(config.hairpin_mode);
    assert!(config.enable_ip_tables);
    assert!(BridgeConfig::load(&dir.path().join("missing.toml")).is_err());
}
