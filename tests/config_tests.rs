use raftcell::{resolve, RawConfig};
use std::path::PathBuf;

fn raw() -> RawConfig {
    RawConfig {
        bind_address: "127.0.0.1".to_string(),
        raft_port: 7000,
        http_port: 8000,
        data_dir: PathBuf::from("raft"),
        join_address: None,
        bootstrap: false,
    }
}

#[test]
fn resolves_a_plain_loopback_setup() {
    let config = resolve(&raw()).unwrap();

    assert_eq!(config.raft_addr.to_string(), "127.0.0.1:7000");
    assert_eq!(config.http_addr.to_string(), "127.0.0.1:8000");
    assert!(config.data_dir.is_absolute());
    assert!(config.data_dir.ends_with("raft"));
    assert!(!config.bootstrap);
}

#[test]
fn resolves_a_host_name_bind_address() {
    let mut raw = raw();
    raw.bind_address = "localhost".to_string();

    let config = resolve(&raw).unwrap();
    assert!(config.raft_addr.ip().is_loopback());
}

#[test]
fn keeps_an_absolute_data_dir_as_is() {
    let mut raw = raw();
    raw.data_dir = PathBuf::from("/var/lib/raftcell");

    let config = resolve(&raw).unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/var/lib/raftcell"));
}

#[test]
fn rejects_port_zero_and_oversized_ports() {
    let mut raw = raw();
    raw.raft_port = 0;
    raw.http_port = 70000;

    let errors = resolve(&raw).unwrap_err();
    let points: Vec<_> = errors.0.iter().map(|e| e.point).collect();
    assert!(points.contains(&"raft-port"));
    assert!(points.contains(&"http-port"));
}

#[test]
fn reports_every_failing_configuration_point_at_once() {
    let mut raw = raw();
    raw.bind_address = "###not-an-address###".to_string();
    raw.raft_port = 0;

    let errors = resolve(&raw).unwrap_err();
    assert_eq!(errors.0.len(), 2);

    let rendered = errors.to_string();
    assert!(rendered.contains("bind-address"));
    assert!(rendered.contains("raft-port"));
}

#[test]
fn carries_the_join_target_through_unchanged() {
    let mut raw = raw();
    raw.join_address = Some("10.0.0.5:8000".to_string());
    raw.bootstrap = false;

    let config = resolve(&raw).unwrap();
    assert_eq!(config.join_address.as_deref(), Some("10.0.0.5:8000"));
}
