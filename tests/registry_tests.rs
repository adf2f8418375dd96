// Node registry tests: parsing, defaults, validation, reload semantics

use fleetmon::registry::NodeRegistry;

const NODE_FILE: &str = r#"
[[nodes]]
id = "alpha"
pollTarget = { host = "10.0.0.1", port = 9100 }
quotaBytes = 1000000000
resetDay = 5
deviceName = "ens3"

[[nodes]]
id = "beta"
pollTarget = { host = "10.0.0.2", port = 9100, authToken = "s3cret" }
active = false
"#;

#[test]
fn parse_reads_nodes_and_defaults() {
    let nodes = NodeRegistry::parse(NODE_FILE).expect("parse");
    assert_eq!(nodes.len(), 2);

    let alpha = &nodes[0];
    assert_eq!(alpha.id, "alpha");
    assert!(alpha.active);
    assert_eq!(alpha.quota_bytes, 1_000_000_000);
    assert_eq!(alpha.reset_day, 5);
    assert_eq!(alpha.device_name, "ens3");
    assert_eq!(alpha.poll_target.status_url(), "http://10.0.0.1:9100/status");

    let beta = &nodes[1];
    assert!(!beta.active);
    assert_eq!(beta.quota_bytes, 0); // unlimited by default
    assert_eq!(beta.reset_day, 1);
    assert_eq!(beta.device_name, "eth0");
    assert_eq!(beta.poll_target.auth_token.as_deref(), Some("s3cret"));
}

#[test]
fn parse_rejects_duplicate_ids() {
    let dup = format!("{NODE_FILE}\n[[nodes]]\nid = \"alpha\"\npollTarget = {{ host = \"x\", port = 1 }}\n");
    let err = NodeRegistry::parse(&dup).unwrap_err();
    assert!(err.to_string().contains("duplicate node id"));
}

#[test]
fn parse_rejects_reset_day_out_of_range() {
    let bad = NODE_FILE.replace("resetDay = 5", "resetDay = 32");
    let err = NodeRegistry::parse(&bad).unwrap_err();
    assert!(err.to_string().contains("reset_day"));
}

#[test]
fn list_active_filters_inactive_nodes() {
    let nodes = NodeRegistry::parse(NODE_FILE).unwrap();
    let registry = NodeRegistry::from_nodes(nodes);
    let active = registry.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "alpha");
    // list_ids still sees both
    assert_eq!(registry.list_ids().len(), 2);
    assert!(registry.get("beta").is_some());
}

#[test]
fn reload_picks_up_changes_and_keeps_last_good_on_error() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nodes.toml");
    std::fs::write(&path, NODE_FILE).unwrap();

    let registry = NodeRegistry::load(&path).unwrap();
    assert_eq!(registry.list_ids().len(), 2);

    std::fs::write(
        &path,
        "[[nodes]]\nid = \"gamma\"\npollTarget = { host = \"10.0.0.3\", port = 9100 }\n",
    )
    .unwrap();
    registry.reload().unwrap();
    assert_eq!(registry.list_ids(), vec!["gamma".to_string()]);

    // corrupt file: reload errors, previous snapshot stays
    std::fs::write(&path, "[[nodes").unwrap();
    assert!(registry.reload().is_err());
    assert_eq!(registry.list_ids(), vec!["gamma".to_string()]);
}
