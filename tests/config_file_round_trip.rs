use std::io::Write;

use journal_replicator::ServerConfig;
use journal_replicator::config::ServerNode;
use tempfile::NamedTempFile;

#[test]
fn config_written_as_toml_loads_back_identically() {
    let mut config = ServerConfig::default();
    config.nodes.push(ServerNode {
        id: "n0".into(),
        hostname: "10.0.0.1".into(),
        port: 9401,
    });
    config.nodes.push(ServerNode {
        id: "n1".into(),
        hostname: "10.0.0.2".into(),
        port: 9401,
    });
    config.instance = 1;

    let text = toml::to_string_pretty(&config).expect("serialize");
    let mut file = NamedTempFile::new().expect("tempfile");
    file.write_all(text.as_bytes()).expect("write");

    let loaded_text = std::fs::read_to_string(file.path()).expect("read back");
    let loaded: ServerConfig = toml::from_str(&loaded_text).expect("deserialize");

    assert_eq!(loaded.instance, 1);
    assert_eq!(loaded.nodes.len(), 2);
    assert_eq!(loaded.this_node().expect("this node").hostname, "10.0.0.2");
    assert_eq!(loaded.heartbeat_frequency, config.heartbeat_frequency);
}
