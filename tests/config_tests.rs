use std::io::Write;

use bifrost::config::Config;
use bifrost::error::BifrostError;

#[test]
fn full_config_loads_and_builds() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
bind_addr = "127.0.0.1:5301"
query_timeout_ms = 4000
max_visits = 64

[[plugins]]
tag = "lan"
type = "hosts"
args = {{ ttl = 60, entries = {{ "router.lan" = ["192.168.1.1"] }} }}

[[plugins]]
tag = "home_net"
type = "client_ip"
args = ["192.168.0.0/16"]

[[plugins]]
tag = "upstreams"
type = "forward"
args = {{ upstreams = [{{ addr = "127.0.0.1:5399", trusted = true }}] }}

[[sequences]]
tag = "resolve"

[[sequences.rules]]
exec = "single_flight"

[[sequences.rules]]
exec = "cache"

[[sequences.rules]]
exec = "$upstreams"

[[sequence]]
exec = "$lan"

[[sequence]]
matches = ["has_resp"]
exec = "return"

[[sequence]]
matches = ["!$home_net"]
exec = "reject REFUSED"

[[sequence]]
matches = ["has_resp"]
exec = "return"

[[sequence]]
exec = "$resolve"
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.query_timeout_ms, 4000);
    assert_eq!(config.max_visits, 64);

    let (registry, _root) = config.build_pipeline().unwrap();
    assert!(registry.get("lan").is_some());
    assert!(registry.get("resolve").is_some());
}

#[test]
fn missing_file_is_a_config_error() {
    let err = Config::load(std::path::Path::new("/nonexistent/bifrost.toml")).unwrap_err();
    assert!(matches!(err, BifrostError::ConfigParseError(_)));
}

#[test]
fn bad_bind_address_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
bind_addr = "not-an-address"

[[sequence]]
exec = "reject"
"#
    )
    .unwrap();

    let err = Config::load(file.path()).unwrap_err();
    assert!(matches!(err, BifrostError::InvalidBindAddress(_)));
}
