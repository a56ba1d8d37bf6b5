use std::io::Write;

use sprig::ReplicaConfig;
use sprig::config::ConfigError;

#[test]
fn load_reads_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"replica_id": 42, "enforce_local_permissions": false, "auto_compact": true}}"#
    )
    .unwrap();

    let config = ReplicaConfig::load(file.path()).unwrap();
    assert_eq!(config.resolve_replica_id().unwrap().get(), 42);
    assert!(!config.enforce_local_permissions);
    assert!(config.auto_compact);
    assert_eq!(config.max_batch_size, None);
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ReplicaConfig::load(dir.path().join("absent.json")).unwrap();
    assert_eq!(config, ReplicaConfig::default());
}

#[test]
fn config_round_trips_through_json() {
    let config = ReplicaConfig::default()
        .with_max_batch_size(64)
        .with_auto_compact(true);
    let json = config.to_json().unwrap();
    assert_eq!(ReplicaConfig::from_json(&json).unwrap(), config);
}

#[test]
fn malformed_file_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();
    let err = ReplicaConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn replica_takes_its_id_from_config() {
    let config = ReplicaConfig::from_json(r#"{"replica_id": 9}"#).unwrap();
    let replica = sprig::Replica::from_config(config).unwrap();
    assert_eq!(replica.id().get(), 9);

    let random = sprig::Replica::from_config(ReplicaConfig::default()).unwrap();
    assert_ne!(random.id().get(), 0);
}
