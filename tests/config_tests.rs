use instant_io::config::WorkloadConfig;
use std::{path::Path, time::Duration};

#[test]
fn legacy_json_fixture_loads() -> anyhow::Result<()> {
    let cfg = WorkloadConfig::load(Path::new("./tests/fixtures/legacy-config.json"))?;

    assert_eq!(cfg.log_level()?, tracing::Level::DEBUG);
    assert!(cfg.object_storage.trigger);
    assert_eq!(cfg.object_storage.endpoint_url(), "http://10.8.128.12:8080");
    assert!(!cfg.object_storage.create_user);
    assert_eq!(cfg.pool_bench.block_size, 4096);
    assert_eq!(cfg.pool_bench.read_seconds(), 10);
    assert!(!cfg.pool_bench.random_read);
    assert_eq!(cfg.block_bench.write_size.to_string(), "256M");
    assert_eq!(cfg.block_bench.pg_num, 256);
    Ok(())
}

#[test]
fn toml_fixture_fills_in_defaults() -> anyhow::Result<()> {
    let cfg = WorkloadConfig::load(Path::new("./tests/fixtures/pool-only.toml"))?;

    assert!(!cfg.object_storage.trigger && !cfg.block_bench.trigger);
    assert!(!cfg.use_sudo);
    assert_eq!(cfg.command_timeout(), Some(Duration::from_secs(60)));
    assert_eq!(cfg.pool_bench.read_seconds(), 5);
    assert!(cfg.pool_bench.sequential_read);
    assert!(cfg.pool_bench.drop_caches);
    assert_eq!(cfg.pool_bench.pg_num, 64);
    Ok(())
}

#[test]
fn invalid_fixture_names_its_section() {
    let err = WorkloadConfig::load(Path::new("./tests/fixtures/broken-block.toml"))
        .expect_err("zero run time must be rejected");
    let message = format!("{:#}", err);

    assert!(message.contains("[block_bench]"), "{}", message);
    assert!(message.contains("run_time"), "{}", message);
}

#[test]
fn missing_file_is_an_error() {
    assert!(WorkloadConfig::load(Path::new("./tests/fixtures/nope.toml")).is_err());
}
