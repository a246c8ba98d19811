/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::Level;

static EXAMPLE_CONFIG: &str = include_str!("templates/instant-io.toml");

/// Upper bound for any configured duration: one week.
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

fn check_duration(name: &str, secs: u64) -> anyhow::Result<()> {
    if secs == 0 {
        bail!("{} must be greater than 0", name);
    }
    if secs > MAX_DURATION_SECS {
        bail!("{} must be at most {} seconds", name, MAX_DURATION_SECS);
    }
    Ok(())
}

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkloadConfig {
    pub logging: String,
    pub output_dir: PathBuf,
    pub command_timeout_secs: Option<u64>,
    pub use_sudo: bool,
    #[serde(alias = "RGW")]
    pub object_storage: ObjectStorageConfig,
    #[serde(alias = "Rados_Bench")]
    pub pool_bench: PoolBenchConfig,
    #[serde(alias = "RBD")]
    pub block_bench: BlockBenchConfig,
}
impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            logging: "info".to_string(),
            output_dir: PathBuf::from("."),
            command_timeout_secs: None,
            use_sudo: true,
            object_storage: ObjectStorageConfig::default(),
            pool_bench: PoolBenchConfig::default(),
            block_bench: BlockBenchConfig::default(),
        }
    }
}
impl WorkloadConfig {
    pub fn write_example_to_file(path: &Path) -> anyhow::Result<File> {
        let mut file = File::create_new(path)
            .context(format!("Unable to create {}", path.display()))?;
        file.write_all(EXAMPLE_CONFIG.as_bytes())?;
        Ok(file)
    }

    /// Reads, parses and validates a config file. `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn load(path: &Path) -> anyhow::Result<WorkloadConfig> {
        let config = Self::try_from_path(path)?;
        config
            .validate()
            .context(format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn try_from_path(path: &Path) -> anyhow::Result<WorkloadConfig> {
        let conf_str = fs::read_to_string(path)
            .context(format!("Unable to read config file {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::try_from_json_str(&conf_str),
            _ => Self::try_from_str(&conf_str),
        }
    }

    pub fn try_from_str(conf_str: &str) -> anyhow::Result<WorkloadConfig> {
        toml::from_str::<WorkloadConfig>(conf_str)
            .map_err(|e| anyhow::anyhow!("TOML parsing error: {}", e))
    }

    pub fn try_from_json_str(conf_str: &str) -> anyhow::Result<WorkloadConfig> {
        serde_json::from_str::<WorkloadConfig>(conf_str)
            .map_err(|e| anyhow::anyhow!("JSON parsing error: {}", e))
    }

    pub fn log_level(&self) -> anyhow::Result<Level> {
        match self.logging.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" | "warning" => Ok(Level::WARN),
            "error" | "critical" => Ok(Level::ERROR),
            level => bail!("Unknown logging level: {}", level),
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.log_level()?;
        if let Some(secs) = self.command_timeout_secs {
            check_duration("command_timeout_secs", secs)?;
        }

        if self.object_storage.trigger {
            self.object_storage
                .validate()
                .context("[object_storage] section")?;
        }
        if self.pool_bench.trigger {
            self.pool_bench.validate().context("[pool_bench] section")?;
        }
        if self.block_bench.trigger {
            self.block_bench.validate().context("[block_bench] section")?;
        }

        Ok(())
    }

    pub fn any_triggered(&self) -> bool {
        self.object_storage.trigger || self.pool_bench.trigger || self.block_bench.trigger
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObjectStorageConfig {
    pub trigger: bool,
    #[serde(alias = "rgw_host")]
    pub endpoint_host: String,
    pub port: u16,
    pub secure: bool,
    pub region: String,
    #[serde(alias = "create_rgw_user")]
    pub create_user: bool,
    pub access_key: String,
    pub secret_key: String,
    pub num_buckets: u32,
    pub num_objects: u32,
    pub create_bkt_obj: bool,
    pub download_objects: bool,
    pub generate_urls: bool,
    pub delete_buckets_and_objects: bool,
}
impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            trigger: false,
            endpoint_host: String::new(),
            port: 8080,
            secure: false,
            region: "us-east-1".to_string(),
            create_user: false,
            access_key: String::new(),
            secret_key: String::new(),
            num_buckets: 1,
            num_objects: 1,
            create_bkt_obj: true,
            download_objects: false,
            generate_urls: true,
            delete_buckets_and_objects: true,
        }
    }
}
impl ObjectStorageConfig {
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.endpoint_host, self.port)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint_host.trim().is_empty() {
            bail!("endpoint_host is required");
        }
        if !self.create_user && (self.access_key.is_empty() || self.secret_key.is_empty()) {
            bail!("access_key and secret_key are required when create_user is false");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolBenchConfig {
    pub trigger: bool,
    #[serde(alias = "Size")]
    pub block_size: u64,
    pub write_seconds: u64,
    /// Falls back to `write_seconds` when absent.
    pub read_seconds: Option<u64>,
    pub sequential_read: bool,
    pub random_read: bool,
    pub no_pools: u32,
    pub pg_num: u32,
    pub drop_caches: bool,
    pub parallel: bool,
    pub delete_buckets_and_objects: bool,
    pub delete_pool: bool,
}
impl Default for PoolBenchConfig {
    fn default() -> Self {
        Self {
            trigger: false,
            block_size: 4096,
            write_seconds: 30,
            read_seconds: None,
            sequential_read: true,
            random_read: true,
            no_pools: 1,
            pg_num: 64,
            drop_caches: true,
            parallel: false,
            delete_buckets_and_objects: true,
            delete_pool: false,
        }
    }
}
impl PoolBenchConfig {
    pub fn read_seconds(&self) -> u64 {
        self.read_seconds.unwrap_or(self.write_seconds)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.block_size == 0 {
            bail!("block_size must be greater than 0");
        }
        check_duration("write_seconds", self.write_seconds)?;
        check_duration("read_seconds", self.read_seconds())?;
        if self.no_pools == 0 {
            bail!("no_pools must be at least 1");
        }
        if self.pg_num == 0 {
            bail!("pg_num must be greater than 0");
        }
        Ok(())
    }
}

/// A size handed straight to fio: either a plain byte count or a suffixed string like `4k`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum SizeArg {
    Bytes(u64),
    Text(String),
}
impl SizeArg {
    fn is_empty(&self) -> bool {
        match self {
            SizeArg::Bytes(bytes) => *bytes == 0,
            SizeArg::Text(text) => text.trim().is_empty(),
        }
    }
}
impl fmt::Display for SizeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeArg::Bytes(bytes) => write!(f, "{}", bytes),
            SizeArg::Text(text) => f.write_str(text.trim()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BlockBenchConfig {
    pub trigger: bool,
    pub num_loops: u32,
    pub num_parallel_jobs: u32,
    pub block_size: SizeArg,
    pub write_size: SizeArg,
    pub run_time: u64,
    pub delete_file_data: bool,
    pub image_size_mb: u64,
    pub pg_num: u32,
    pub io_depth: u32,
    pub mount_point: PathBuf,
    pub install_command: String,
    pub teardown: bool,
}
impl Default for BlockBenchConfig {
    fn default() -> Self {
        Self {
            trigger: false,
            num_loops: 1,
            num_parallel_jobs: 1,
            block_size: SizeArg::Text("4k".to_string()),
            write_size: SizeArg::Text("1G".to_string()),
            run_time: 60,
            delete_file_data: true,
            image_size_mb: 4096,
            pg_num: 256,
            io_depth: 32,
            mount_point: PathBuf::from("/mnt/ceph-block-device"),
            install_command: "yum install fio -y".to_string(),
            teardown: false,
        }
    }
}
impl BlockBenchConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.num_loops == 0 || self.num_parallel_jobs == 0 || self.io_depth == 0 {
            bail!("num_loops, num_parallel_jobs and io_depth must be greater than 0");
        }
        check_duration("run_time", self.run_time)?;
        check_duration(
            "run_time x num_loops",
            self.run_time.saturating_mul(u64::from(self.num_loops)),
        )?;
        if self.block_size.is_empty() || self.write_size.is_empty() {
            bail!("block_size and write_size must not be empty");
        }
        if self.image_size_mb == 0 || self.pg_num == 0 {
            bail!("image_size_mb and pg_num must be greater than 0");
        }
        if !self.mount_point.is_absolute() {
            bail!("mount_point must be an absolute path");
        }
        match shlex::split(&self.install_command) {
            Some(words) if !words.is_empty() => Ok(()),
            _ => bail!("install_command is not a valid command line"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJECT_ONLY: &str = r#"
        logging = "debug"

        [object_storage]
        trigger = true
        endpoint_host = "rgw.local"
        access_key = "ak"
        secret_key = "sk"
        num_buckets = 3
        num_objects = 2
    "#;

    #[test]
    fn can_load_minimal_toml() -> anyhow::Result<()> {
        let cfg = WorkloadConfig::try_from_str(OBJECT_ONLY)?;
        cfg.validate()?;

        assert_eq!(cfg.log_level()?, Level::DEBUG);
        assert_eq!(cfg.object_storage.num_buckets, 3);
        assert_eq!(cfg.object_storage.port, 8080);
        assert_eq!(cfg.object_storage.endpoint_url(), "http://rgw.local:8080");
        assert!(!cfg.pool_bench.trigger);
        assert!(!cfg.block_bench.trigger);
        Ok(())
    }

    #[test]
    fn legacy_json_layout_is_accepted() -> anyhow::Result<()> {
        let json = r#"{
            "logging": "INFO",
            "RGW": {
                "trigger": false, "rgw_host": "10.0.0.1", "create_rgw_user": true,
                "access_key": "", "secret_key": "", "num_buckets": 2, "num_objects": 5,
                "create_bkt_obj": true, "download_objects": true,
                "delete_buckets_and_objects": true
            },
            "Rados_Bench": {
                "trigger": true, "Size": 4096, "write_seconds": 10,
                "sequential_read": true, "random_read": false, "no_pools": 2,
                "delete_buckets_and_objects": true
            },
            "RBD": {
                "trigger": true, "num_loops": 1, "num_parallel_jobs": 4,
                "block_size": "4k", "write_size": 1073741824, "run_time": 30,
                "delete_file_data": false
            }
        }"#;
        let cfg = WorkloadConfig::try_from_json_str(json)?;
        cfg.validate()?;

        assert!(cfg.object_storage.create_user);
        assert_eq!(cfg.object_storage.endpoint_host, "10.0.0.1");
        assert_eq!(cfg.pool_bench.no_pools, 2);
        assert_eq!(cfg.pool_bench.read_seconds(), 10);
        assert_eq!(cfg.block_bench.write_size.to_string(), "1073741824");
        assert_eq!(cfg.block_bench.block_size.to_string(), "4k");
        Ok(())
    }

    #[test]
    fn triggered_sections_are_validated() {
        let cfg = WorkloadConfig::try_from_str(
            r#"
            [object_storage]
            trigger = true
            endpoint_host = "rgw.local"
        "#,
        )
        .expect("config should parse");
        assert!(cfg.validate().is_err());

        let cfg = WorkloadConfig::try_from_str(
            r#"
            [pool_bench]
            trigger = true
            no_pools = 0
        "#,
        )
        .expect("config should parse");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn durations_are_capped() -> anyhow::Result<()> {
        let mut cfg = WorkloadConfig::default();
        cfg.pool_bench.trigger = true;
        cfg.pool_bench.write_seconds = u64::MAX;
        assert!(cfg.validate().is_err());

        cfg.pool_bench.write_seconds = MAX_DURATION_SECS;
        cfg.validate()?;

        let mut cfg = WorkloadConfig::default();
        cfg.block_bench.trigger = true;
        cfg.block_bench.run_time = MAX_DURATION_SECS;
        cfg.block_bench.num_loops = 2;
        assert!(cfg.validate().is_err());

        let mut cfg = WorkloadConfig::default();
        cfg.command_timeout_secs = Some(u64::MAX);
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn untriggered_sections_are_not_validated() -> anyhow::Result<()> {
        let cfg = WorkloadConfig::try_from_str(
            r#"
            [pool_bench]
            trigger = false
            no_pools = 0
        "#,
        )?;
        cfg.validate()?;
        Ok(())
    }

    #[test]
    fn unknown_log_level_is_rejected() -> anyhow::Result<()> {
        let cfg = WorkloadConfig::try_from_str(r#"logging = "loud""#)?;
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn example_config_is_valid() -> anyhow::Result<()> {
        let cfg = WorkloadConfig::try_from_str(EXAMPLE_CONFIG)?;
        cfg.validate()?;
        assert!(cfg.any_triggered());
        Ok(())
    }

    #[test]
    fn example_config_is_never_overwritten() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("instant-io.toml");

        WorkloadConfig::write_example_to_file(&path)?;
        assert!(WorkloadConfig::write_example_to_file(&path).is_err());
        assert!(WorkloadConfig::load(&path).is_ok());
        Ok(())
    }
}
