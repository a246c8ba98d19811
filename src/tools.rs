/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Argument-list builders for the external tools the drivers invoke.

pub mod radosgw_admin {
    use crate::executor::Command;

    pub fn user_create(
        uid: &str,
        display_name: &str,
        email: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Command {
        Command::new("radosgw-admin")
            .args(["user", "create"])
            .arg(format!("--uid={}", uid))
            .arg(format!("--display-name={}", display_name))
            .arg(format!("--email={}", email))
            .arg(format!("--access-key={}", access_key))
            .arg(format!("--secret={}", secret_key))
            .privileged()
    }
}

pub mod ceph {
    use crate::executor::Command;
    use anyhow::Context;
    use serde::Deserialize;

    pub fn pool_create(pool: &str, pg_num: u32) -> Command {
        Command::new("ceph")
            .args(["osd", "pool", "create", pool])
            .args([pg_num.to_string(), pg_num.to_string()])
            .privileged()
    }

    pub fn pool_application_enable(pool: &str, application: &str) -> Command {
        Command::new("ceph")
            .args(["osd", "pool", "application", "enable", pool, application])
            .privileged()
    }

    pub fn pool_delete(pool: &str) -> Command {
        Command::new("ceph")
            .args(["osd", "pool", "delete", pool, pool])
            .arg("--yes-i-really-really-mean-it")
            .privileged()
    }

    pub fn df() -> Command {
        Command::new("ceph")
            .args(["df", "--format", "json"])
            .privileged()
    }

    #[derive(Deserialize)]
    struct Df {
        #[serde(default)]
        pools: Vec<DfPool>,
    }

    #[derive(Deserialize)]
    struct DfPool {
        name: String,
    }

    /// Pool names reported by `ceph df --format json`.
    pub fn parse_df_pools(stdout: &str) -> anyhow::Result<Vec<String>> {
        let df: Df = serde_json::from_str(stdout).context("Unexpected `ceph df` output")?;
        Ok(df.pools.into_iter().map(|pool| pool.name).collect())
    }
}

pub mod rados {
    use crate::executor::Command;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ReadMode {
        Sequential,
        Random,
    }
    impl ReadMode {
        fn as_arg(&self) -> &'static str {
            match self {
                ReadMode::Sequential => "seq",
                ReadMode::Random => "rand",
            }
        }
    }

    /// Write pass that leaves its objects behind for the read passes.
    pub fn bench_write(pool: &str, block_size: u64, seconds: u64) -> Command {
        Command::new("rados")
            .args(["--no-log-to-stderr", "-b"])
            .arg(block_size.to_string())
            .args(["-p", pool, "bench"])
            .arg(seconds.to_string())
            .args(["write", "--no-cleanup"])
            .privileged()
    }

    pub fn bench_read(pool: &str, seconds: u64, mode: ReadMode) -> Command {
        Command::new("rados")
            .args(["--no-log-to-stderr", "-p", pool, "bench"])
            .arg(seconds.to_string())
            .arg(mode.as_arg())
            .privileged()
    }

    pub fn cleanup(pool: &str) -> Command {
        Command::new("rados")
            .args(["-p", pool, "cleanup"])
            .privileged()
    }
}

pub mod rbd {
    use crate::executor::Command;
    use std::path::PathBuf;

    pub fn device_path(pool: &str, image: &str) -> PathBuf {
        PathBuf::from("/dev/rbd").join(pool).join(image)
    }

    pub fn create(pool: &str, image: &str, size_mb: u64) -> Command {
        Command::new("rbd")
            .args(["create", image, "--size"])
            .arg(size_mb.to_string())
            .args(["--pool", pool, "--image-feature", "layering"])
            .privileged()
    }

    pub fn map(pool: &str, image: &str) -> Command {
        Command::new("rbd")
            .args(["map", image, "--pool", pool, "--name", "client.admin"])
            .privileged()
    }

    pub fn unmap(pool: &str, image: &str) -> Command {
        Command::new("rbd")
            .arg("unmap")
            .arg(device_path(pool, image).to_string_lossy())
            .privileged()
    }

    pub fn remove(pool: &str, image: &str) -> Command {
        Command::new("rbd")
            .args(["rm", image, "--pool", pool])
            .privileged()
    }

    /// Short write burst used to check a freshly mapped image accepts IO.
    pub fn bench_write(pool: &str, image: &str) -> Command {
        Command::new("rbd")
            .args(["bench", "--io-type", "write", "--io-total", "64M", image])
            .arg(format!("--pool={}", pool))
            .privileged()
    }

    pub fn info(pool: &str, image: &str) -> Command {
        Command::new("rbd")
            .arg("info")
            .arg(format!("{}/{}", pool, image))
            .privileged()
    }
}

pub mod fio {
    use crate::executor::Command;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FioMode {
        Write,
        Read,
        ReadWrite,
    }
    impl FioMode {
        /// The sequential and random job run for this mode, as `(name, rw)` pairs.
        pub fn jobs(&self) -> [(&'static str, &'static str); 2] {
            match self {
                FioMode::Write => [("seq_write", "write"), ("rand_write", "randwrite")],
                FioMode::Read => [("seq_read", "read"), ("rand_read", "randread")],
                FioMode::ReadWrite => [
                    ("seq_readwrite", "readwrite"),
                    ("rand_readwrite", "randrw"),
                ],
            }
        }
    }

    /// Parameters shared by every fio invocation against one rbd image.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct FioJob {
        pub pool: String,
        pub image: String,
        pub block_size: String,
        pub size: String,
        pub io_depth: u32,
        pub runtime_secs: u64,
        pub num_jobs: u32,
        pub loops: u32,
        pub delete_on_exit: bool,
    }
    impl FioJob {
        pub fn command(&self, mode: FioMode) -> Command {
            let cgroup_nodelete = if self.delete_on_exit { 0 } else { 1 };

            let mut cmd = Command::new("fio")
                .args(["--name=global", "--ioengine=rbd", "--clientname=admin"])
                .arg(format!("--pool={}", self.pool))
                .arg(format!("--rbdname={}", self.image))
                .arg(format!("--bs={}", self.block_size))
                .arg(format!("--size={}", self.size))
                .arg("--direct=0")
                .arg(format!("--iodepth={}", self.io_depth))
                .arg(format!("--runtime={}", self.runtime_secs))
                .arg(format!("--numjobs={}", self.num_jobs))
                .arg(format!("--loops={}", self.loops))
                .arg(format!("--cgroup_nodelete={}", cgroup_nodelete))
                .arg("--group_reporting");

            for (name, rw) in mode.jobs() {
                cmd = cmd.arg(format!("--name={}", name)).arg(format!("--rw={}", rw));
            }
            cmd.privileged()
        }
    }

    pub fn version() -> Command {
        Command::new("fio").arg("--version")
    }
}

pub mod host {
    use crate::executor::Command;
    use std::path::Path;

    pub fn sync() -> Command {
        Command::new("sync").privileged()
    }

    pub fn drop_caches() -> Command {
        Command::new("sysctl")
            .args(["-w", "vm.drop_caches=3"])
            .privileged()
    }

    pub fn mkdir(path: &Path) -> Command {
        Command::new("mkdir")
            .arg("-p")
            .arg(path.to_string_lossy())
            .privileged()
    }

    pub fn mkfs_ext4(device: &Path) -> Command {
        Command::new("mkfs.ext4")
            .arg("-m0")
            .arg(device.to_string_lossy())
            .privileged()
    }

    pub fn mount(device: &Path, mount_point: &Path) -> Command {
        Command::new("mount")
            .arg(device.to_string_lossy())
            .arg(mount_point.to_string_lossy())
            .privileged()
    }

    pub fn umount(mount_point: &Path) -> Command {
        Command::new("umount")
            .arg(mount_point.to_string_lossy())
            .privileged()
    }
}
