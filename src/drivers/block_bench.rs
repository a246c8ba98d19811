/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{bench_timeout, log_output};
use crate::{
    batch::BatchResult,
    errors::ProvisioningError,
    executor::{Command, CommandResult, Executor},
    run_context::{ResourceCounter, RunContext},
    tools::{
        ceph,
        fio::{self, FioJob, FioMode},
        host, rbd,
    },
};
use anyhow::bail;
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, error, info};

/// How far block device provisioning got. Each state implies all the earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    New,
    PoolCreated,
    ImageCreated,
    Mapped,
    Formatted,
    Mounted,
    Ready,
}

/// Provisions an rbd image, maps and mounts it on this host, then runs fio against it.
pub struct BlockBenchDriver {
    ctx: RunContext,
    executor: Arc<dyn Executor>,
    pool: String,
    image: String,
    state: DeviceState,
}
impl BlockBenchDriver {
    pub fn new(ctx: &RunContext, executor: Arc<dyn Executor>, counter: &ResourceCounter) -> Self {
        let (pool, image) = resource_names(ctx, counter.next());
        Self {
            ctx: ctx.clone(),
            executor,
            pool,
            image,
            state: DeviceState::New,
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool
    }

    pub fn image_name(&self) -> &str {
        &self.image
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn device_path(&self) -> PathBuf {
        rbd::device_path(&self.pool, &self.image)
    }

    /// Resources this driver has created and not torn down, for the run summary.
    pub fn live_resources(&self) -> Vec<String> {
        let mount_point = &self.ctx.config.block_bench.mount_point;
        let mut resources = vec![];
        if self.state >= DeviceState::PoolCreated {
            resources.push(format!("pool {}", self.pool));
        }
        if self.state >= DeviceState::ImageCreated {
            resources.push(format!("image {}/{}", self.pool, self.image));
        }
        if self.state >= DeviceState::Mapped {
            resources.push(format!("mapping {}", self.device_path().display()));
        }
        if self.state >= DeviceState::Mounted {
            resources.push(format!("mount {}", mount_point.display()));
        }
        resources
    }

    async fn provision(
        &self,
        step: &'static str,
        cmd: Command,
    ) -> Result<CommandResult, ProvisioningError> {
        debug!("Provisioning step: {}", step);
        let result = self
            .executor
            .execute(&cmd)
            .await
            .map_err(|source| ProvisioningError::Command { step, source })?;
        log_output(step, &result);
        Ok(result)
    }

    /// Makes sure fio is installed and the mount point exists. Safe to call repeatedly.
    pub async fn complete_prerequisites(&self) -> Result<(), ProvisioningError> {
        let config = &self.ctx.config.block_bench;

        let version = self
            .executor
            .execute(&fio::version().tolerate_failure())
            .await;
        match version {
            Ok(result) if result.success() => {
                debug!("fio is available: {}", result.stdout.trim());
            }
            _ => {
                info!("fio not found, installing with `{}`", config.install_command);
                let install = Command::parse(&config.install_command)
                    .map_err(|err| ProvisioningError::InvalidCommand {
                        step: "install fio",
                        message: format!("{:#}", err),
                    })?
                    .privileged();
                self.provision("install fio", install).await?;
            }
        }

        if config.mount_point.is_dir() {
            debug!("Mount point {} already exists", config.mount_point.display());
        } else {
            self.provision("create mount point", host::mkdir(&config.mount_point))
                .await?;
        }

        Ok(())
    }

    /// Runs the provisioning chain from pool creation to a mounted, exercised device. Each step
    /// only runs if every earlier one succeeded; the first failure is returned with its step.
    pub async fn initialize(&mut self) -> Result<(), ProvisioningError> {
        let config = &self.ctx.config.block_bench;
        let device = self.device_path();
        info!("Initializing rbd image {}/{}", self.pool, self.image);

        if self.state < DeviceState::PoolCreated {
            self.provision("create pool", ceph::pool_create(&self.pool, config.pg_num))
                .await?;
            self.state = DeviceState::PoolCreated;
        }
        if self.state < DeviceState::ImageCreated {
            // tagging an already tagged pool is a no-op, so a retry can repeat it
            self.provision(
                "enable pool application",
                ceph::pool_application_enable(&self.pool, "rbd"),
            )
            .await?;
            self.provision(
                "create image",
                rbd::create(&self.pool, &self.image, config.image_size_mb),
            )
            .await?;
            self.state = DeviceState::ImageCreated;
        }
        if self.state < DeviceState::Mapped {
            self.provision("map image", rbd::map(&self.pool, &self.image))
                .await?;
            self.state = DeviceState::Mapped;
        }
        if self.state < DeviceState::Formatted {
            self.provision("format device", host::mkfs_ext4(&device))
                .await?;
            self.state = DeviceState::Formatted;
        }
        if self.state < DeviceState::Mounted {
            self.provision("mount device", host::mount(&device, &config.mount_point))
                .await?;
            self.state = DeviceState::Mounted;
        }
        if self.state < DeviceState::Ready {
            self.provision("write check", rbd::bench_write(&self.pool, &self.image))
                .await?;
            self.state = DeviceState::Ready;
        }

        self.log_image_info().await;
        info!("rbd image {}/{} is ready for IO", self.pool, self.image);
        Ok(())
    }

    async fn log_image_info(&self) {
        let info = rbd::info(&self.pool, &self.image).tolerate_failure();
        match self.executor.execute(&info).await {
            Ok(result) => debug!(
                "rbd info {}/{}:\n{}",
                self.pool,
                self.image,
                result.stdout.trim_end()
            ),
            Err(err) => debug!("rbd info unavailable: {:#}", err),
        }
    }

    fn fio_job(&self) -> FioJob {
        let config = &self.ctx.config.block_bench;
        FioJob {
            pool: self.pool.clone(),
            image: self.image.clone(),
            block_size: config.block_size.to_string(),
            size: config.write_size.to_string(),
            io_depth: config.io_depth,
            runtime_secs: config.run_time,
            num_jobs: config.num_parallel_jobs,
            loops: config.num_loops,
            delete_on_exit: config.delete_file_data,
        }
    }

    async fn run_fio(&self, mode: FioMode) -> anyhow::Result<CommandResult> {
        if self.state != DeviceState::Ready {
            bail!(
                "rbd image {}/{} is not ready for IO (state {:?})",
                self.pool,
                self.image,
                self.state
            );
        }

        let config = &self.ctx.config.block_bench;
        let timeout = bench_timeout(config.run_time.saturating_mul(u64::from(config.num_loops)));
        info!("Running fio {:?} against {}/{}", mode, self.pool, self.image);

        let result = self
            .executor
            .execute(&self.fio_job().command(mode).timeout(timeout))
            .await?;
        log_output("fio", &result);
        self.log_image_info().await;
        Ok(result)
    }

    pub async fn write_ops(&self) -> anyhow::Result<CommandResult> {
        self.run_fio(FioMode::Write).await
    }

    pub async fn read_ops(&self) -> anyhow::Result<CommandResult> {
        self.run_fio(FioMode::Read).await
    }

    pub async fn read_write_ops(&self) -> anyhow::Result<CommandResult> {
        self.run_fio(FioMode::ReadWrite).await
    }

    /// Unmounts, unmaps and removes the image, skipping what was never set up. Keeps going past
    /// failures; the pool itself is left in place.
    pub async fn teardown(&mut self) -> BatchResult<&'static str> {
        let config = &self.ctx.config.block_bench;
        let mut result = BatchResult::new();
        info!("Tearing down rbd image {}/{}", self.pool, self.image);

        let mut steps = vec![];
        if self.state >= DeviceState::Mounted {
            steps.push((
                "unmount device",
                host::umount(&config.mount_point),
                DeviceState::Formatted,
            ));
        }
        if self.state >= DeviceState::Mapped {
            steps.push((
                "unmap image",
                rbd::unmap(&self.pool, &self.image),
                DeviceState::ImageCreated,
            ));
        }
        if self.state >= DeviceState::ImageCreated {
            steps.push((
                "remove image",
                rbd::remove(&self.pool, &self.image),
                DeviceState::PoolCreated,
            ));
        }

        for (step, cmd, reverted) in steps {
            match self.executor.execute(&cmd).await {
                Ok(_) => {
                    self.state = reverted;
                    result.push_ok(step);
                }
                Err(err) => {
                    error!("Teardown of {}/{} stopped at {}", self.pool, self.image, step);
                    result.push_err(step, err.into());
                    // later steps need this one to have worked
                    break;
                }
            }
        }

        result
    }
}

/// Pool and image names for the block benchmark with the given ordinal.
pub(crate) fn resource_names(ctx: &RunContext, ordinal: u32) -> (String, String) {
    (
        format!("rbd_io_pool_{}_{}", ordinal, ctx.run_id),
        format!("rbd_io_image_{}_{}", ordinal, ctx.run_id),
    )
}
