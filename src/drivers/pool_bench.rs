/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{bench_timeout, log_output};
use crate::{
    batch::BatchResult,
    config::PoolBenchConfig,
    errors::ProvisioningError,
    executor::{Command, CommandResult, ExecutionError, Executor},
    run_context::{ResourceCounter, RunContext},
    tools::{
        ceph, host,
        rados::{self, ReadMode},
    },
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs `rados bench` against a pool it creates for itself.
pub struct PoolBenchDriver {
    ctx: RunContext,
    executor: Arc<dyn Executor>,
    pool: String,
    created: bool,
}
impl PoolBenchDriver {
    pub fn new(ctx: &RunContext, executor: Arc<dyn Executor>, counter: &ResourceCounter) -> Self {
        Self {
            pool: pool_name(ctx, counter.next()),
            ctx: ctx.clone(),
            executor,
            created: false,
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool
    }

    /// Whether `ceph osd pool create` has succeeded, even if the rest of `initialize` did not.
    pub fn pool_created(&self) -> bool {
        self.created
    }

    pub fn config(&self) -> &PoolBenchConfig {
        &self.ctx.config.pool_bench
    }

    async fn provision(
        &self,
        step: &'static str,
        cmd: Command,
    ) -> Result<CommandResult, ProvisioningError> {
        let result = self
            .executor
            .execute(&cmd)
            .await
            .map_err(|source| ProvisioningError::Command { step, source })?;
        log_output(step, &result);
        Ok(result)
    }

    /// Creates the pool, tags it for rados and checks the cluster reports it.
    pub async fn initialize(&mut self) -> Result<(), ProvisioningError> {
        let pg_num = self.ctx.config.pool_bench.pg_num;
        info!("Creating pool {} for rados bench", self.pool);

        self.provision("create pool", ceph::pool_create(&self.pool, pg_num))
            .await?;
        self.created = true;
        self.provision(
            "enable pool application",
            ceph::pool_application_enable(&self.pool, "rados"),
        )
        .await?;

        let df = self.provision("verify pool", ceph::df()).await?;
        let pools = ceph::parse_df_pools(&df.stdout).map_err(|err| {
            warn!("Unable to read pool list: {:#}", err);
            ProvisioningError::PoolMissing {
                pool: self.pool.clone(),
            }
        })?;
        if !pools.iter().any(|pool| *pool == self.pool) {
            return Err(ProvisioningError::PoolMissing {
                pool: self.pool.clone(),
            });
        }

        info!("Pool {} created and verified", self.pool);
        Ok(())
    }

    /// Flushes and drops the page cache when configured to. A refusal is only a warning.
    async fn drop_caches(&self) {
        if !self.ctx.config.pool_bench.drop_caches {
            return;
        }

        let _host = self.ctx.host_lock.lock().await;
        debug!("Dropping page cache before benchmark");
        for cmd in [host::sync(), host::drop_caches()] {
            if let Err(err) = self.executor.execute(&cmd).await {
                warn!("Unable to drop page cache before benchmark on {}: {}", self.pool, err);
                return;
            }
        }
    }

    pub async fn write_benchmark(
        &self,
        block_size: u64,
        duration_secs: u64,
    ) -> Result<CommandResult, ExecutionError> {
        self.drop_caches().await;
        info!(
            "Running rados write bench on {} for {}s with {} byte blocks",
            self.pool, duration_secs, block_size
        );

        let cmd = rados::bench_write(&self.pool, block_size, duration_secs)
            .timeout(bench_timeout(duration_secs));
        let result = self.executor.execute(&cmd).await?;
        log_output("rados write bench", &result);
        Ok(result)
    }

    /// Runs the read passes enabled in the config, in sequential then random order. A failed
    /// pass is recorded and the next one still runs. With neither enabled this does nothing.
    pub async fn read_benchmark(&self, duration_secs: u64) -> BatchResult<ReadMode> {
        let config = &self.ctx.config.pool_bench;
        let mut result = BatchResult::new();

        let modes = [
            (ReadMode::Sequential, config.sequential_read),
            (ReadMode::Random, config.random_read),
        ]
        .into_iter()
        .filter_map(|(mode, enabled)| enabled.then_some(mode))
        .collect::<Vec<_>>();

        if modes.is_empty() {
            info!("No read passes enabled for pool {}, skipping reads", self.pool);
            return result;
        }

        for mode in modes {
            self.drop_caches().await;
            info!("Running rados {:?} read bench on {}", mode, self.pool);
            let cmd = rados::bench_read(&self.pool, duration_secs, mode)
                .timeout(bench_timeout(duration_secs));

            match self.executor.execute(&cmd).await {
                Ok(output) => {
                    log_output("rados read bench", &output);
                    result.push_ok(mode);
                }
                Err(err) => result.push_err(
                    format!("{:?} read on {}", mode, self.pool),
                    anyhow::Error::from(err),
                ),
            }
        }

        result
    }

    /// Removes the objects left behind by the write pass.
    pub async fn cleanup(&self) -> Result<(), ExecutionError> {
        info!("Cleaning up benchmark objects in pool {}", self.pool);
        let result = self.executor.execute(&rados::cleanup(&self.pool)).await?;
        log_output("rados cleanup", &result);
        Ok(())
    }

    pub async fn delete_pool(&self) -> Result<(), ExecutionError> {
        info!("Deleting pool {}", self.pool);
        self.executor
            .execute(&ceph::pool_delete(&self.pool))
            .await?;
        Ok(())
    }
}

pub(crate) fn pool_name(ctx: &RunContext, ordinal: u32) -> String {
    format!("instant_io_pool_{}_{}", ordinal, ctx.run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WorkloadConfig,
        run_context::RunId,
        testing::{ceph_df_output, ScriptedExecutor},
    };
    use std::time::Duration;

    fn context(configure: impl FnOnce(&mut WorkloadConfig)) -> RunContext {
        let mut config = WorkloadConfig::default();
        config.pool_bench.trigger = true;
        configure(&mut config);
        RunContext::new(RunId::from("77"), config)
    }

    fn driver(ctx: &RunContext, executor: &Arc<ScriptedExecutor>) -> PoolBenchDriver {
        PoolBenchDriver::new(ctx, executor.clone(), &ResourceCounter::starting_at(1))
    }

    #[tokio::test]
    async fn initialize_verifies_pool_in_df() -> anyhow::Result<()> {
        let ctx = context(|_| {});
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("ceph df", &ceph_df_output(&["rbd", "instant_io_pool_1_77"]));

        let mut driver = driver(&ctx, &executor);
        assert_eq!(driver.pool_name(), "instant_io_pool_1_77");
        driver.initialize().await?;
        assert!(driver.pool_created());

        assert_eq!(
            executor.history(),
            [
                "ceph osd pool create instant_io_pool_1_77 64 64",
                "ceph osd pool application enable instant_io_pool_1_77 rados",
                "ceph df --format json",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn pool_absent_from_df_is_a_provisioning_error() -> anyhow::Result<()> {
        let ctx = context(|_| {});
        let executor = Arc::new(ScriptedExecutor::new());
        // a prefix of the real name must not count
        executor.respond("ceph df", &ceph_df_output(&["instant_io_pool_1_7"]));

        let mut driver = driver(&ctx, &executor);
        let err = driver.initialize().await.unwrap_err();
        assert!(matches!(err, ProvisioningError::PoolMissing { .. }));
        assert!(driver.pool_created());
        Ok(())
    }

    #[tokio::test]
    async fn failed_pool_create_stops_initialization() -> anyhow::Result<()> {
        let ctx = context(|_| {});
        let executor = Arc::new(ScriptedExecutor::new());
        executor.fail("osd pool create", 1, "EPERM");

        let mut driver = driver(&ctx, &executor);
        let err = driver.initialize().await.unwrap_err();
        assert_eq!(err.step(), "create pool");
        assert_eq!(executor.history().len(), 1);
        assert!(!driver.pool_created());
        Ok(())
    }

    #[tokio::test]
    async fn refused_cache_drop_still_runs_every_bench() -> anyhow::Result<()> {
        let ctx = context(|_| {});
        let executor = Arc::new(ScriptedExecutor::new());
        executor.fail("sysctl", 1, "permission denied on key 'vm.drop_caches'");

        let driver = driver(&ctx, &executor);
        driver.write_benchmark(4096, 10).await?;
        let reads = driver.read_benchmark(10).await;

        assert!(reads.is_complete());
        assert_eq!(reads.succeeded, [ReadMode::Sequential, ReadMode::Random]);
        assert!(executor.ran("bench 10 write"));
        assert!(executor.ran("bench 10 seq"));
        assert!(executor.ran("bench 10 rand"));
        assert_eq!(executor.count_matching("sysctl"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn huge_durations_do_not_overflow_the_timeout() -> anyhow::Result<()> {
        let ctx = context(|config| config.pool_bench.drop_caches = false);
        let executor = Arc::new(ScriptedExecutor::new());

        driver(&ctx, &executor).write_benchmark(4096, u64::MAX).await?;

        assert_eq!(executor.commands()[0].get_timeout(), Some(Duration::MAX));
        Ok(())
    }

    #[tokio::test]
    async fn write_drops_caches_first_and_keeps_objects() -> anyhow::Result<()> {
        let ctx = context(|_| {});
        let executor = Arc::new(ScriptedExecutor::new());

        driver(&ctx, &executor).write_benchmark(4096, 10).await?;

        assert_eq!(
            executor.history(),
            [
                "sync",
                "sysctl -w 'vm.drop_caches=3'",
                "rados --no-log-to-stderr -b 4096 -p instant_io_pool_1_77 bench 10 write --no-cleanup",
            ]
        );
        let bench = executor.commands().remove(2);
        assert_eq!(bench.get_timeout(), Some(Duration::from_secs(130)));
        Ok(())
    }

    #[tokio::test]
    async fn sequential_only_runs_a_single_read_pass() -> anyhow::Result<()> {
        let ctx = context(|config| {
            config.pool_bench.random_read = false;
            config.pool_bench.drop_caches = false;
        });
        let executor = Arc::new(ScriptedExecutor::new());

        let reads = driver(&ctx, &executor).read_benchmark(5).await;

        assert_eq!(reads.succeeded, [ReadMode::Sequential]);
        assert_eq!(executor.count_matching(" bench "), 1);
        assert!(executor.ran("bench 5 seq"));
        Ok(())
    }

    #[tokio::test]
    async fn no_read_modes_is_a_no_op() -> anyhow::Result<()> {
        let ctx = context(|config| {
            config.pool_bench.sequential_read = false;
            config.pool_bench.random_read = false;
        });
        let executor = Arc::new(ScriptedExecutor::new());

        let reads = driver(&ctx, &executor).read_benchmark(5).await;
        assert_eq!(reads.attempted(), 0);
        assert!(executor.history().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_sequential_read_still_runs_random() -> anyhow::Result<()> {
        let ctx = context(|config| config.pool_bench.drop_caches = false);
        let executor = Arc::new(ScriptedExecutor::new());
        executor.time_out(" seq");

        let reads = driver(&ctx, &executor).read_benchmark(5).await;
        assert_eq!(reads.succeeded, [ReadMode::Random]);
        assert_eq!(reads.failed.len(), 1);
        Ok(())
    }
}
