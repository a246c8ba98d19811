/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    batch::BatchResult,
    drivers::{
        block_bench::{self, BlockBenchDriver},
        object_storage::ObjectStorageDriver,
        pool_bench::{self, PoolBenchDriver},
    },
    errors::{self, FatalError, ProvisioningError},
    executor::Executor,
    object_store::StoreConnector,
    run_context::{ObjectCounters, ResourceCounter, RunContext, RunId},
};
use colored::*;
use itertools::Itertools;
use std::{
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use term_table::{row, row::Row, rows, table_cell::*, Table, TableStyle};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What one driver did during the run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DriverReport {
    pub driver: String,
    pub created: Vec<String>,
    pub left_behind: Vec<String>,
    pub failures: Vec<String>,

    /// Set when the driver stopped early because a foundation step failed.
    pub aborted: Option<String>,
}
impl DriverReport {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }

    pub fn record_failures<T>(&mut self, what: &str, batch: &BatchResult<T>) {
        for item in batch.failed_items() {
            self.failures.push(format!("{} {}", what, item));
        }
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("{} stopped: {}", self.driver, reason);
        self.aborted = Some(reason);
    }

    pub fn status(&self) -> &'static str {
        match (&self.aborted, self.failures.is_empty()) {
            (Some(_), _) => "aborted",
            (None, true) => "ok",
            (None, false) => "partial",
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: RunId,
    pub reports: Vec<DriverReport>,
    pub fatal: Option<FatalError>,
}
impl RunSummary {
    pub fn exit_code(&self) -> ExitCode {
        match &self.fatal {
            Some(fatal) => ExitCode::from(fatal.exit_code()),
            None => ExitCode::SUCCESS,
        }
    }

    pub fn render(&self) -> String {
        let mut table = Table::builder()
            .rows(rows![row![
                TableCell::builder("Driver".bold()).build(),
                TableCell::builder("Status".bold()).build(),
                TableCell::builder("Created".bold()).build(),
                TableCell::builder("Left behind".bold()).build(),
                TableCell::builder("Failures".bold()).build()
            ]])
            .style(TableStyle::rounded())
            .build();

        for report in self.reports.iter() {
            let status = match report.status() {
                "ok" => "ok".green(),
                "partial" => "partial".yellow(),
                other => other.red(),
            };
            let list = |items: &[String]| match items.is_empty() {
                true => "--".to_string(),
                false => items.iter().join("\n"),
            };

            table.add_row(row![
                TableCell::new(&report.driver),
                TableCell::new(status),
                TableCell::new(list(&report.created)),
                TableCell::new(list(&report.left_behind)),
                TableCell::new(match &report.aborted {
                    Some(reason) => reason.clone(),
                    None => list(&report.failures),
                })
            ]);
        }

        table.render()
    }

    pub fn print(&self) {
        println!(
            "\n{}",
            format!(" Summary of run {} ", self.run_id).reversed().green()
        );
        if self.reports.is_empty() {
            println!("No drivers were triggered.");
        } else {
            println!("{}", self.render());
        }
        if let Some(fatal) = &self.fatal {
            println!("{} {}", "Run stopped:".red(), errors::chain(fatal));
        }
    }
}

/// Sequences the drivers enabled in the config: object storage, then the pool benchmarks,
/// then the block device benchmark.
pub struct Orchestrator {
    ctx: RunContext,
    executor: Arc<dyn Executor>,
    connector: Arc<dyn StoreConnector>,
    counter: ResourceCounter,
    object_counters: ObjectCounters,
}
impl Orchestrator {
    pub fn new(
        ctx: RunContext,
        executor: Arc<dyn Executor>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            ctx,
            executor,
            connector,
            counter: ResourceCounter::starting_at(1),
            object_counters: ObjectCounters::default(),
        }
    }

    /// Human readable description of what `run` would do, without doing any of it.
    pub fn plan(&self) -> Vec<String> {
        let config = &self.ctx.config;
        let run_id = &self.ctx.run_id;
        let mut plan = vec![];
        let mut ordinal = 1;

        if config.object_storage.trigger {
            let conf = &config.object_storage;
            plan.push(format!("object storage against {}", conf.endpoint_url()));
            if conf.create_user {
                plan.push(format!("  create user operator_{}", run_id));
            }
            if conf.create_bkt_obj {
                plan.push(format!(
                    "  create {} buckets (my-bucket-{}-no-N) with {} objects each",
                    conf.num_buckets, run_id, conf.num_objects
                ));
            }
            if conf.download_objects {
                plan.push(format!(
                    "  download objects into {}",
                    self.ctx.download_dir().display()
                ));
            }
            if conf.delete_buckets_and_objects && conf.create_bkt_obj {
                plan.push("  delete the buckets it created".to_string());
            }
        }

        if config.pool_bench.trigger {
            let conf = &config.pool_bench;
            let mode = if conf.parallel { "in parallel" } else { "one after another" };
            plan.push(format!("{} pool benchmark(s), {}", conf.no_pools, mode));
            for _ in 0..conf.no_pools {
                plan.push(format!(
                    "  pool {}: write {}s at {} bytes, read {}s (seq: {}, rand: {})",
                    pool_bench::pool_name(&self.ctx, ordinal),
                    conf.write_seconds,
                    conf.block_size,
                    conf.read_seconds(),
                    conf.sequential_read,
                    conf.random_read
                ));
                ordinal += 1;
            }
        }

        if config.block_bench.trigger {
            let conf = &config.block_bench;
            let (pool, image) = block_bench::resource_names(&self.ctx, ordinal);
            plan.push(format!(
                "block benchmark on {}/{} ({} MB) mounted at {}",
                pool,
                image,
                conf.image_size_mb,
                conf.mount_point.display()
            ));
            plan.push(format!(
                "  fio write, read and readwrite: bs {} size {} for {}s x {} loops",
                conf.block_size, conf.write_size, conf.run_time, conf.num_loops
            ));
        }

        plan
    }

    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary {
            run_id: self.ctx.run_id.clone(),
            reports: vec![],
            fatal: None,
        };
        let config = &self.ctx.config;

        if config.object_storage.trigger {
            summary.reports.push(self.run_object_storage().await);
        } else {
            debug!("Object storage driver not triggered");
        }

        if config.pool_bench.trigger {
            let (reports, fatal) = self.run_pool_benches().await;
            summary.reports.extend(reports);
            if let Some(fatal) = fatal {
                error!("{}", errors::chain(&fatal));
                summary.fatal = Some(fatal);
                return summary;
            }
        } else {
            debug!("Pool benchmark driver not triggered");
        }

        if config.block_bench.trigger {
            summary.reports.push(self.run_block_bench().await);
        } else {
            debug!("Block benchmark driver not triggered");
        }

        summary
    }

    async fn run_object_storage(&self) -> DriverReport {
        let conf = &self.ctx.config.object_storage;
        let mut report = DriverReport::new("object storage");
        info!(
            "Running object storage workload against {} with {} buckets and {} objects per bucket",
            conf.endpoint_url(),
            conf.num_buckets,
            conf.num_objects
        );

        let driver = match ObjectStorageDriver::connect(
            &self.ctx,
            self.executor.as_ref(),
            self.connector.as_ref(),
            &self.object_counters,
        )
        .await
        {
            Ok(driver) => driver,
            Err(err) => {
                report.abort(format!("{:#}", anyhow::Error::from(err)));
                return report;
            }
        };
        if let Some(user) = driver.account() {
            report.created.push(format!("user {}", user));
            report.left_behind.push(format!("user {}", user));
        }

        let mut owned = vec![];
        if conf.create_bkt_obj {
            let buckets = driver.create_buckets(conf.num_buckets).await;
            report.record_failures("create bucket", &buckets);
            owned = buckets.succeeded;

            for bucket in owned.iter() {
                let objects = driver.create_objects(bucket, conf.num_objects).await;
                report.record_failures("create object", &objects);
                report.created.push(format!(
                    "bucket {} ({} objects)",
                    bucket,
                    objects.succeeded.len()
                ));
            }
        }

        let all_buckets = match driver.list_buckets().await {
            Ok(buckets) => buckets.into_keys().collect::<Vec<_>>(),
            Err(err) => {
                error!("Unable to list buckets: {:#}", err);
                report.failures.push("list buckets".to_string());
                vec![]
            }
        };
        // without creation the run only reads what is already there
        let targets = match conf.create_bkt_obj {
            true => owned.clone(),
            false => all_buckets,
        };

        if let Some(first) = targets.first() {
            if let Err(err) = driver.list_objects(Some(first)).await {
                error!("Unable to list objects of {}: {:#}", first, err);
                report.failures.push(format!("list objects {}", first));
            }
        }
        if let Err(err) = driver.list_objects(None).await {
            error!("Unable to list objects: {:#}", err);
            report.failures.push("list objects".to_string());
        }

        if conf.download_objects {
            for bucket in targets.iter() {
                match driver.download_objects(bucket, None).await {
                    Ok(downloads) => report.record_failures("download", &downloads),
                    Err(err) => {
                        error!("Unable to download from {}: {:#}", bucket, err);
                        report.failures.push(format!("download {}", bucket));
                    }
                }

                if conf.generate_urls {
                    match driver.generate_public_urls(bucket, None).await {
                        Ok(urls) => {
                            report.record_failures("url", &urls);
                            for url in urls.succeeded {
                                info!("{}", url);
                            }
                        }
                        Err(err) => {
                            error!("Unable to generate URLs for {}: {:#}", bucket, err);
                            report.failures.push(format!("urls {}", bucket));
                        }
                    }
                }
            }
        }

        let mut deleted = vec![];
        if conf.delete_buckets_and_objects && !owned.is_empty() {
            for bucket in owned.iter() {
                let result = driver.delete_bucket(bucket).await;
                report.record_failures("delete bucket", &result);
                deleted.extend(result.succeeded);
            }
            if let Err(err) = driver.list_buckets().await {
                error!("Unable to list buckets after teardown: {:#}", err);
            }
        }
        report.left_behind.extend(
            owned
                .iter()
                .filter(|bucket| !deleted.contains(*bucket))
                .map(|bucket| format!("bucket {}", bucket)),
        );

        driver.disconnect();
        report
    }

    async fn run_pool_benches(&self) -> (Vec<DriverReport>, Option<FatalError>) {
        let conf = &self.ctx.config.pool_bench;
        let drivers = (0..conf.no_pools)
            .map(|_| PoolBenchDriver::new(&self.ctx, self.executor.clone(), &self.counter))
            .collect::<Vec<_>>();
        let stop = Arc::new(AtomicBool::new(false));

        if !conf.parallel {
            let mut reports = vec![];
            for driver in drivers {
                let (report, failure) = run_pool_bench(driver, stop.clone()).await;
                reports.push(report);
                if let Some(err) = failure {
                    return (reports, Some(FatalError::PoolProvisioning(err)));
                }
            }
            return (reports, None);
        }

        let pools = drivers
            .iter()
            .map(|driver| driver.pool_name().to_string())
            .collect::<Vec<_>>();
        let mut finished: Vec<Option<DriverReport>> = vec![None; pools.len()];
        let mut fatal = None;

        let mut join_set = JoinSet::new();
        for (index, driver) in drivers.into_iter().enumerate() {
            let stop = stop.clone();
            join_set.spawn(async move { (index, run_pool_bench(driver, stop).await) });
        }

        // tasks already past provisioning finish their current step and report
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, (report, failure))) => {
                    finished[index] = Some(report);
                    if let Some(err) = failure {
                        if fatal.is_none() {
                            stop.store(true, Ordering::SeqCst);
                            fatal = Some(FatalError::PoolProvisioning(err));
                        } else {
                            error!("{}", errors::chain(&err));
                        }
                    }
                }
                Err(err) => error!("Pool benchmark task failed: {}", err),
            }
        }

        let reports = finished
            .into_iter()
            .zip(pools)
            .map(|(report, pool)| {
                report.unwrap_or_else(|| {
                    let mut report = DriverReport::new(format!("pool bench {}", pool));
                    report.abort("benchmark task failed");
                    report.left_behind.push(format!("pool {} (state unknown)", pool));
                    report
                })
            })
            .collect();

        (reports, fatal)
    }

    async fn run_block_bench(&self) -> DriverReport {
        let conf = &self.ctx.config.block_bench;
        let mut driver = BlockBenchDriver::new(&self.ctx, self.executor.clone(), &self.counter);
        let mut report = DriverReport::new(format!("block bench {}", driver.image_name()));

        // the mount point is host wide
        let _host = self.ctx.host_lock.lock().await;

        if let Err(err) = driver.complete_prerequisites().await {
            report.abort(format!("{:#}", anyhow::Error::from(err)));
            return report;
        }

        let initialized = driver.initialize().await;
        report.created = driver.live_resources();

        match initialized {
            Ok(()) => {
                let passes = [
                    ("fio write", driver.write_ops().await),
                    ("fio read", driver.read_ops().await),
                    ("fio readwrite", driver.read_write_ops().await),
                ];
                for (pass, result) in passes {
                    if let Err(err) = result {
                        error!("{} on {} failed: {:#}", pass, driver.image_name(), err);
                        report.failures.push(pass.to_string());
                    }
                }
            }
            Err(err) => report.abort(format!("{:#}", anyhow::Error::from(err))),
        }

        if conf.teardown {
            let result = driver.teardown().await;
            report.record_failures("teardown", &result);
        }
        report.left_behind = driver.live_resources();

        report
    }
}

/// Runs one pool benchmark end to end. A provisioning failure comes back alongside the report so
/// a pool that was created before the failure still shows up as left behind. Once `stop` is set
/// the remaining benchmark passes are skipped.
async fn run_pool_bench(
    mut driver: PoolBenchDriver,
    stop: Arc<AtomicBool>,
) -> (DriverReport, Option<ProvisioningError>) {
    let conf = driver.config().clone();
    let mut report = DriverReport::new(format!("pool bench {}", driver.pool_name()));

    let initialized = driver.initialize().await;
    if driver.pool_created() {
        report.created.push(format!("pool {}", driver.pool_name()));
    }
    if let Err(err) = initialized {
        report.abort(errors::chain(&err));
        if driver.pool_created() {
            report.left_behind.push(format!("pool {}", driver.pool_name()));
        }
        return (report, Some(err));
    }

    let stopped = || stop.load(Ordering::SeqCst);
    if stopped() {
        report.abort("run stopped after a pool provisioning failure");
    } else {
        if let Err(err) = driver
            .write_benchmark(conf.block_size, conf.write_seconds)
            .await
        {
            error!("Write bench on {} failed: {}", driver.pool_name(), err);
            report.failures.push("write bench".to_string());
        }

        if stopped() {
            warn!("Skipping read benchmarks on {}", driver.pool_name());
            report.abort("run stopped after a pool provisioning failure");
        } else {
            let reads = driver.read_benchmark(conf.read_seconds()).await;
            report.record_failures("read bench", &reads);
        }
    }

    let mut objects_left = true;
    if conf.delete_buckets_and_objects {
        match driver.cleanup().await {
            Ok(()) => objects_left = false,
            Err(err) => {
                error!("Cleanup of {} failed: {}", driver.pool_name(), err);
                report.failures.push("cleanup".to_string());
            }
        }
    }

    let mut pool_left = true;
    if conf.delete_pool {
        match driver.delete_pool().await {
            Ok(()) => pool_left = false,
            Err(err) => {
                error!("Deleting {} failed: {}", driver.pool_name(), err);
                report.failures.push("delete pool".to_string());
            }
        }
    }

    if pool_left {
        report.left_behind.push(format!("pool {}", driver.pool_name()));
        if objects_left {
            report.left_behind.push("benchmark objects".to_string());
        }
    }

    (report, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WorkloadConfig,
        object_store::memory::MemoryConnector,
        testing::{ceph_df_output, ScriptedExecutor},
    };

    fn orchestrator(config: WorkloadConfig, executor: &Arc<ScriptedExecutor>) -> Orchestrator {
        let ctx = RunContext::new(RunId::from("5"), config);
        Orchestrator::new(ctx, executor.clone(), Arc::new(MemoryConnector::default()))
    }

    #[test]
    fn report_status_follows_failures() {
        let mut report = DriverReport::new("pool bench");
        assert_eq!(report.status(), "ok");

        report.failures.push("write bench".to_string());
        assert_eq!(report.status(), "partial");

        report.abort("no pool");
        assert_eq!(report.status(), "aborted");
    }

    #[test]
    fn plan_names_resources_in_run_order() {
        let mut config = WorkloadConfig::default();
        config.pool_bench.trigger = true;
        config.pool_bench.no_pools = 2;
        config.block_bench.trigger = true;

        let plan = orchestrator(config, &Arc::new(ScriptedExecutor::new())).plan();
        let plan = plan.join("\n");

        assert!(plan.contains("instant_io_pool_1_5"));
        assert!(plan.contains("instant_io_pool_2_5"));
        assert!(plan.contains("rbd_io_pool_3_5/rbd_io_image_3_5"));
    }

    #[tokio::test]
    async fn nothing_triggered_runs_nothing() -> anyhow::Result<()> {
        let executor = Arc::new(ScriptedExecutor::new());
        let summary = orchestrator(WorkloadConfig::default(), &executor)
            .run()
            .await;

        assert!(summary.reports.is_empty());
        assert!(summary.fatal.is_none());
        assert!(executor.history().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn pool_provisioning_failure_stops_the_run() -> anyhow::Result<()> {
        let mut config = WorkloadConfig::default();
        config.pool_bench.trigger = true;
        config.pool_bench.no_pools = 2;
        config.block_bench.trigger = true;
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("ceph df", &ceph_df_output(&["something_else"]));

        let summary = orchestrator(config, &executor).run().await;

        assert!(matches!(summary.fatal, Some(FatalError::PoolProvisioning(_))));
        assert_eq!(summary.fatal.as_ref().map(FatalError::exit_code), Some(100));
        assert_eq!(executor.count_matching("osd pool create"), 1);
        assert!(!executor.ran("rbd"));
        Ok(())
    }

    #[tokio::test]
    async fn partly_provisioned_pool_is_reported_as_left_behind() -> anyhow::Result<()> {
        let mut config = WorkloadConfig::default();
        config.pool_bench.trigger = true;
        config.pool_bench.no_pools = 2;
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("ceph df", &ceph_df_output(&["instant_io_pool_1_5"]));
        executor.fail("enable instant_io_pool_2_5", 1, "EINVAL");

        let summary = orchestrator(config, &executor).run().await;

        assert!(summary.fatal.is_some());
        assert_eq!(summary.reports.len(), 2);
        let failed = &summary.reports[1];
        assert_eq!(failed.driver, "pool bench instant_io_pool_2_5");
        assert_eq!(failed.status(), "aborted");
        assert_eq!(failed.created, ["pool instant_io_pool_2_5"]);
        assert_eq!(failed.left_behind, ["pool instant_io_pool_2_5"]);
        Ok(())
    }

    #[tokio::test]
    async fn parallel_failure_keeps_every_report() -> anyhow::Result<()> {
        let mut config = WorkloadConfig::default();
        config.pool_bench.trigger = true;
        config.pool_bench.no_pools = 3;
        config.pool_bench.parallel = true;
        config.block_bench.trigger = true;
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond(
            "ceph df",
            &ceph_df_output(&["instant_io_pool_1_5", "instant_io_pool_3_5"]),
        );
        executor.fail("enable instant_io_pool_2_5", 1, "EINVAL");

        let summary = orchestrator(config, &executor).run().await;

        assert!(matches!(summary.fatal, Some(FatalError::PoolProvisioning(_))));
        let drivers = summary
            .reports
            .iter()
            .map(|report| report.driver.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            drivers,
            [
                "pool bench instant_io_pool_1_5",
                "pool bench instant_io_pool_2_5",
                "pool bench instant_io_pool_3_5"
            ]
        );
        assert!(summary
            .reports
            .iter()
            .all(|report| report.left_behind.iter().any(|item| item.starts_with("pool "))));
        assert!(!executor.ran("rbd"));
        Ok(())
    }

    #[tokio::test]
    async fn parallel_reports_follow_pool_order() -> anyhow::Result<()> {
        let mut config = WorkloadConfig::default();
        config.pool_bench.trigger = true;
        config.pool_bench.no_pools = 11;
        config.pool_bench.parallel = true;
        config.pool_bench.delete_pool = true;
        let executor = Arc::new(ScriptedExecutor::new());
        let pools = (1..=11)
            .map(|n| format!("instant_io_pool_{}_5", n))
            .collect::<Vec<_>>();
        let names = pools.iter().map(String::as_str).collect::<Vec<_>>();
        executor.respond("ceph df", &ceph_df_output(&names));

        let summary = orchestrator(config, &executor).run().await;

        assert!(summary.fatal.is_none());
        let drivers = summary
            .reports
            .iter()
            .map(|report| report.driver.clone())
            .collect::<Vec<_>>();
        let expected = pools
            .iter()
            .map(|pool| format!("pool bench {}", pool))
            .collect::<Vec<_>>();
        assert_eq!(drivers, expected);
        assert!(summary.reports.iter().all(|report| report.left_behind.is_empty()));
        assert_eq!(executor.count_matching("osd pool delete"), 11);
        Ok(())
    }
}
