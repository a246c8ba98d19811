use instant_io::{
    config::WorkloadConfig,
    object_store::{memory::MemoryConnector, ObjectStore},
    orchestrator::Orchestrator,
    run_context::{RunContext, RunId},
    testing::{ceph_df_output, ScriptedExecutor},
};
use std::{fs, path::Path, sync::Arc};

const RUN_ID: &str = "20240101120000";

fn object_config(output_dir: &Path) -> WorkloadConfig {
    let mut config = WorkloadConfig::default();
    config.output_dir = output_dir.to_path_buf();
    config.object_storage.trigger = true;
    config.object_storage.endpoint_host = "rgw.test".to_string();
    config.object_storage.access_key = "ak".to_string();
    config.object_storage.secret_key = "sk".to_string();
    config.object_storage.num_buckets = 3;
    config.object_storage.num_objects = 2;
    config
}

fn orchestrator(
    config: WorkloadConfig,
    executor: &Arc<ScriptedExecutor>,
    connector: &MemoryConnector,
) -> Orchestrator {
    let ctx = RunContext::new(RunId::from(RUN_ID), config);
    Orchestrator::new(ctx, executor.clone(), Arc::new(connector.clone()))
}

#[tokio::test]
async fn object_run_leaves_three_buckets_of_two_objects() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = object_config(dir.path());
    config.object_storage.download_objects = true;
    config.object_storage.delete_buckets_and_objects = false;
    let executor = Arc::new(ScriptedExecutor::new());
    let connector = MemoryConnector::default();

    let summary = orchestrator(config, &executor, &connector).run().await;

    let report = &summary.reports[0];
    assert_eq!(report.status(), "ok");
    assert_eq!(report.left_behind.len(), 3);

    let buckets = connector.store.list_buckets().await?;
    assert_eq!(buckets.len(), 3);
    for bucket in buckets {
        assert_eq!(connector.store.list_objects(&bucket.name).await?.len(), 2);
    }

    let downloads = dir.path().join(format!("downloads-{}", RUN_ID));
    assert_eq!(fs::read_dir(downloads)?.count(), 6);
    // no admin commands without user creation
    assert!(executor.history().is_empty());
    Ok(())
}

#[tokio::test]
async fn object_run_cleans_up_what_it_created() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let connector = MemoryConnector::default();
    connector.store.create_bucket("someone-elses").await?;

    let summary = orchestrator(
        object_config(dir.path()),
        &Arc::new(ScriptedExecutor::new()),
        &connector,
    )
    .run()
    .await;

    assert!(summary.reports[0].left_behind.is_empty());
    let names = connector
        .store
        .list_buckets()
        .await?
        .into_iter()
        .map(|bucket| bucket.name)
        .collect::<Vec<_>>();
    assert_eq!(names, ["someone-elses"]);
    Ok(())
}

#[tokio::test]
async fn failed_user_creation_skips_only_object_storage() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = object_config(dir.path());
    config.object_storage.create_user = true;
    config.pool_bench.trigger = true;
    let executor = Arc::new(ScriptedExecutor::new());
    executor.fail("radosgw-admin user create", 17, "user exists");
    executor.respond(
        "ceph df",
        &ceph_df_output(&[format!("instant_io_pool_1_{}", RUN_ID).as_str()]),
    );

    let summary = orchestrator(config, &executor, &MemoryConnector::default())
        .run()
        .await;

    assert!(summary.fatal.is_none());
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.reports[0].status(), "aborted");
    assert_eq!(summary.reports[1].status(), "ok");
    Ok(())
}

#[tokio::test]
async fn sequential_only_pool_bench_reads_once() -> anyhow::Result<()> {
    let mut config = WorkloadConfig::default();
    config.pool_bench.trigger = true;
    config.pool_bench.write_seconds = 10;
    config.pool_bench.random_read = false;
    config.pool_bench.drop_caches = false;
    let executor = Arc::new(ScriptedExecutor::new());
    let pool = format!("instant_io_pool_1_{}", RUN_ID);
    executor.respond("ceph df", &ceph_df_output(&[pool.as_str()]));

    let summary = orchestrator(config, &executor, &MemoryConnector::default())
        .run()
        .await;

    assert_eq!(summary.reports[0].status(), "ok");
    assert_eq!(
        executor.history(),
        [
            format!("ceph osd pool create {} 64 64", pool),
            format!("ceph osd pool application enable {} rados", pool),
            "ceph df --format json".to_string(),
            format!(
                "rados --no-log-to-stderr -b 4096 -p {} bench 10 write --no-cleanup",
                pool
            ),
            format!("rados --no-log-to-stderr -p {} bench 10 seq", pool),
            format!("rados -p {} cleanup", pool),
        ]
    );
    // pools stay unless delete_pool is set
    assert_eq!(summary.reports[0].left_behind, [format!("pool {}", pool)]);
    Ok(())
}

#[tokio::test]
async fn block_format_failure_never_mounts_or_benchmarks() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = WorkloadConfig::default();
    config.block_bench.trigger = true;
    config.block_bench.mount_point = dir.path().to_path_buf();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond("fio --version", "fio-3.35");
    executor.fail("mkfs.ext4", 1, "mkfs failed");

    let summary = orchestrator(config, &executor, &MemoryConnector::default())
        .run()
        .await;

    assert!(summary.fatal.is_none());
    let report = &summary.reports[0];
    assert_eq!(report.status(), "aborted");
    assert!(report.aborted.as_deref().unwrap_or_default().contains("format device"));
    assert!(!executor.ran("mount "));
    assert!(!executor.ran("--ioengine=rbd"));
    assert!(report
        .left_behind
        .iter()
        .any(|resource| resource.starts_with("mapping /dev/rbd/")));
    Ok(())
}

#[tokio::test]
async fn full_run_follows_driver_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = WorkloadConfig::load(Path::new("./tests/fixtures/legacy-config.json"))?;
    config.output_dir = dir.path().to_path_buf();
    config.block_bench.mount_point = dir.path().join("mnt");
    config.block_bench.teardown = true;

    let executor = Arc::new(ScriptedExecutor::new());
    executor.respond(
        "ceph df",
        &ceph_df_output(&[format!("instant_io_pool_1_{}", RUN_ID).as_str()]),
    );
    let connector = MemoryConnector::default();

    let summary = orchestrator(config, &executor, &connector).run().await;

    assert!(summary.fatal.is_none());
    let drivers = summary
        .reports
        .iter()
        .map(|report| report.driver.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        drivers,
        [
            "object storage".to_string(),
            format!("pool bench instant_io_pool_1_{}", RUN_ID),
            format!("block bench rbd_io_image_2_{}", RUN_ID),
        ]
    );
    assert!(summary.reports.iter().all(|report| report.status() == "ok"));

    let history = executor.history();
    let first_pool = history.iter().position(|line| line.contains("instant_io_pool"));
    let first_block = history.iter().position(|line| line.contains("rbd_io_pool"));
    assert!(first_pool < first_block);
    assert_eq!(executor.count_matching("--ioengine=rbd"), 3);
    assert!(executor.ran("umount"));
    assert_eq!(
        summary.reports[2].left_behind,
        [format!("pool rbd_io_pool_2_{}", RUN_ID)]
    );

    assert!(summary.render().contains("object storage"));
    Ok(())
}
