/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::config::WorkloadConfig;
use chrono::{DateTime, Local};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;

/// Timestamp-derived token that namespaces every resource created during a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);
impl RunId {
    pub fn now() -> Self {
        Self::from_time(Local::now())
    }

    pub fn from_time(time: DateTime<Local>) -> Self {
        RunId(time.format("%Y%m%d%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        RunId(value.to_string())
    }
}
impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonically increasing ordinal source. Clones share the same sequence.
#[derive(Debug, Clone, Default)]
pub struct ResourceCounter(Arc<AtomicU32>);
impl ResourceCounter {
    /// A counter whose first `next()` returns `start`.
    pub fn starting_at(start: u32) -> Self {
        ResourceCounter(Arc::new(AtomicU32::new(start)))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Ordinal sources for object storage names, one for buckets and one for object keys. Both
/// start at 0.
#[derive(Debug, Clone, Default)]
pub struct ObjectCounters {
    pub buckets: ResourceCounter,
    pub objects: ResourceCounter,
}

/// Everything a driver needs to know about the current run. Cheap to clone, never mutated.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub config: Arc<WorkloadConfig>,

    /// Serializes host-wide side effects (page cache drops, the shared mount point).
    pub host_lock: Arc<Mutex<()>>,
}
impl RunContext {
    pub fn new(run_id: RunId, config: WorkloadConfig) -> Self {
        Self {
            run_id,
            config: Arc::new(config),
            host_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn download_dir(&self) -> PathBuf {
        self.output_dir().join(format!("downloads-{}", self.run_id))
    }

    pub fn log_file(&self) -> PathBuf {
        self.output_dir().join(format!("log-{}.txt", self.run_id))
    }
}
