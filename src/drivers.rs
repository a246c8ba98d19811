/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod block_bench;
pub mod object_storage;
pub mod pool_bench;

use crate::executor::CommandResult;
use std::time::Duration;
use tracing::debug;

/// Added on top of a benchmark's own run time before the command is considered hung.
pub const BENCH_GRACE: Duration = Duration::from_secs(120);

/// Timeout for a benchmark expected to run for `run_secs`.
pub(crate) fn bench_timeout(run_secs: u64) -> Duration {
    Duration::from_secs(run_secs).saturating_add(BENCH_GRACE)
}

pub(crate) fn log_output(what: &str, result: &CommandResult) {
    debug!(
        "{} finished in {:.1}s using command: {}\nOutput ::\n{}",
        what,
        result.elapsed.as_secs_f64(),
        result.command,
        result.stdout.trim_end()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_timeout_saturates() {
        assert_eq!(bench_timeout(10), Duration::from_secs(130));
        assert_eq!(bench_timeout(u64::MAX), Duration::MAX);
    }
}
