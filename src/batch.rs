/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use tracing::error;

/// Outcome of a best-effort batch. Every item ends up in exactly one of the two lists; failed
/// items are identified by the name of the bucket or key that was attempted.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<(String, anyhow::Error)>,
}
impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            succeeded: vec![],
            failed: vec![],
        }
    }
}
impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&mut self, item: T) {
        self.succeeded.push(item);
    }

    /// Records a failed item and logs it.
    pub fn push_err(&mut self, item: impl Into<String>, err: anyhow::Error) {
        let item = item.into();
        error!("{}: {:#}", item, err);
        self.failed.push((item, err));
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|(item, _)| item.as_str())
    }

    pub fn merge(&mut self, other: BatchResult<T>) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_both_sides() {
        let mut first = BatchResult::new();
        first.push_ok("a".to_string());
        first.push_err("b", anyhow::anyhow!("boom"));

        let mut second = BatchResult::new();
        second.push_ok("c".to_string());

        first.merge(second);
        assert_eq!(first.succeeded, ["a", "c"]);
        assert_eq!(first.failed_items().collect::<Vec<_>>(), ["b"]);
        assert_eq!(first.attempted(), 3);
        assert!(!first.is_complete());
    }
}
