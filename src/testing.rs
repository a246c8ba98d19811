/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Stand-ins for the cluster, used to drive the drivers and the orchestrator without one.

use crate::executor::{Command, CommandResult, ExecutionError, Executor};
use async_trait::async_trait;
use std::{sync::Mutex, time::Duration};

#[derive(Debug, Clone)]
enum Response {
    Exit {
        status: i32,
        stdout: String,
        stderr: String,
    },
    Timeout,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    response: Response,
}

/// Records every command it is asked to run and answers from a list of rules. A rule applies
/// when its pattern is a substring of the rendered command line; the most recently added
/// matching rule wins. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    history: Mutex<Vec<Command>>,
}
impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, pattern: &str, response: Response) {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Rule {
                pattern: pattern.to_string(),
                response,
            });
    }

    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.add(
            pattern,
            Response::Exit {
                status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn fail(&self, pattern: &str, status: i32, stderr: &str) {
        self.add(
            pattern,
            Response::Exit {
                status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn time_out(&self, pattern: &str) {
        self.add(pattern, Response::Timeout);
    }

    /// Rendered command lines in the order they were run.
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|cmd| cmd.to_string())
            .collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.history()
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count_matching(pattern) > 0
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn run(&self, command: &Command) -> Result<CommandResult, ExecutionError> {
        let rendered = command.to_string();
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.clone());

        let response = self
            .rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .rev()
            .find(|rule| rendered.contains(&rule.pattern))
            .map(|rule| rule.response.clone());

        match response {
            Some(Response::Timeout) => Err(ExecutionError::Timeout {
                command: rendered,
                timeout: command.get_timeout().unwrap_or(Duration::from_secs(1)),
            }),
            Some(Response::Exit {
                status,
                stdout,
                stderr,
            }) => Ok(CommandResult {
                command: rendered,
                status: Some(status),
                stdout,
                stderr,
                elapsed: Duration::ZERO,
            }),
            None => Ok(CommandResult {
                command: rendered,
                status: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                elapsed: Duration::ZERO,
            }),
        }
    }
}

/// `ceph df --format json` output listing the given pools.
pub fn ceph_df_output(pools: &[&str]) -> String {
    let pools = pools
        .iter()
        .enumerate()
        .map(|(id, name)| serde_json::json!({ "name": name, "id": id + 1 }))
        .collect::<Vec<_>>();
    serde_json::json!({ "stats": {}, "pools": pools }).to_string()
}
