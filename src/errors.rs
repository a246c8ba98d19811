/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::executor::ExecutionError;
use std::error::Error;

/// Exit code used when the pool benchmark cannot get a verified pool.
pub const POOL_PROVISIONING_EXIT_CODE: u8 = 100;

/// A foundation resource could not be established. Later steps depend on it, so the driver
/// that hit this stops.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("provisioning step `{step}` failed")]
    Command {
        step: &'static str,
        #[source]
        source: ExecutionError,
    },

    #[error("provisioning step `{step}` has an unusable command: {message}")]
    InvalidCommand { step: &'static str, message: String },

    #[error("pool {pool} was not reported by the cluster after creation")]
    PoolMissing { pool: String },
}
impl ProvisioningError {
    pub fn step(&self) -> &'static str {
        match self {
            ProvisioningError::Command { step, .. } => *step,
            ProvisioningError::InvalidCommand { step, .. } => *step,
            ProvisioningError::PoolMissing { .. } => "verify pool",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to create object storage user {user}")]
    Account {
        user: String,
        #[source]
        source: ExecutionError,
    },

    #[error("object endpoint {endpoint} is unreachable or rejected the credentials: {message}")]
    Rejected { endpoint: String, message: String },
}

/// Errors that end the whole run.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("pool benchmark could not provision its pool")]
    PoolProvisioning(#[source] ProvisioningError),
}
impl FatalError {
    pub fn exit_code(&self) -> u8 {
        match self {
            FatalError::PoolProvisioning(_) => POOL_PROVISIONING_EXIT_CODE,
        }
    }
}

/// `err` followed by each of its sources, separated by `: `.
pub fn chain(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
