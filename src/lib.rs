/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod batch;
pub mod clap_args;
pub mod config;
pub mod drivers;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod object_store;
pub mod orchestrator;
pub mod run_context;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;
