// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Logging setup using the tracing library.

use std::io::IsTerminal;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use crate::cli::LoggingOptions;

/// Environment variable to define the log level.
pub const LOG_LEVEL_ENV: &str = "RUST_LOG";

const LOG_FILE: &str = "ipamd.log";

/// Setup logging using the tracing library.
///
/// With a log directory set, logs go to a file in it at debug level; with
/// stderr enabled they are additionally printed to stderr at the level the
/// `RUST_LOG` environment variable selects (default info). The returned
/// guards flush the non-blocking writers; keep them alive for the process
/// lifetime.
pub fn setup_tracing(opts: &LoggingOptions) -> Vec<WorkerGuard> {
    let log_level =
        EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut guards = vec![];
    let mut layers = vec![];

    if let Some(log_dir) = &opts.log_dir {
        let log_file = tracing_appender::rolling::never(log_dir, LOG_FILE);
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(log_file);
        let file_logger = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer)
            .with_filter(tracing::level_filters::LevelFilter::DEBUG);
        layers.push(file_logger.boxed());
        guards.push(file_guard);
    }

    if opts.stderr {
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        let stderr_logger = tracing_subscriber::fmt::layer()
            // Enable colors if the stderr is a terminal.
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(non_blocking_writer)
            .with_filter(log_level);
        layers.push(stderr_logger.boxed());
        guards.push(guard);
    }

    let subscriber = Registry::default().with(layers);
    tracing::subscriber::set_global_default(subscriber).unwrap();

    tracing::debug!("Logging initialized!");
    guards
}
