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
//! IPAM daemon CLI options.

use std::path::PathBuf;

use clap::{Args, Parser};

/// ovsnet IPAM daemon
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// Path to the daemon configuration file.
    #[arg(long, default_value = "/etc/ovsnet/ipamd.yaml")]
    pub config: PathBuf,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log daemon output to stderr.
    #[arg(long, global = true, default_value = "true")]
    pub stderr: bool,

    /// Directory for the daemon log.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}
