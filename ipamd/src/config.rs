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
//! Daemon configuration file.

use std::path::{Path, PathBuf};

use ovsnet_ipam::Ip;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Daemon configuration, loaded from a YAML file.
///
/// ```yaml
/// network: net1
/// etcd_endpoints:
///   - http://127.0.0.1:2379
/// subnets:
///   - name: subnet1
///     cidr: 10.16.0.0/16
///     exclude_ips:
///       - 10.16.0.1
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Network name, the second segment of every store key.
    pub network: String,
    /// etcd cluster endpoints.
    pub etcd_endpoints: Vec<String>,
    /// Store key prefix.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Unix socket the API listens on.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// etcd key of the cluster allocation lock.
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    /// TTL of the lock session's lease, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
    /// Deadline for acquiring the allocation lock, in seconds.
    #[serde(default = "default_lock_acquire_timeout")]
    pub lock_acquire_timeout_secs: u64,
    /// Per-request deadline against etcd, in seconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
    /// Subnets to allocate from, in routing order.
    pub subnets: Vec<SubnetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetConfig {
    pub name: String,
    pub cidr: String,
    /// Addresses held out of the free pool, assignable statically only.
    #[serde(default)]
    pub exclude_ips: Vec<Ip>,
}

fn default_key_prefix() -> String {
    ovsnet_store::DEFAULT_KEY_PREFIX.to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/ovsnet/ipamd.sock")
}

fn default_lock_key() -> String {
    ovsnet_store::DEFAULT_LOCK_KEY.to_string()
}

fn default_session_ttl() -> i64 {
    ovsnet_store::lock::DEFAULT_SESSION_TTL
}

fn default_lock_acquire_timeout() -> u64 {
    ovsnet_store::lock::DEFAULT_ACQUIRE_TIMEOUT.as_secs()
}

fn default_store_timeout() -> u64 {
    ovsnet_store::etcd::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.network.is_empty() {
            return Err(ConfigError::Invalid("network must not be empty".into()));
        }
        if self.etcd_endpoints.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one etcd endpoint is required".into(),
            ));
        }
        if self.subnets.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one subnet is required".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: Config = serde_yaml::from_str(
            r#"
network: net1
etcd_endpoints:
  - http://127.0.0.1:2379
  - http://127.0.0.2:2379
key_prefix: /custom/prefix
socket_path: /tmp/ipamd.sock
lock_key: /custom/lock
session_ttl_secs: 30
lock_acquire_timeout_secs: 10
store_timeout_secs: 3
subnets:
  - name: subnet1
    cidr: 10.16.0.0/16
    exclude_ips:
      - 10.16.0.1
      - 10.16.0.254
  - name: subnet2
    cidr: 10.17.0.0/16
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.key_prefix, "/custom/prefix");
        assert_eq!(config.subnets.len(), 2);
        assert_eq!(config.subnets[0].exclude_ips.len(), 2);
        assert!(config.subnets[1].exclude_ips.is_empty());
    }

    #[test]
    fn defaults_apply() {
        let config: Config = serde_yaml::from_str(
            r#"
network: net1
etcd_endpoints: ["http://127.0.0.1:2379"]
subnets:
  - name: subnet1
    cidr: 10.16.0.0/16
"#,
        )
        .unwrap();
        assert_eq!(config.key_prefix, ovsnet_store::DEFAULT_KEY_PREFIX);
        assert_eq!(config.lock_key, ovsnet_store::DEFAULT_LOCK_KEY);
        assert_eq!(
            config.socket_path,
            PathBuf::from("/var/run/ovsnet/ipamd.sock")
        );
    }

    #[test]
    fn empty_subnets_are_rejected() {
        let config: Config = serde_yaml::from_str(
            r#"
network: net1
etcd_endpoints: ["http://127.0.0.1:2379"]
subnets: []
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str(
            r#"
network: net1
etcd_endpoints: ["http://127.0.0.1:2379"]
subnets: []
bogus: true
"#,
        );
        assert!(result.is_err());
    }
}
