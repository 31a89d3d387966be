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
//! # Reservation store and cluster lock
//!
//! Durable address reservations and the cluster-wide allocation lock behind
//! the ovsnet daemon. The etcd implementations are the production path;
//! in-memory counterparts with identical semantics back the tests.
//!
//! One etcd key per reserved address, `<prefix>/<network>/<ip>`, holding the
//! owner record `<containerID>\n<ifname>`. A per-range pointer key
//! `<prefix>/<network>/last_reserved_ip.<rangeID>` records the most recently
//! reserved address for operators; no allocation path reads it back.

use async_trait::async_trait;
use ovsnet_ipam::Ip;
use thiserror::Error;

pub mod etcd;
pub mod lock;
pub mod memory;

pub use etcd::{DEFAULT_KEY_PREFIX, EtcdStore};
pub use lock::{DEFAULT_LOCK_KEY, EtcdLock, EtcdSession};
pub use memory::{MemoryLock, MemoryStore};

/// Key segment prefix of the per-range last-reserved pointer.
pub const LAST_RESERVED_IP_PREFIX: &str = "last_reserved_ip.";

/// Reservation store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("key does not exist")]
    KeyNotExists,
    /// A stored record could not be parsed.
    #[error("invalid record {0:?}")]
    InvalidRecord(String),
    /// The store did not answer within the request deadline.
    #[error("store request timed out")]
    Timeout,
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
}

/// Cluster lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock acquisition did not finish within the deadline.
    #[error("lock acquisition timed out")]
    Timeout,
    /// Unlock was called without a held lock.
    #[error("lock is not held")]
    NotHeld,
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
}

/// Durable address reservations, keyed by address and owned by a
/// `(container ID, interface name)` pair.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Atomically reserves `ip` for the owner. Returns `Ok(false)` when the
    /// address is already reserved, by anyone. On success the per-range
    /// last-reserved pointer is updated as well.
    async fn reserve(
        &self,
        range_id: &str,
        ip: Ip,
        container_id: &str,
        ifname: &str,
    ) -> Result<bool, StoreError>;

    /// Returns the most recently reserved address of the range.
    /// [StoreError::KeyNotExists] when the range never reserved anything.
    async fn last_reserved_ip(&self, range_id: &str) -> Result<Ip, StoreError>;

    /// Drops the reservation of `ip`. Releasing an unreserved address is not
    /// an error.
    async fn release(&self, ip: Ip) -> Result<(), StoreError>;

    /// Returns true when the owner holds at least one reservation.
    async fn find_by_id(&self, container_id: &str, ifname: &str) -> Result<bool, StoreError>;

    /// Drops every reservation of the owner, best effort. Returns whether
    /// anything was released.
    async fn release_by_id(&self, container_id: &str, ifname: &str) -> Result<bool, StoreError>;

    /// Returns every address reserved by the owner.
    async fn get_by_id(&self, container_id: &str, ifname: &str) -> Result<Vec<Ip>, StoreError>;
}

/// The cluster-wide allocation lock. One critical section per allocation
/// decision; holders that crash are timed out by the backing lease.
#[async_trait]
pub trait AllocationLock: Send + Sync {
    async fn lock(&self) -> Result<(), LockError>;
    async fn unlock(&self) -> Result<(), LockError>;
}

/// Store key of a reserved address.
pub fn ip_key(prefix: &str, network: &str, ip: Ip) -> String {
    format!("{prefix}/{network}/{ip}")
}

/// Store key of a range's last-reserved pointer.
pub fn last_reserved_key(prefix: &str, network: &str, range_id: &str) -> String {
    format!("{prefix}/{network}/{LAST_RESERVED_IP_PREFIX}{range_id}")
}

/// Serialized owner record of a reservation.
pub fn record_value(container_id: &str, ifname: &str) -> String {
    format!("{container_id}\n{ifname}")
}

/// Matches a stored record against an owner. Records written before
/// interface names were tracked hold the container ID alone; those match on
/// the container ID only.
pub fn record_matches(value: &str, container_id: &str, ifname: &str) -> bool {
    let mut parts = value.splitn(2, '\n');
    match (parts.next(), parts.next()) {
        (Some(id), Some(name)) => id == container_id && name == ifname,
        (Some(id), None) => id == container_id,
        _ => false,
    }
}
