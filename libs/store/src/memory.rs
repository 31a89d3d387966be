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
//! In-memory store and lock for tests and local development.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ovsnet_ipam::Ip;
use tokio::sync::{Mutex, Semaphore};

use crate::{
    AllocationLock, LAST_RESERVED_IP_PREFIX, LockError, ReservationStore, StoreError, ip_key,
    last_reserved_key, record_matches, record_value,
};

/// A [ReservationStore] over a guarded map, using the same key and value
/// layout as the etcd store.
pub struct MemoryStore {
    prefix: String,
    network: String,
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new(network: &str, prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            network: network.to_string(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seeds a reservation directly, bypassing the pointer update. Lets
    /// tests model records written by an earlier process.
    pub async fn seed(&self, ip: Ip, value: &str) {
        self.entries
            .lock()
            .await
            .insert(ip_key(&self.prefix, &self.network, ip), value.to_string());
    }

    fn is_pointer_key(key: &str) -> bool {
        key.rsplit('/')
            .next()
            .is_some_and(|segment| segment.starts_with(LAST_RESERVED_IP_PREFIX))
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn reserve(
        &self,
        range_id: &str,
        ip: Ip,
        container_id: &str,
        ifname: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let key = ip_key(&self.prefix, &self.network, ip);
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, record_value(container_id, ifname));
        entries.insert(
            last_reserved_key(&self.prefix, &self.network, range_id),
            ip.to_string(),
        );
        Ok(true)
    }

    async fn last_reserved_ip(&self, range_id: &str) -> Result<Ip, StoreError> {
        let entries = self.entries.lock().await;
        let value = entries
            .get(&last_reserved_key(&self.prefix, &self.network, range_id))
            .ok_or(StoreError::KeyNotExists)?;
        value
            .parse()
            .map_err(|_| StoreError::InvalidRecord(value.clone()))
    }

    async fn release(&self, ip: Ip) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .remove(&ip_key(&self.prefix, &self.network, ip));
        Ok(())
    }

    async fn find_by_id(&self, container_id: &str, ifname: &str) -> Result<bool, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().any(|(key, value)| {
            !Self::is_pointer_key(key) && record_matches(value, container_id, ifname)
        }))
    }

    async fn release_by_id(&self, container_id: &str, ifname: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|key, value| {
            Self::is_pointer_key(key) || !record_matches(value, container_id, ifname)
        });
        Ok(entries.len() < before)
    }

    async fn get_by_id(&self, container_id: &str, ifname: &str) -> Result<Vec<Ip>, StoreError> {
        let entries = self.entries.lock().await;
        let mut ips = Vec::new();
        for (key, value) in entries.iter() {
            if Self::is_pointer_key(key) || !record_matches(value, container_id, ifname) {
                continue;
            }
            let segment = key.rsplit('/').next().unwrap_or(key);
            let ip = segment
                .parse()
                .map_err(|_| StoreError::InvalidRecord(key.clone()))?;
            ips.push(ip);
        }
        Ok(ips)
    }
}

/// An [AllocationLock] over a single-permit semaphore.
pub struct MemoryLock {
    permits: Semaphore,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(1),
        }
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AllocationLock for MemoryLock {
    async fn lock(&self) -> Result<(), LockError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LockError::NotHeld)?;
        permit.forget();
        Ok(())
    }

    async fn unlock(&self) -> Result<(), LockError> {
        if self.permits.available_permits() > 0 {
            return Err(LockError::NotHeld);
        }
        self.permits.add_permits(1);
        Ok(())
    }
}
