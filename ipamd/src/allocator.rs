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
//! Lock-protected allocator combining a subnet with the reservation store.

use std::sync::Arc;

use ovsnet_ipam::{AddressBinding, AllocationError, Ip, Subnet};
use ovsnet_store::{AllocationLock, LockError, ReservationStore, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AllocatorError {
    /// Another node reserved the address first.
    #[error("address {0} is already reserved")]
    AlreadyReserved(Ip),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// One subnet's allocation path: in-memory decisions from the [Subnet],
/// durability from the store, cross-host ordering from the cluster lock.
///
/// Every read-decide-write sequence runs inside the lock's critical section.
/// The store is the durable truth; when a store write does not land, the
/// in-memory claim is rolled back before the error surfaces.
pub struct IpAllocator<S, L> {
    subnet: Subnet,
    range_id: String,
    store: Arc<S>,
    lock: Arc<L>,
}

impl<S, L> IpAllocator<S, L>
where
    S: ReservationStore,
    L: AllocationLock,
{
    pub fn new(subnet: Subnet, range_id: &str, store: Arc<S>, lock: Arc<L>) -> Self {
        Self {
            subnet,
            range_id: range_id.to_string(),
            store,
            lock,
        }
    }

    pub fn name(&self) -> &str {
        self.subnet.name()
    }

    /// Returns true if the address lies inside this allocator's CIDR.
    pub fn in_cidr(&self, ip: Ip) -> bool {
        self.subnet.in_cidr(ip)
    }

    /// Allocates an address for the owner, a specific one when `requested`
    /// is set. A reservation the owner already holds in the store is
    /// adopted instead of allocating anew when the request names no
    /// address, or names the reserved one, which makes the call idempotent
    /// across daemon restarts. Requesting a second, different address in
    /// the same subnet fails with a conflict.
    pub async fn get(
        &self,
        container_id: &str,
        ifname: &str,
        requested: Option<Ip>,
    ) -> Result<AddressBinding, AllocatorError> {
        self.lock.lock().await?;
        let result = self.get_locked(container_id, ifname, requested).await;
        self.unlock().await;
        result
    }

    async fn get_locked(
        &self,
        container_id: &str,
        ifname: &str,
        requested: Option<Ip>,
    ) -> Result<AddressBinding, AllocatorError> {
        let owner = owner_key(container_id, ifname);

        let reserved = self.store.get_by_id(container_id, ifname).await?;
        if let Some(ip) = reserved.iter().copied().find(|&ip| self.subnet.in_cidr(ip)) {
            // Adopt only a reservation the request is compatible with; a
            // request for a different address must not be answered with
            // this one.
            if requested.is_none_or(|r| r == ip) {
                return Ok(self.subnet.allocate_static(&owner, ip, None)?);
            }
            debug!(%ip, ?requested, owner, "reservation exists for a different address");
        }

        let binding = match requested {
            Some(ip) => self.subnet.allocate_static(&owner, ip, None)?,
            None => self.subnet.allocate_random(&owner)?,
        };
        match self
            .store
            .reserve(&self.range_id, binding.ip, container_id, ifname)
            .await
        {
            Ok(true) => Ok(binding),
            Ok(false) => {
                self.subnet.release(&owner);
                Err(AllocatorError::AlreadyReserved(binding.ip))
            }
            Err(err) => {
                self.subnet.release(&owner);
                Err(err.into())
            }
        }
    }

    /// Releases the owner's address in memory and in the store, including
    /// records left behind by a previous daemon process.
    pub async fn release(&self, container_id: &str, ifname: &str) -> Result<(), AllocatorError> {
        self.lock.lock().await?;
        let result = self.release_locked(container_id, ifname).await;
        self.unlock().await;
        result
    }

    async fn release_locked(
        &self,
        container_id: &str,
        ifname: &str,
    ) -> Result<(), AllocatorError> {
        if let Some(binding) = self.subnet.release(&owner_key(container_id, ifname)) {
            self.store.release(binding.ip).await?;
        }
        self.store.release_by_id(container_id, ifname).await?;
        Ok(())
    }

    /// Returns true when the owner holds a reservation in the store.
    pub async fn check(&self, container_id: &str, ifname: &str) -> Result<bool, AllocatorError> {
        Ok(self.store.find_by_id(container_id, ifname).await?)
    }

    async fn unlock(&self) {
        // A failed unlock stalls other nodes until the session lease
        // expires; nothing to do here but say so.
        if let Err(err) = self.lock.unlock().await {
            warn!(%err, subnet = self.subnet.name(), "failed to release the allocation lock");
        }
    }
}

fn owner_key(container_id: &str, ifname: &str) -> String {
    format!("{container_id}/{ifname}")
}
