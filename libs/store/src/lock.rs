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
//! Lease-backed cluster lock.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, LeaseClient, LockClient, LockOptions};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AllocationLock, LockError};

/// Default etcd key of the allocation lock. A single key independent of the
/// network name: all networks sharing an etcd cluster serialize their
/// allocation decisions through one mutex.
pub const DEFAULT_LOCK_KEY: &str = "/ovsnet/ipam";

/// Default time-to-live of the lock session's lease.
pub const DEFAULT_SESSION_TTL: i64 = 15;

/// Default deadline for acquiring the lock.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(20);

/// A lease kept alive by a background task.
///
/// Locks taken under the session's lease are released by etcd when the lease
/// expires, so a crashed holder stalls the cluster for at most the TTL.
/// Dropping the session stops the keep-alive task; [EtcdSession::close]
/// additionally revokes the lease so held locks release immediately.
pub struct EtcdSession {
    lease: LeaseClient,
    lease_id: i64,
    cancel: CancellationToken,
}

impl EtcdSession {
    /// Grants a lease with the given TTL in seconds and spawns the
    /// keep-alive task refreshing it at a third of the TTL.
    pub async fn new(client: &Client, ttl: i64) -> Result<Self, LockError> {
        let mut lease = client.lease_client();
        let grant = lease.grant(ttl, None).await?;
        let lease_id = grant.id();
        let (mut keeper, mut responses) = lease.keep_alive(lease_id).await?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs((ttl as u64 / 3).max(1));
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!(lease_id, "lock session closed");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = keeper.keep_alive().await {
                            warn!(lease_id, %err, "lease keep-alive failed");
                            return;
                        }
                        match responses.message().await {
                            Ok(Some(resp)) if resp.ttl() > 0 => {}
                            Ok(_) => {
                                warn!(lease_id, "lease expired");
                                return;
                            }
                            Err(err) => {
                                warn!(lease_id, %err, "lease keep-alive stream failed");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            lease,
            lease_id,
            cancel,
        })
    }

    /// The granted lease ID.
    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }

    /// Stops the keep-alive task and revokes the lease.
    pub async fn close(&self) -> Result<(), LockError> {
        self.cancel.cancel();
        self.lease.clone().revoke(self.lease_id).await?;
        Ok(())
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The cluster-wide allocation mutex, an etcd lock on a fixed key bound to a
/// session's lease.
///
/// Acquisition queues behind the current holder and is bounded by the
/// acquire deadline. The granted ownership key is kept until [unlock]
/// releases it.
///
/// [unlock]: AllocationLock::unlock
pub struct EtcdLock {
    client: LockClient,
    key: String,
    lease_id: i64,
    acquire_timeout: Duration,
    held: Mutex<Option<Vec<u8>>>,
}

impl EtcdLock {
    pub fn new(
        client: &Client,
        session: &EtcdSession,
        key: &str,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            client: client.lock_client(),
            key: key.to_string(),
            lease_id: session.lease_id(),
            acquire_timeout,
            held: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AllocationLock for EtcdLock {
    async fn lock(&self) -> Result<(), LockError> {
        let mut client = self.client.clone();
        let options = LockOptions::new().with_lease(self.lease_id);
        let resp = tokio::time::timeout(
            self.acquire_timeout,
            client.lock(self.key.as_str(), Some(options)),
        )
        .await
        .map_err(|_| LockError::Timeout)??;
        *self.held.lock().await = Some(resp.key().to_vec());
        Ok(())
    }

    async fn unlock(&self) -> Result<(), LockError> {
        let key = self.held.lock().await.take().ok_or(LockError::NotHeld)?;
        let mut client = self.client.clone();
        client.unlock(key).await?;
        Ok(())
    }
}
