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
//! etcd-backed reservation store.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, KvClient, Txn, TxnOp};
use ovsnet_ipam::Ip;
use tracing::warn;

use crate::{
    LAST_RESERVED_IP_PREFIX, ReservationStore, StoreError, ip_key, last_reserved_key,
    record_matches, record_value,
};

/// Default etcd key prefix for reservation records.
pub const DEFAULT_KEY_PREFIX: &str = "/ovsnet/networks";

/// Default per-request deadline against etcd.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Reservation store over one network's key space in etcd.
///
/// Each call is a single round trip bounded by the request deadline; the
/// store never retries. Reservations are written with an atomic
/// compare-and-put so concurrent writers racing for the same address see
/// exactly one winner, regardless of the cluster lock above.
#[derive(Clone)]
pub struct EtcdStore {
    kv: KvClient,
    prefix: String,
    network: String,
    timeout: Duration,
}

impl EtcdStore {
    pub fn new(client: &Client, network: &str, prefix: &str, timeout: Duration) -> Self {
        Self {
            kv: client.kv_client(),
            prefix: prefix.to_string(),
            network: network.to_string(),
            timeout,
        }
    }

    fn network_prefix(&self) -> String {
        format!("{}/{}/", self.prefix, self.network)
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, etcd_client::Error>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(StoreError::from)
    }

    /// Lists every record of the network, as `(key, value)` string pairs,
    /// excluding the last-reserved pointer keys.
    async fn list_records(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut kv = self.kv.clone();
        let resp = self
            .bounded(kv.get(self.network_prefix(), Some(GetOptions::new().with_prefix())))
            .await?;
        let mut records = Vec::with_capacity(resp.kvs().len());
        for entry in resp.kvs() {
            let key = entry.key_str()?;
            let segment = key.rsplit('/').next().unwrap_or(key);
            if segment.starts_with(LAST_RESERVED_IP_PREFIX) {
                continue;
            }
            records.push((key.to_string(), entry.value_str()?.to_string()));
        }
        Ok(records)
    }
}

#[async_trait]
impl ReservationStore for EtcdStore {
    async fn reserve(
        &self,
        range_id: &str,
        ip: Ip,
        container_id: &str,
        ifname: &str,
    ) -> Result<bool, StoreError> {
        let key = ip_key(&self.prefix, &self.network, ip);
        // Put only when the key has never been created. The transaction is
        // the authority on who owns the address.
        let txn = Txn::new()
            .when([Compare::create_revision(key.as_str(), CompareOp::Equal, 0)])
            .and_then([TxnOp::put(
                key.as_str(),
                record_value(container_id, ifname),
                None,
            )]);
        let mut kv = self.kv.clone();
        let resp = self.bounded(kv.txn(txn)).await?;
        if !resp.succeeded() {
            return Ok(false);
        }

        let mut kv = self.kv.clone();
        self.bounded(kv.put(
            last_reserved_key(&self.prefix, &self.network, range_id),
            ip.to_string(),
            None,
        ))
        .await?;
        Ok(true)
    }

    async fn last_reserved_ip(&self, range_id: &str) -> Result<Ip, StoreError> {
        let mut kv = self.kv.clone();
        let resp = self
            .bounded(kv.get(last_reserved_key(&self.prefix, &self.network, range_id), None))
            .await?;
        let entry = resp.kvs().first().ok_or(StoreError::KeyNotExists)?;
        let value = entry.value_str()?;
        value
            .parse()
            .map_err(|_| StoreError::InvalidRecord(value.to_string()))
    }

    async fn release(&self, ip: Ip) -> Result<(), StoreError> {
        let mut kv = self.kv.clone();
        self.bounded(kv.delete(ip_key(&self.prefix, &self.network, ip), None))
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, container_id: &str, ifname: &str) -> Result<bool, StoreError> {
        let records = self.list_records().await?;
        Ok(records
            .iter()
            .any(|(_, value)| record_matches(value, container_id, ifname)))
    }

    async fn release_by_id(&self, container_id: &str, ifname: &str) -> Result<bool, StoreError> {
        let mut released = false;
        for (key, value) in self.list_records().await? {
            if !record_matches(&value, container_id, ifname) {
                continue;
            }
            let mut kv = self.kv.clone();
            match self.bounded(kv.delete(key.as_str(), None)).await {
                Ok(_) => released = true,
                Err(err) => {
                    warn!(key, %err, "failed to release reservation");
                }
            }
        }
        Ok(released)
    }

    async fn get_by_id(&self, container_id: &str, ifname: &str) -> Result<Vec<Ip>, StoreError> {
        let mut ips = Vec::new();
        for (key, value) in self.list_records().await? {
            if !record_matches(&value, container_id, ifname) {
                continue;
            }
            let segment = key.rsplit('/').next().unwrap_or(&key);
            let ip = segment
                .parse()
                .map_err(|_| StoreError::InvalidRecord(key.clone()))?;
            ips.push(ip);
        }
        Ok(ips)
    }
}
