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
//! Per-CIDR subnet allocator.

use std::{collections::BTreeMap, str::FromStr, sync::RwLock};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ip::Ip,
    mac::generate_mac,
    range::{IpRange, IpRangeList},
};

/// Subnet allocation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// Malformed subnet specification.
    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),
    /// Address outside the subnet's CIDR.
    #[error("address {0} is outside the subnet CIDR")]
    OutOfRange(Ip),
    /// Address or MAC binding clash.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Free pool exhausted, or a requested address is not actually free.
    #[error("no available address")]
    NoAvailableAddress,
}

/// The address pair bound to a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBinding {
    /// Allocated IPv4 address.
    pub ip: Ip,
    /// Assigned MAC address.
    pub mac: String,
}

/// A subnet's allocation state: the free and reserved interval lists plus
/// the four bidirectional pod bindings. Mutated only under the subnet's
/// write lock.
#[derive(Debug, Default)]
struct SubnetState {
    free: IpRangeList,
    reserved: IpRangeList,
    pod_to_ip: BTreeMap<String, Ip>,
    ip_to_pod: BTreeMap<Ip, String>,
    pod_to_mac: BTreeMap<String, String>,
    mac_to_pod: BTreeMap<String, String>,
}

impl SubnetState {
    // Reuses the pod's MAC or generates and records a fresh one.
    fn assign_mac(&mut self, pod: &str) -> String {
        if let Some(mac) = self.pod_to_mac.get(pod) {
            return mac.clone();
        }
        let mac = generate_mac();
        self.pod_to_mac.insert(pod.to_string(), mac.clone());
        self.mac_to_pod.insert(mac.clone(), pod.to_string());
        mac
    }

    fn bind_ip(&mut self, pod: &str, ip: Ip) {
        self.pod_to_ip.insert(pod.to_string(), ip);
        self.ip_to_pod.insert(ip, pod.to_string());
    }
}

/// The single-process allocation authority for one CIDR block.
///
/// Every mutating operation holds the exclusive lock for its full duration;
/// lookups take the shared lock. Methods never block on I/O.
#[derive(Debug)]
pub struct Subnet {
    name: String,
    cidr: Ipv4Net,
    state: RwLock<SubnetState>,
}

impl Subnet {
    /// Constructs a subnet from a CIDR and a list of excluded addresses.
    ///
    /// The free list starts as the single range from the first usable
    /// address (network + 1) to the last usable (broadcast - 1); the
    /// coalesced exclude list becomes the reserved list and is carved out
    /// of the free list. /31 and /32 blocks have no usable addresses.
    pub fn new(name: &str, cidr: &str, exclude: &[Ip]) -> Result<Self, AllocationError> {
        let net =
            Ipv4Net::from_str(cidr).map_err(|_| AllocationError::InvalidCidr(cidr.to_string()))?;
        let first = Ip::new(net.network()).add(1);
        let last = Ip::new(net.broadcast()).sub(1);

        let mut free = if first <= last {
            IpRangeList::from_range(IpRange::new(first, last))
        } else {
            IpRangeList::new()
        };
        let reserved = IpRangeList::coalesce(exclude);
        free.subtract(&reserved);

        Ok(Self {
            name: name.to_string(),
            cidr: net,
            state: RwLock::new(SubnetState {
                free,
                reserved,
                ..Default::default()
            }),
        })
    }

    /// Returns the subnet name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the subnet CIDR.
    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    /// Returns true if the address lies inside the subnet's CIDR. Routes an
    /// address request to the right allocator when multiple subnets coexist.
    pub fn in_cidr(&self, ip: Ip) -> bool {
        self.cidr.contains(&ip.addr())
    }

    /// Allocates the lowest free address for the pod.
    ///
    /// Idempotent: a pod that already holds an address gets the identical
    /// binding back without touching the free list.
    pub fn allocate_random(&self, pod: &str) -> Result<AddressBinding, AllocationError> {
        let mut state = self.state.write().unwrap();
        if let Some(&ip) = state.pod_to_ip.get(pod) {
            let mac = state.assign_mac(pod);
            return Ok(AddressBinding { ip, mac });
        }

        let ip = state
            .free
            .take_first()
            .ok_or(AllocationError::NoAvailableAddress)?;
        let mac = state.assign_mac(pod);
        state.bind_ip(pod, ip);
        Ok(AddressBinding { ip, mac })
    }

    /// Allocates a specific address for the pod, optionally with a caller
    /// chosen MAC.
    ///
    /// Reserved addresses are accepted without entering free-list
    /// accounting. An address already bound to this pod succeeds
    /// idempotently. [AllocationError::Conflict] covers an address bound to
    /// another pod, a MAC owned by another pod, and a pod that already
    /// holds a different address (one address per pod per subnet).
    pub fn allocate_static(
        &self,
        pod: &str,
        ip: Ip,
        mac: Option<&str>,
    ) -> Result<AddressBinding, AllocationError> {
        let mut state = self.state.write().unwrap();
        if !self.cidr.contains(&ip.addr()) {
            return Err(AllocationError::OutOfRange(ip));
        }

        let mac = match mac.filter(|m| !m.is_empty()) {
            None => state.assign_mac(pod),
            Some(requested) => {
                match state.mac_to_pod.get(requested) {
                    Some(owner) if owner != pod => {
                        return Err(AllocationError::Conflict(format!(
                            "MAC {requested} is bound to another pod"
                        )));
                    }
                    _ => {
                        let old = state
                            .pod_to_mac
                            .insert(pod.to_string(), requested.to_string());
                        if let Some(old) = old.filter(|old| old != requested) {
                            state.mac_to_pod.remove(&old);
                        }
                        state.mac_to_pod.insert(requested.to_string(), pod.to_string());
                        requested.to_string()
                    }
                }
            }
        };

        if let Some(&existing) = state.pod_to_ip.get(pod) {
            if existing == ip {
                return Ok(AddressBinding { ip, mac });
            }
            return Err(AllocationError::Conflict(format!(
                "pod is already bound to {existing}"
            )));
        }
        if state.ip_to_pod.contains_key(&ip) {
            return Err(AllocationError::Conflict(format!(
                "address {ip} is bound to another pod"
            )));
        }

        if state.reserved.contains(ip) {
            state.bind_ip(pod, ip);
            return Ok(AddressBinding { ip, mac });
        }

        if state.free.split_out(ip) {
            state.bind_ip(pod, ip);
            Ok(AddressBinding { ip, mac })
        } else {
            Err(AllocationError::NoAvailableAddress)
        }
    }

    /// Releases the pod's binding, returning it to the free list unless the
    /// address is reserved or outside the CIDR. Returns `None` when the pod
    /// held no binding.
    pub fn release(&self, pod: &str) -> Option<AddressBinding> {
        let mut state = self.state.write().unwrap();
        let ip = state.pod_to_ip.remove(pod)?;
        state.ip_to_pod.remove(&ip);
        let mac = state.pod_to_mac.remove(pod).unwrap_or_default();
        if !mac.is_empty() {
            state.mac_to_pod.remove(&mac);
        }

        if self.cidr.contains(&ip.addr()) && !state.reserved.contains(ip) {
            state.free.merge_in(ip);
        }
        Some(AddressBinding { ip, mac })
    }

    /// Returns true if the address is currently bound to a pod.
    pub fn contains(&self, ip: Ip) -> bool {
        self.state.read().unwrap().ip_to_pod.contains_key(&ip)
    }

    /// Returns the pod's current binding, if any.
    pub fn binding(&self, pod: &str) -> Option<AddressBinding> {
        let state = self.state.read().unwrap();
        let ip = *state.pod_to_ip.get(pod)?;
        let mac = state.pod_to_mac.get(pod).cloned().unwrap_or_default();
        Some(AddressBinding { ip, mac })
    }

    /// Number of addresses currently in the free list.
    pub fn free_addresses(&self) -> u64 {
        self.state.read().unwrap().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ip {
        s.parse().unwrap()
    }

    fn test_subnet() -> Subnet {
        Subnet::new(
            "subnet1",
            "192.168.1.0/24",
            &[ip("192.168.1.1"), ip("192.168.1.2"), ip("192.168.1.127")],
        )
        .unwrap()
    }

    fn free_ranges(subnet: &Subnet) -> Vec<IpRange> {
        subnet.state.read().unwrap().free.ranges().to_vec()
    }

    #[test]
    fn rejects_malformed_cidr() {
        let err = Subnet::new("bad", "192.168.1.0/33", &[]).unwrap_err();
        assert_eq!(err, AllocationError::InvalidCidr("192.168.1.0/33".to_string()));
        let err = Subnet::new("bad", "not-a-cidr", &[]).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidCidr(_)));
    }

    #[test]
    fn usable_bounds_for_slash_25_halves() {
        let lower = Subnet::new("lower", "192.168.33.0/25", &[]).unwrap();
        assert_eq!(
            free_ranges(&lower),
            vec![IpRange::new(ip("192.168.33.1"), ip("192.168.33.126"))]
        );

        let upper = Subnet::new("upper", "192.168.33.128/25", &[]).unwrap();
        assert_eq!(
            free_ranges(&upper),
            vec![IpRange::new(ip("192.168.33.129"), ip("192.168.33.254"))]
        );
    }

    #[test]
    fn excludes_are_carved_out_of_the_free_list() {
        let subnet = test_subnet();
        assert_eq!(
            free_ranges(&subnet),
            vec![
                IpRange::new(ip("192.168.1.3"), ip("192.168.1.126")),
                IpRange::new(ip("192.168.1.128"), ip("192.168.1.254")),
            ]
        );
    }

    #[test]
    fn slash_31_has_no_usable_addresses() {
        let subnet = Subnet::new("tiny", "10.0.0.0/31", &[]).unwrap();
        assert_eq!(subnet.free_addresses(), 0);
        assert_eq!(
            subnet.allocate_random("pod1").unwrap_err(),
            AllocationError::NoAvailableAddress
        );
    }

    #[test]
    fn random_allocation_is_idempotent() {
        let subnet = test_subnet();
        let first = subnet.allocate_random("pod1").unwrap();
        let free_after_first = subnet.free_addresses();
        let second = subnet.allocate_random("pod1").unwrap();
        assert_eq!(first, second);
        assert_eq!(subnet.free_addresses(), free_after_first);
    }

    #[test]
    fn random_allocation_takes_lowest_free_address() {
        let subnet = test_subnet();
        let binding = subnet.allocate_random("pod1").unwrap();
        assert_eq!(binding.ip, ip("192.168.1.3"));
        let binding = subnet.allocate_random("pod2").unwrap();
        assert_eq!(binding.ip, ip("192.168.1.4"));
    }

    #[test]
    fn random_allocation_exhausts_the_pool() {
        let subnet = Subnet::new("small", "10.0.0.0/30", &[]).unwrap();
        subnet.allocate_random("pod1").unwrap();
        subnet.allocate_random("pod2").unwrap();
        assert_eq!(
            subnet.allocate_random("pod3").unwrap_err(),
            AllocationError::NoAvailableAddress
        );
    }

    #[test]
    fn static_allocation_outside_cidr_fails() {
        let subnet = test_subnet();
        assert_eq!(
            subnet
                .allocate_static("pod1", ip("192.168.2.1"), None)
                .unwrap_err(),
            AllocationError::OutOfRange(ip("192.168.2.1"))
        );
    }

    #[test]
    fn static_allocation_conflicts_with_other_pod() {
        let subnet = test_subnet();
        subnet
            .allocate_static("pod1", ip("192.168.1.10"), None)
            .unwrap();
        let err = subnet
            .allocate_static("pod2", ip("192.168.1.10"), None)
            .unwrap_err();
        assert!(matches!(err, AllocationError::Conflict(_)));
    }

    #[test]
    fn static_allocation_same_pod_is_idempotent() {
        let subnet = test_subnet();
        let first = subnet
            .allocate_static("pod1", ip("192.168.1.10"), None)
            .unwrap();
        let second = subnet
            .allocate_static("pod1", ip("192.168.1.10"), None)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn static_allocation_of_second_address_for_pod_conflicts() {
        let subnet = test_subnet();
        subnet
            .allocate_static("pod1", ip("192.168.1.10"), None)
            .unwrap();
        let err = subnet
            .allocate_static("pod1", ip("192.168.1.11"), None)
            .unwrap_err();
        assert!(matches!(err, AllocationError::Conflict(_)));
        // The original binding is untouched and the second address stays
        // free.
        assert_eq!(subnet.binding("pod1").unwrap().ip, ip("192.168.1.10"));
        assert!(!subnet.contains(ip("192.168.1.11")));
    }

    #[test]
    fn static_allocation_of_reserved_address_skips_free_list() {
        let subnet = test_subnet();
        let free_before = subnet.free_addresses();
        let binding = subnet
            .allocate_static("pod1", ip("192.168.1.127"), None)
            .unwrap();
        assert_eq!(binding.ip, ip("192.168.1.127"));
        assert_eq!(subnet.free_addresses(), free_before);
    }

    #[test]
    fn static_allocation_of_unpooled_address_fails() {
        let subnet = test_subnet();
        // The network address is inside the CIDR but never entered the free
        // list, and it is not reserved either.
        assert_eq!(
            subnet
                .allocate_static("pod1", ip("192.168.1.0"), None)
                .unwrap_err(),
            AllocationError::NoAvailableAddress
        );
    }

    #[test]
    fn static_mac_conflict_is_rejected() {
        let subnet = test_subnet();
        let first = subnet.allocate_random("pod1").unwrap();
        let err = subnet
            .allocate_static("pod2", ip("192.168.1.100"), Some(&first.mac))
            .unwrap_err();
        assert_eq!(
            err,
            AllocationError::Conflict(format!("MAC {} is bound to another pod", first.mac))
        );
    }

    #[test]
    fn static_mac_reuse_by_same_pod_succeeds() {
        let subnet = test_subnet();
        let first = subnet.allocate_random("pod1").unwrap();
        subnet.release("pod1").unwrap();
        let again = subnet
            .allocate_static("pod1", ip("192.168.1.100"), Some(&first.mac))
            .unwrap();
        assert_eq!(again.mac, first.mac);
    }

    #[test]
    fn release_returns_address_to_the_free_list() {
        let subnet = test_subnet();
        let binding = subnet.allocate_random("pod1").unwrap();
        let free_before = subnet.free_addresses();

        let released = subnet.release("pod1").unwrap();
        assert_eq!(released, binding);
        assert_eq!(subnet.free_addresses(), free_before + 1);

        // The just-released address is immediately reissuable and merged
        // back contiguously with its neighbors.
        assert_eq!(
            free_ranges(&subnet),
            vec![
                IpRange::new(ip("192.168.1.3"), ip("192.168.1.126")),
                IpRange::new(ip("192.168.1.128"), ip("192.168.1.254")),
            ]
        );
        let next = subnet.allocate_random("pod2").unwrap();
        assert_eq!(next.ip, binding.ip);
    }

    #[test]
    fn release_of_unknown_pod_is_noop() {
        let subnet = test_subnet();
        assert_eq!(subnet.release("missing"), None);
    }

    #[test]
    fn release_of_reserved_address_does_not_grow_free_list() {
        let subnet = test_subnet();
        subnet
            .allocate_static("pod1", ip("192.168.1.127"), None)
            .unwrap();
        let free_before = subnet.free_addresses();
        subnet.release("pod1").unwrap();
        assert_eq!(subnet.free_addresses(), free_before);
    }

    #[test]
    fn lookups_reflect_bindings() {
        let subnet = test_subnet();
        assert!(!subnet.contains(ip("192.168.1.3")));
        assert_eq!(subnet.binding("pod1"), None);

        let binding = subnet.allocate_random("pod1").unwrap();
        assert!(subnet.contains(binding.ip));
        assert_eq!(subnet.binding("pod1"), Some(binding));

        assert!(subnet.in_cidr(ip("192.168.1.200")));
        assert!(!subnet.in_cidr(ip("192.168.2.1")));
    }
}
