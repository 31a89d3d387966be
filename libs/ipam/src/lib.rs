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
//! # IP address management
//!
//! In-memory IPv4 address bookkeeping for the ovsnet CNI.
//!
//! A [subnet::Subnet] owns one CIDR block and hands out addresses from a
//! sorted free list of closed intervals ([range::IpRangeList]), tracking
//! per-pod IP and MAC bindings. Durability and cross-host coordination are
//! not this crate's concern; the daemon layers an etcd-backed reservation
//! store and a cluster lock on top.

pub mod ip;
pub mod mac;
pub mod range;
pub mod subnet;

pub use ip::Ip;
pub use range::{IpRange, IpRangeList};
pub use subnet::{AddressBinding, AllocationError, Subnet};
