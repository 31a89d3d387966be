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
//! IPv4 address value with 32-bit ordering and arithmetic.

use std::{fmt, net::Ipv4Addr, str::FromStr};

use serde::{Deserialize, Serialize};

/// An IPv4 address ordered by its 32-bit numeric value.
///
/// Arithmetic wraps at 2^32 and is never clamped against a containing CIDR;
/// range bookkeeping relies on this when walking interval bounds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ip(Ipv4Addr);

impl Ip {
    /// Creates an [Ip] from an [Ipv4Addr].
    pub const fn new(addr: Ipv4Addr) -> Self {
        Self(addr)
    }

    /// Creates an [Ip] from its 32-bit numeric value.
    pub const fn from_bits(bits: u32) -> Self {
        Self(Ipv4Addr::from_bits(bits))
    }

    /// Returns the 32-bit numeric value of the address.
    pub const fn to_bits(self) -> u32 {
        self.0.to_bits()
    }

    /// Returns the address increased by `n`, wrapping at 2^32.
    pub fn add(self, n: u32) -> Self {
        Self::from_bits(self.to_bits().wrapping_add(n))
    }

    /// Returns the address decreased by `n`, wrapping at 0.
    pub fn sub(self, n: u32) -> Self {
        Self::from_bits(self.to_bits().wrapping_sub(n))
    }

    /// Returns the inner [Ipv4Addr].
    pub const fn addr(self) -> Ipv4Addr {
        self.0
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Ipv4Addr> for Ip {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr)
    }
}

impl From<Ip> for Ipv4Addr {
    fn from(ip: Ip) -> Self {
        ip.0
    }
}

impl FromStr for Ip {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ipv4Addr::from_str(s)?))
    }
}
