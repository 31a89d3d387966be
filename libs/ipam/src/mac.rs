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
//! MAC address generation.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::{RngCore, SeedableRng, TryRngCore, rngs::OsRng};
use rand_chacha::ChaCha8Rng;

/// Locally administered, unicast vendor prefix for generated MACs.
pub const MAC_PREFIX: &str = "02:42:AC";

/// Generates a MAC address: the fixed vendor prefix plus three random
/// octets, formatted as colon-separated uppercase hex.
///
/// The octets come from the OS entropy source; a time-seeded ChaCha stream
/// is used only when that source errors. Random MACs are not checked
/// against existing bindings (24 random bits keep the collision probability
/// below 1e-4 until roughly 180 pods share a subnet); only static
/// assignment enforces uniqueness.
pub fn generate_mac() -> String {
    let mut octets = [0u8; 3];
    if OsRng.try_fill_bytes(&mut octets).is_err() {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        ChaCha8Rng::seed_from_u64(seed).fill_bytes(&mut octets);
    }
    format!(
        "{MAC_PREFIX}:{:02X}:{:02X}:{:02X}",
        octets[0], octets[1], octets[2]
    )
}
