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
//! Closed address intervals and sorted, non-overlapping interval lists.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ip::Ip;

/// A closed range of IPv4 addresses. Both bounds are inclusive, so a range
/// can reach `255.255.255.254` (the last usable address of `0.0.0.0/0`)
/// without overflow. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    /// First address in the range.
    pub start: Ip,
    /// Last address in the range.
    pub end: Ip,
}

impl IpRange {
    /// Creates a new range. Callers maintain `start <= end`.
    pub fn new(start: Ip, end: Ip) -> Self {
        debug_assert!(start <= end, "range start {start} above end {end}");
        Self { start, end }
    }

    /// Creates a range holding a single address.
    pub fn single(ip: Ip) -> Self {
        Self { start: ip, end: ip }
    }

    /// Inclusive membership test.
    pub fn contains(&self, ip: Ip) -> bool {
        self.start <= ip && ip <= self.end
    }

    /// Compares the range to an address, for binary search over a sorted
    /// range list.
    pub fn compare(&self, ip: &Ip) -> Ordering {
        if self.contains(*ip) {
            Ordering::Equal
        } else if self.start > *ip {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Number of addresses in the range.
    pub fn len(&self) -> u64 {
        u64::from(self.end.to_bits() - self.start.to_bits()) + 1
    }
}

/// Removes one excluded range from one free range.
///
/// Produces zero, one or two fragments: nothing when the exclusion covers
/// the free range, the untouched free range when they are disjoint, the
/// remaining suffix or prefix when the exclusion covers one end, and both
/// fragments when the exclusion sits strictly inside.
pub fn subtract_range(free: &IpRange, exclude: &IpRange) -> Vec<IpRange> {
    if exclude.end < free.start || exclude.start > free.end {
        return vec![*free];
    }
    if exclude.start <= free.start && exclude.end >= free.end {
        return Vec::new();
    }
    if exclude.start <= free.start {
        return vec![IpRange::new(exclude.end.add(1), free.end)];
    }
    if exclude.end >= free.end {
        return vec![IpRange::new(free.start, exclude.start.sub(1))];
    }
    vec![
        IpRange::new(free.start, exclude.start.sub(1)),
        IpRange::new(exclude.end.add(1), free.end),
    ]
}

/// A set of addresses stored as closed ranges, sorted ascending by start,
/// mutually non-overlapping, with adjacent ranges always coalesced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRangeList {
    ranges: Vec<IpRange>,
}

impl IpRangeList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a list holding a single range.
    pub fn from_range(range: IpRange) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    /// Coalesces an arbitrary set of addresses into the minimal sorted list
    /// of closed ranges. Empty input yields an empty list.
    pub fn coalesce(ips: &[Ip]) -> Self {
        let mut ips = ips.to_vec();
        ips.sort_unstable();
        ips.dedup();

        let mut ranges: Vec<IpRange> = Vec::new();
        for ip in ips {
            match ranges.last_mut() {
                Some(last) if last.end.add(1) == ip => last.end = ip,
                _ => ranges.push(IpRange::single(ip)),
            }
        }
        Self { ranges }
    }

    /// Returns the ranges in the list.
    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    /// Returns true if the list holds no addresses.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of addresses across all ranges.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(IpRange::len).sum()
    }

    /// Returns true if any range contains the address.
    pub fn contains(&self, ip: Ip) -> bool {
        self.find(ip).is_ok()
    }

    // Index of the range containing `ip`, or the insertion point keeping the
    // list sorted.
    fn find(&self, ip: Ip) -> Result<usize, usize> {
        self.ranges.binary_search_by(|range| range.compare(&ip))
    }

    /// Removes a single address from the list. Returns false when the
    /// address is not present.
    ///
    /// A singleton range is dropped entirely, an address at either end
    /// shrinks that end by one, and an interior address splits the range in
    /// two.
    pub fn split_out(&mut self, ip: Ip) -> bool {
        let Ok(i) = self.find(ip) else {
            return false;
        };
        let range = self.ranges[i];
        if range.start == range.end {
            self.ranges.remove(i);
        } else if ip == range.start {
            self.ranges[i].start = ip.add(1);
        } else if ip == range.end {
            self.ranges[i].end = ip.sub(1);
        } else {
            self.ranges[i].start = ip.add(1);
            self.ranges.insert(i, IpRange::new(range.start, ip.sub(1)));
        }
        true
    }

    /// Inserts a freed address back into the list, coalescing with adjacent
    /// neighbors. Returns false when the address is already present.
    pub fn merge_in(&mut self, ip: Ip) -> bool {
        let Err(i) = self.find(ip) else {
            return false;
        };
        let left_adjacent = i > 0 && self.ranges[i - 1].end.add(1) == ip;
        let right_adjacent = i < self.ranges.len() && ip.add(1) == self.ranges[i].start;
        match (left_adjacent, right_adjacent) {
            (true, true) => {
                self.ranges[i - 1].end = self.ranges[i].end;
                self.ranges.remove(i);
            }
            (true, false) => self.ranges[i - 1].end = ip,
            (false, true) => self.ranges[i].start = ip,
            (false, false) => self.ranges.insert(i, IpRange::single(ip)),
        }
        true
    }

    /// Claims the lowest address in the list, dropping its range when it was
    /// a singleton. Returns `None` when the list is empty.
    pub fn take_first(&mut self) -> Option<Ip> {
        let first = self.ranges.first_mut()?;
        let ip = first.start;
        if first.start == first.end {
            self.ranges.remove(0);
        } else {
            first.start = ip.add(1);
        }
        Some(ip)
    }

    /// Removes every address of `exclude` from this list, applying
    /// [subtract_range] range by range.
    pub fn subtract(&mut self, exclude: &IpRangeList) {
        for excluded in &exclude.ranges {
            self.ranges = self
                .ranges
                .iter()
                .flat_map(|free| subtract_range(free, excluded))
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ip {
        s.parse().unwrap()
    }

    fn range(start: &str, end: &str) -> IpRange {
        IpRange::new(ip(start), ip(end))
    }

    // Utility to check invariants on IpRangeList
    fn check_list_invariants(list: &IpRangeList) {
        let ranges = list.ranges();
        for r in ranges {
            assert!(r.start <= r.end, "invalid range: {r:?}");
        }
        for i in 1..ranges.len() {
            assert!(
                ranges[i - 1].end < ranges[i].start,
                "ranges not sorted or overlapping: {:?} and {:?}",
                ranges[i - 1],
                ranges[i]
            );
            assert!(
                ranges[i - 1].end.add(1) != ranges[i].start,
                "adjacent ranges not coalesced: {:?} and {:?}",
                ranges[i - 1],
                ranges[i]
            );
        }
    }

    #[test]
    fn coalesce_merges_consecutive_addresses() {
        let list = IpRangeList::coalesce(&[
            ip("192.168.10.11"),
            ip("192.168.1.10"),
            ip("192.168.10.10"),
            ip("192.168.10.9"),
        ]);
        assert_eq!(
            list.ranges(),
            &[
                range("192.168.1.10", "192.168.1.10"),
                range("192.168.10.9", "192.168.10.11"),
            ]
        );
        check_list_invariants(&list);
    }

    #[test]
    fn coalesce_empty_input_yields_empty_list() {
        let list = IpRangeList::coalesce(&[]);
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn coalesce_deduplicates() {
        let list = IpRangeList::coalesce(&[ip("10.0.0.1"), ip("10.0.0.1"), ip("10.0.0.2")]);
        assert_eq!(list.ranges(), &[range("10.0.0.1", "10.0.0.2")]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn subtract_range_disjoint_keeps_original() {
        let free = range("10.0.0.10", "10.0.0.20");
        let out = subtract_range(&free, &range("10.0.0.30", "10.0.0.40"));
        assert_eq!(out, vec![free]);
    }

    #[test]
    fn subtract_range_full_cover_empties() {
        let out = subtract_range(
            &range("10.0.0.10", "10.0.0.20"),
            &range("10.0.0.5", "10.0.0.25"),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn subtract_range_prefix_leaves_suffix() {
        let out = subtract_range(
            &range("10.0.0.10", "10.0.0.20"),
            &range("10.0.0.5", "10.0.0.14"),
        );
        assert_eq!(out, vec![range("10.0.0.15", "10.0.0.20")]);
    }

    #[test]
    fn subtract_range_suffix_leaves_prefix() {
        let out = subtract_range(
            &range("10.0.0.10", "10.0.0.20"),
            &range("10.0.0.15", "10.0.0.25"),
        );
        assert_eq!(out, vec![range("10.0.0.10", "10.0.0.14")]);
    }

    #[test]
    fn subtract_range_interior_splits_in_two() {
        let out = subtract_range(
            &range("10.0.0.10", "10.0.0.20"),
            &range("10.0.0.13", "10.0.0.15"),
        );
        assert_eq!(
            out,
            vec![range("10.0.0.10", "10.0.0.12"), range("10.0.0.16", "10.0.0.20")]
        );
    }

    #[test]
    fn subtract_applies_whole_exclude_set() {
        let mut free = IpRangeList::from_range(range("192.168.1.1", "192.168.1.254"));
        let exclude = IpRangeList::coalesce(&[
            ip("192.168.1.1"),
            ip("192.168.1.2"),
            ip("192.168.1.127"),
        ]);
        free.subtract(&exclude);
        assert_eq!(
            free.ranges(),
            &[
                range("192.168.1.3", "192.168.1.126"),
                range("192.168.1.128", "192.168.1.254"),
            ]
        );
        check_list_invariants(&free);
    }

    #[test]
    fn split_out_singleton_drops_range() {
        let mut list = IpRangeList::from_range(range("10.0.0.5", "10.0.0.5"));
        assert!(list.split_out(ip("10.0.0.5")));
        assert!(list.is_empty());
    }

    #[test]
    fn split_out_at_ends_shrinks() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.10"));
        assert!(list.split_out(ip("10.0.0.1")));
        assert!(list.split_out(ip("10.0.0.10")));
        assert_eq!(list.ranges(), &[range("10.0.0.2", "10.0.0.9")]);
        check_list_invariants(&list);
    }

    #[test]
    fn split_out_interior_splits() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.10"));
        assert!(list.split_out(ip("10.0.0.5")));
        assert_eq!(
            list.ranges(),
            &[range("10.0.0.1", "10.0.0.4"), range("10.0.0.6", "10.0.0.10")]
        );
        check_list_invariants(&list);
    }

    #[test]
    fn split_out_absent_address_is_noop() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.10"));
        assert!(!list.split_out(ip("10.0.1.1")));
        assert_eq!(list.ranges(), &[range("10.0.0.1", "10.0.0.10")]);
    }

    #[test]
    fn merge_in_rejects_present_address() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.10"));
        assert!(!list.merge_in(ip("10.0.0.5")));
    }

    #[test]
    fn merge_in_coalesces_with_both_neighbors() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.10"));
        list.split_out(ip("10.0.0.5"));
        assert!(list.merge_in(ip("10.0.0.5")));
        assert_eq!(list.ranges(), &[range("10.0.0.1", "10.0.0.10")]);
        check_list_invariants(&list);
    }

    #[test]
    fn merge_in_standalone_inserts_singleton() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.3"));
        assert!(list.merge_in(ip("10.0.0.20")));
        assert_eq!(
            list.ranges(),
            &[range("10.0.0.1", "10.0.0.3"), range("10.0.0.20", "10.0.0.20")]
        );
        check_list_invariants(&list);
    }

    #[test]
    fn merge_in_left_and_right_adjacency() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.3"));
        assert!(list.merge_in(ip("10.0.0.4")));
        assert_eq!(list.ranges(), &[range("10.0.0.1", "10.0.0.4")]);

        assert!(list.merge_in(ip("10.0.0.0")));
        assert_eq!(list.ranges(), &[range("10.0.0.0", "10.0.0.4")]);
        check_list_invariants(&list);
    }

    #[test]
    fn split_then_merge_restores_original() {
        let original = IpRangeList::from_range(range("10.0.0.1", "10.0.0.254"));
        for target in ["10.0.0.1", "10.0.0.100", "10.0.0.254"] {
            let mut list = original.clone();
            assert!(list.split_out(ip(target)));
            assert!(list.merge_in(ip(target)));
            assert_eq!(list, original);
        }
    }

    #[test]
    fn take_first_walks_the_list_in_order() {
        let mut list = IpRangeList::from_range(range("10.0.0.1", "10.0.0.2"));
        list.merge_in(ip("10.0.0.9"));
        assert_eq!(list.take_first(), Some(ip("10.0.0.1")));
        assert_eq!(list.take_first(), Some(ip("10.0.0.2")));
        assert_eq!(list.take_first(), Some(ip("10.0.0.9")));
        assert_eq!(list.take_first(), None);
    }
}
