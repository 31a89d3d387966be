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
//! # The ovsnet IPAM daemon.
//!
//! Composes the per-subnet allocators from `ovsnet-ipam` with the etcd
//! reservation store and cluster lock from `ovsnet-store`, and exposes the
//! result as an HTTP API on a unix socket for the CNI plugin to call.

pub mod allocator;
pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
