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
//! ovsnet IPAM daemon entry point.

use std::{fs, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use etcd_client::Client;
use ovsnet_ipam::Subnet;
use ovsnet_ipamd::{
    allocator::IpAllocator,
    cli::Opts,
    config::Config,
    logging::setup_tracing,
    server::{self, DaemonState},
};
use ovsnet_store::{EtcdLock, EtcdSession, EtcdStore};
use tokio::{
    net::UnixListener,
    signal::unix::{SignalKind, signal},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _guards = setup_tracing(&opts.logging);

    let config = Config::load(&opts.config)
        .with_context(|| format!("loading config from {}", opts.config.display()))?;

    let client = Client::connect(&config.etcd_endpoints, None)
        .await
        .context("connecting to etcd")?;
    let session = EtcdSession::new(&client, config.session_ttl_secs)
        .await
        .context("creating lock session")?;
    let lock = Arc::new(EtcdLock::new(
        &client,
        &session,
        &config.lock_key,
        Duration::from_secs(config.lock_acquire_timeout_secs),
    ));
    let store = Arc::new(EtcdStore::new(
        &client,
        &config.network,
        &config.key_prefix,
        Duration::from_secs(config.store_timeout_secs),
    ));

    let mut allocators = Vec::with_capacity(config.subnets.len());
    for (range_id, subnet) in config.subnets.iter().enumerate() {
        info!(name = subnet.name, cidr = subnet.cidr, "adding subnet");
        allocators.push(IpAllocator::new(
            Subnet::new(&subnet.name, &subnet.cidr, &subnet.exclude_ips)
                .with_context(|| format!("building subnet {}", subnet.name))?,
            &range_id.to_string(),
            Arc::clone(&store),
            Arc::clone(&lock),
        ));
    }
    let state = Arc::new(DaemonState::new(allocators));

    if let Some(dir) = config.socket_path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating socket directory {}", dir.display()))?;
    }
    // A socket left behind by a previous run would fail the bind.
    match fs::remove_file(&config.socket_path) {
        Ok(()) => warn!(path = %config.socket_path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("removing {}", config.socket_path.display()));
        }
    }
    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("binding {}", config.socket_path.display()))?;
    info!(path = %config.socket_path.display(), "listening");

    let cancellation_token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let signal_token = cancellation_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received");
        signal_token.cancel();
    });

    server::serve(listener, state, cancellation_token).await?;

    if let Err(err) = session.close().await {
        warn!(%err, "failed to close the lock session");
    }
    let _ = fs::remove_file(&config.socket_path);
    Ok(())
}
