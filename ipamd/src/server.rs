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
//! IPAM daemon HTTP API.
//!
//! Three form-encoded endpoints on a unix socket, called by the CNI plugin:
//! `POST /add` allocates, `POST /del` releases, `POST /check` probes. An
//! /add request allocates one address from every configured subnet; a
//! requested address is routed to the subnet whose CIDR contains it, the
//! other subnets assign automatically. Allocation is all or nothing: any
//! failure, including a requested address left unallocated, releases every
//! claim of the request.

use std::{sync::Arc, time::Duration};

use axum::{
    BoxError, Form, Json, Router,
    error_handling::HandleErrorLayer,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
};
use http::StatusCode;
use ovsnet_ipam::{AddressBinding, Ip};
use ovsnet_store::{AllocationLock, ReservationStore};
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tower::{ServiceBuilder, timeout::TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::allocator::{AllocatorError, IpAllocator};

const API_TIMEOUT: Duration = Duration::from_secs(30);

/// The daemon's shared state: one allocator per configured subnet.
pub struct DaemonState<S, L> {
    allocators: Vec<IpAllocator<S, L>>,
}

impl<S, L> DaemonState<S, L>
where
    S: ReservationStore,
    L: AllocationLock,
{
    pub fn new(allocators: Vec<IpAllocator<S, L>>) -> Self {
        Self { allocators }
    }

    /// Allocates one address from every subnet, honoring the requested
    /// addresses. On any failure every claim of this owner is released
    /// before the error is returned.
    async fn allocate(
        &self,
        container_id: &str,
        ifname: &str,
        requested: &[Ip],
    ) -> Result<Vec<AddressBinding>, String> {
        match self.try_allocate(container_id, ifname, requested).await {
            Ok(bindings) => Ok(bindings),
            Err(err) => {
                if let Err(release_err) = self.release_all(container_id, ifname).await {
                    warn!(%release_err, "rollback release failed");
                }
                Err(err)
            }
        }
    }

    async fn try_allocate(
        &self,
        container_id: &str,
        ifname: &str,
        requested: &[Ip],
    ) -> Result<Vec<AddressBinding>, String> {
        for &ip in requested {
            if !self.allocators.iter().any(|a| a.in_cidr(ip)) {
                return Err(format!("no subnet contains {ip}"));
            }
        }

        let mut bindings = Vec::with_capacity(self.allocators.len());
        for allocator in &self.allocators {
            let wanted = requested.iter().copied().find(|&ip| allocator.in_cidr(ip));
            let binding = allocator
                .get(container_id, ifname, wanted)
                .await
                .map_err(|err| err.to_string())?;
            bindings.push(binding);
        }

        // Each subnet allocates exactly one address, so a request naming
        // several addresses in one CIDR cannot be satisfied.
        for &ip in requested {
            if !bindings.iter().any(|binding| binding.ip == ip) {
                return Err(format!("requested address {ip} was not allocated"));
            }
        }
        Ok(bindings)
    }

    /// Releases the owner across every allocator. Failures are collected
    /// and reported; a reservation whose release fails is still held in the
    /// store.
    async fn release_all(&self, container_id: &str, ifname: &str) -> Result<(), String> {
        let mut failures = Vec::new();
        for allocator in &self.allocators {
            if let Err(err) = allocator.release(container_id, ifname).await {
                warn!(subnet = allocator.name(), %err, "release failed");
                failures.push(format!("{}: {err}", allocator.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!("release failed: {}", failures.join("; ")))
        }
    }

    async fn check(&self, container_id: &str, ifname: &str) -> Result<bool, AllocatorError> {
        for allocator in &self.allocators {
            if allocator.check(container_id, ifname).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Form payload of the three endpoints. `ips` is a comma-separated list of
/// requested addresses, empty for automatic assignment.
#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    #[serde(default)]
    pub ips: String,
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "ifName", default)]
    pub if_name: String,
}

/// JSON error envelope of the API.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: u16,
    pub details: String,
}

impl ApiError {
    fn bad_request(details: impl Into<String>) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST.as_u16(),
            details: details.into(),
        }
    }

    fn internal(details: impl Into<String>) -> Self {
        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            details: details.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Builds the daemon router.
pub fn router<S, L>(state: Arc<DaemonState<S, L>>) -> Router
where
    S: ReservationStore + 'static,
    L: AllocationLock + 'static,
{
    Router::new()
        .route("/add", post(add::<S, L>))
        .route("/del", post(del::<S, L>))
        .route("/check", post(check::<S, L>))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: BoxError| async move {
                    error!(%err, "IPAM API error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Unhandled error: {err}"),
                    )
                }))
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(API_TIMEOUT)),
        )
}

/// Serves the router on the unix socket until the token cancels.
pub async fn serve<S, L>(
    listener: UnixListener,
    state: Arc<DaemonState<S, L>>,
    cancellation_token: CancellationToken,
) -> std::io::Result<()>
where
    S: ReservationStore + 'static,
    L: AllocationLock + 'static,
{
    info!("Starting IPAM API");
    if let Err(e) = axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await
    {
        error!(error=%e, "IPAM API server unexpectedly stopped");
    }
    info!("Shutting down IPAM API server");
    Ok(())
}

async fn add<S, L>(
    State(state): State<Arc<DaemonState<S, L>>>,
    Form(req): Form<AddressRequest>,
) -> Result<Json<Vec<AddressBinding>>, ApiError>
where
    S: ReservationStore,
    L: AllocationLock,
{
    let requested = parse_ips(&req.ips)?;
    let bindings = state
        .allocate(&req.container_id, &req.if_name, &requested)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(bindings))
}

async fn del<S, L>(
    State(state): State<Arc<DaemonState<S, L>>>,
    Form(req): Form<AddressRequest>,
) -> Result<StatusCode, ApiError>
where
    S: ReservationStore,
    L: AllocationLock,
{
    state
        .release_all(&req.container_id, &req.if_name)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(StatusCode::OK)
}

async fn check<S, L>(
    State(state): State<Arc<DaemonState<S, L>>>,
    Form(req): Form<AddressRequest>,
) -> Result<StatusCode, ApiError>
where
    S: ReservationStore,
    L: AllocationLock,
{
    match state.check(&req.container_id, &req.if_name).await {
        Ok(true) => Ok(StatusCode::OK),
        Ok(false) => Err(ApiError::bad_request(format!(
            "no reservation for container {}",
            req.container_id
        ))),
        // A store failure is not evidence of absence.
        Err(err) => Err(ApiError::internal(err.to_string())),
    }
}

fn parse_ips(ips: &str) -> Result<Vec<Ip>, ApiError> {
    ips.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ApiError::bad_request(format!("malformed address {s:?}")))
        })
        .collect()
}
