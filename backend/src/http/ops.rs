// kadenverify
// Copyright (C) 2024-2025 Kadenwood

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Operational endpoint handlers: health, readiness, metrics, stats and
//! the compatibility credits endpoint.

use std::sync::Arc;
use warp::{Rejection, Reply};

use super::AppState;
use crate::readiness;
use kadenverify::LOG_TARGET;

/// GET /health: liveness only.
pub async fn health() -> Result<impl Reply, Rejection> {
	Ok(warp::reply::json(&serde_json::json!({
		"status": "ok",
		"service": "kadenverify",
		"version": env!("CARGO_PKG_VERSION"),
	})))
}

/// GET /ready: concurrent checks for the cache backend, outbound DNS and
/// outbound SMTP reachability.
pub async fn ready(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
	let report = readiness::readiness(
		&state.store,
		state.verifier.resolver(),
		&state.config.ready_dns_target,
		&state.config.ready_smtp_target,
	)
	.await;
	Ok(warp::reply::json(&report))
}

/// GET /metrics: the full snapshot.
pub async fn metrics(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
	Ok(warp::reply::json(&state.metrics.snapshot()))
}

/// GET /stats: backend-agnostic store statistics. A store failure comes
/// back as a structured body, not a 5xx.
pub async fn stats(state: Arc<AppState>) -> Result<impl Reply, Rejection> {
	match state.store.stats().await {
		Ok(stats) => Ok(warp::reply::json(&stats)),
		Err(e) => {
			tracing::error!(target: LOG_TARGET, error = %e, "Stats query failed");
			Ok(warp::reply::json(&serde_json::json!({
				"error": e.to_string(),
				"total": 0,
			})))
		}
	}
}

/// GET /v1/validate/credits: this deployment is self-hosted, so credits
/// never run out; upstream clients still expect the field.
pub async fn credits() -> Result<impl Reply, Rejection> {
	Ok(warp::reply::json(&serde_json::json!({
		"credits": 999999,
		"remaining": 999999,
	})))
}
