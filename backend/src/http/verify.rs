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

//! Verification endpoint handlers.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use super::{ApiError, AppState};
use kadenverify::LOG_TARGET;

#[derive(Debug, Deserialize)]
pub struct SingleVerifyRequest {
	pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
	pub emails: Vec<String>,
}

/// Run the tiered verification and shape the omni response. Tiered
/// responses carry `_kadenverify_tier` and `_kadenverify_reason` when
/// asked to.
async fn tiered_omni(
	state: &Arc<AppState>,
	email: &str,
	endpoint: &'static str,
	with_tier_fields: bool,
) -> serde_json::Value {
	let started = Instant::now();
	let outcome = state.tiered.verify(email).await;
	let mut response = outcome.result.to_omni();
	if with_tier_fields {
		response["_kadenverify_tier"] = serde_json::json!(outcome.tier);
		response["_kadenverify_reason"] = serde_json::json!(outcome.reason);
	}
	state.metrics.observe_endpoint(endpoint, started.elapsed());
	response
}

/// GET /verify?email=...
pub async fn verify_get(
	state: Arc<AppState>,
	query: HashMap<String, String>,
) -> Result<impl Reply, Rejection> {
	let email = query
		.get("email")
		.filter(|e| !e.is_empty())
		.ok_or_else(|| {
			ApiError::reject(StatusCode::BAD_REQUEST, "email query parameter is required")
		})?;

	let response = tiered_omni(&state, email, "GET /verify", true).await;
	Ok(warp::reply::json(&response))
}

/// POST /verify with a JSON body.
pub async fn verify_post(
	state: Arc<AppState>,
	body: SingleVerifyRequest,
) -> Result<impl Reply, Rejection> {
	if body.email.is_empty() {
		return Err(ApiError::reject(
			StatusCode::BAD_REQUEST,
			"email field is required",
		));
	}
	let response = tiered_omni(&state, &body.email, "POST /verify", true).await;
	Ok(warp::reply::json(&response))
}

/// POST /verify/batch: up to 1000 emails, order preserved.
pub async fn verify_batch(
	state: Arc<AppState>,
	body: BatchRequest,
) -> Result<impl Reply, Rejection> {
	if body.emails.len() > state.config.max_batch_size {
		return Err(ApiError::reject(
			StatusCode::BAD_REQUEST,
			format!(
				"Batch size exceeds maximum of {}",
				state.config.max_batch_size
			),
		));
	}
	if body.emails.is_empty() {
		return Ok(warp::reply::json(&serde_json::json!([])));
	}

	let started = Instant::now();
	let results = state
		.verifier
		.check_email_batch(&body.emails, &state.template, state.config.concurrency)
		.await;

	// Persist; a store failure never fails the response.
	if let Err(e) = state.store.upsert_batch(&results, 500).await {
		tracing::error!(target: LOG_TARGET, error = %e, "Batch persist failed");
	}

	let response: Vec<serde_json::Value> = results.iter().map(|r| r.to_omni()).collect();
	state
		.metrics
		.observe_endpoint("POST /verify/batch", started.elapsed());
	Ok(warp::reply::json(&response))
}

/// GET /v1/validate/{email}: OmniVerifier-compatible alias.
pub async fn omni_validate_get(
	email: String,
	state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
	let response = tiered_omni(&state, &email, "GET /v1/validate", false).await;
	Ok(warp::reply::json(&response))
}

/// POST /v1/verify: OmniVerifier-compatible alias.
pub async fn omni_verify_post(
	state: Arc<AppState>,
	body: SingleVerifyRequest,
) -> Result<impl Reply, Rejection> {
	if body.email.is_empty() {
		return Err(ApiError::reject(
			StatusCode::BAD_REQUEST,
			"email field is required",
		));
	}
	let response = tiered_omni(&state, &body.email, "POST /v1/verify", false).await;
	Ok(warp::reply::json(&response))
}
