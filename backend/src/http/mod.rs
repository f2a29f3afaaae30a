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

//! HTTP surface: verification endpoints, OmniVerifier-compatible aliases
//! and the operational endpoints. Only input-size, auth and rate-limit
//! problems map to non-2xx; every verification outcome is a 200 with
//! structured content.

mod ops;
mod verify;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use kadenverify::tiered::TieredVerifier;
use kadenverify::{CheckEmailInput, Verifier};

use crate::config::BackendConfig;
use crate::metrics::MetricsRegistry;
use crate::rate_limit::{identity, RateLimiter};
use crate::storage::VerificationStore;

/// Everything the handlers need, built once at startup.
pub struct AppState {
	pub config: BackendConfig,
	pub verifier: Arc<Verifier>,
	pub tiered: TieredVerifier,
	pub store: Arc<dyn VerificationStore>,
	pub metrics: Arc<MetricsRegistry>,
	pub rate_limiter: RateLimiter,
	pub template: CheckEmailInput,
}

/// Rejection carrying an HTTP status; mapped to JSON by
/// [handle_rejection].
#[derive(Debug)]
pub struct ApiError {
	pub status: StatusCode,
	pub message: String,
}

impl warp::reject::Reject for ApiError {}

impl ApiError {
	pub fn reject(status: StatusCode, message: impl Into<String>) -> Rejection {
		warp::reject::custom(ApiError {
			status,
			message: message.into(),
		})
	}
}

fn with_state(
	state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
	warp::any().map(move || Arc::clone(&state))
}

/// Extract the presented API key: `X-API-Key` in either case (HTTP
/// headers are case-insensitive on the wire) or `Authorization: Bearer`.
fn presented_key(key_header: Option<String>, auth_header: Option<String>) -> Option<String> {
	key_header.filter(|k| !k.is_empty()).or_else(|| {
		auth_header
			.and_then(|auth| auth.strip_prefix("Bearer ").map(|k| k.to_string()))
	})
}

/// Auth plus (optionally) rate limiting, shared by protected routes.
fn guard(
	state: Arc<AppState>,
	rate_limited: bool,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
	warp::addr::remote()
		.and(warp::header::optional::<String>("x-api-key"))
		.and(warp::header::optional::<String>("authorization"))
		.and_then(
			move |addr: Option<SocketAddr>,
			      key_header: Option<String>,
			      auth_header: Option<String>| {
				let state = Arc::clone(&state);
				async move {
					let key = presented_key(key_header, auth_header);

					if let Some(expected) = &state.config.api_key {
						if key.as_deref() != Some(expected.as_str()) {
							return Err(ApiError::reject(
								StatusCode::UNAUTHORIZED,
								"Invalid API key",
							));
						}
					}

					if rate_limited {
						let ip = addr
							.map(|a| a.ip().to_string())
							.unwrap_or_else(|| "unknown".to_string());
						let id = identity(&ip, key.as_deref());
						if !state.rate_limiter.check(&id) {
							state.metrics.incr_rate_limited();
							return Err(ApiError::reject(
								StatusCode::TOO_MANY_REQUESTS,
								"Rate limit exceeded",
							));
						}
					}

					Ok::<(), Rejection>(())
				}
			},
		)
		.untuple_one()
}

/// The full route tree. `/v1/validate/credits` is registered before the
/// `/v1/validate/{email}` wildcard. Rejections are recovered into JSON
/// replies, so the resulting filter is infallible.
pub fn routes(
	state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
	let verify_get = warp::path!("verify")
		.and(warp::get())
		.and(guard(Arc::clone(&state), true))
		.and(with_state(Arc::clone(&state)))
		.and(warp::query::<std::collections::HashMap<String, String>>())
		.and_then(verify::verify_get);

	let verify_post = warp::path!("verify")
		.and(warp::post())
		.and(guard(Arc::clone(&state), true))
		.and(with_state(Arc::clone(&state)))
		.and(warp::body::content_length_limit(16 * 1024))
		.and(warp::body::json())
		.and_then(verify::verify_post);

	let verify_batch = warp::path!("verify" / "batch")
		.and(warp::post())
		.and(guard(Arc::clone(&state), true))
		.and(with_state(Arc::clone(&state)))
		.and(warp::body::content_length_limit(1024 * 1024))
		.and(warp::body::json())
		.and_then(verify::verify_batch);

	let omni_credits = warp::path!("v1" / "validate" / "credits")
		.and(warp::get())
		.and(guard(Arc::clone(&state), false))
		.and_then(ops::credits);

	let omni_validate_get = warp::path!("v1" / "validate" / String)
		.and(warp::get())
		.and(guard(Arc::clone(&state), true))
		.and(with_state(Arc::clone(&state)))
		.and_then(verify::omni_validate_get);

	let omni_verify_post = warp::path!("v1" / "verify")
		.and(warp::post())
		.and(guard(Arc::clone(&state), true))
		.and(with_state(Arc::clone(&state)))
		.and(warp::body::content_length_limit(16 * 1024))
		.and(warp::body::json())
		.and_then(verify::omni_verify_post);

	let health = warp::path!("health").and(warp::get()).and_then(ops::health);

	let ready = warp::path!("ready")
		.and(warp::get())
		.and(with_state(Arc::clone(&state)))
		.and_then(ops::ready);

	let metrics = warp::path!("metrics")
		.and(warp::get())
		.and(guard(Arc::clone(&state), false))
		.and(with_state(Arc::clone(&state)))
		.and_then(ops::metrics);

	let stats = warp::path!("stats")
		.and(warp::get())
		.and(guard(Arc::clone(&state), false))
		.and(with_state(Arc::clone(&state)))
		.and_then(ops::stats);

	verify_batch
		.or(verify_get)
		.or(verify_post)
		.or(omni_credits)
		.or(omni_validate_get)
		.or(omni_verify_post)
		.or(health)
		.or(ready)
		.or(metrics)
		.or(stats)
		.recover(handle_rejection)
		.with(warp::log(kadenverify::LOG_TARGET))
}

/// Map rejections to JSON errors. Everything except input-size, auth,
/// rate-limit and routing problems is a 500, which should not happen:
/// handlers convert internal failures into structured 200 bodies.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
	let (status, message) = if let Some(api) = err.find::<ApiError>() {
		(api.status, api.message.clone())
	} else if err.is_not_found() {
		(StatusCode::NOT_FOUND, "Not found".to_string())
	} else if err
		.find::<warp::filters::body::BodyDeserializeError>()
		.is_some()
	{
		(StatusCode::BAD_REQUEST, "Invalid request body".to_string())
	} else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
		(StatusCode::BAD_REQUEST, "Payload too large".to_string())
	} else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
		(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
	} else {
		tracing::error!(target: kadenverify::LOG_TARGET, rejection = ?err, "Unhandled rejection");
		(
			StatusCode::INTERNAL_SERVER_ERROR,
			"Internal server error".to_string(),
		)
	};

	let body = warp::reply::json(&serde_json::json!({ "detail": message }));
	Ok(warp::reply::with_status(body, status))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::RateLimitBackend;
	use crate::metrics::MetricsRegistry;
	use crate::storage::memory::InMemoryStore;
	use crate::storage::StoreCache;
	use kadenverify::domain_cache::DomainCache;
	use kadenverify::enrichment::{EmptyDirectory, EnrichmentChain};
	use kadenverify::mx::MxResolver;
	use kadenverify::tiered::{NullEventSink, TieredConfig};
	use std::time::Duration;

	fn test_state(api_key: Option<&str>, rate_limit_max: usize) -> Arc<AppState> {
		let mut config = BackendConfig::default();
		config.api_key = api_key.map(|k| k.to_string());
		config.rate_limit_max = rate_limit_max;

		let resolver = Arc::new(MxResolver::with_timeout(Duration::from_millis(200)));
		let verifier = Arc::new(Verifier::with_parts(
			Arc::clone(&resolver),
			Arc::new(DomainCache::default()),
		));
		let store: Arc<dyn VerificationStore> = Arc::new(InMemoryStore::default());
		let metrics = Arc::new(MetricsRegistry::new());
		let template = CheckEmailInput::default();

		let tiered = TieredVerifier::new(
			Arc::clone(&verifier),
			Arc::new(StoreCache::new(Arc::clone(&store))),
			Arc::new(NullEventSink),
			EnrichmentChain::default(),
			Arc::new(EmptyDirectory),
			TieredConfig::default(),
			template.clone(),
			None,
		);

		let rate_limiter = RateLimiter::new(
			RateLimitBackend::Memory,
			Duration::from_secs(60),
			rate_limit_max,
		);

		Arc::new(AppState {
			config,
			verifier,
			tiered,
			store,
			metrics,
			rate_limiter,
			template,
		})
	}

	#[tokio::test]
	async fn health_needs_no_auth() {
		let routes = routes(test_state(Some("secret"), 100));
		let res = warp::test::request()
			.method("GET")
			.path("/health")
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 200);
		let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
		assert_eq!(body["status"], "ok");
		assert_eq!(body["service"], "kadenverify");
	}

	#[tokio::test]
	async fn missing_key_is_401() {
		let routes = routes(test_state(Some("secret"), 100));
		let res = warp::test::request()
			.method("GET")
			.path("/verify?email=a@b")
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 401);
	}

	#[tokio::test]
	async fn bearer_token_is_accepted() {
		let routes = routes(test_state(Some("secret"), 100));
		let res = warp::test::request()
			.method("GET")
			.path("/verify?email=a@b")
			.header("Authorization", "Bearer secret")
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 200);
	}

	#[tokio::test]
	async fn x_api_key_is_accepted_and_result_is_omni_shaped() {
		let routes = routes(test_state(Some("secret"), 100));
		let res = warp::test::request()
			.method("GET")
			.path("/verify?email=a@b")
			.header("X-API-Key", "secret")
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 200);
		let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
		assert_eq!(body["result"], "undeliverable");
		assert_eq!(body["status"], "invalid");
		assert!(body["_kadenverify_tier"].is_number());
	}

	#[tokio::test]
	async fn second_request_within_window_is_429() {
		let state = test_state(None, 1);
		let routes = routes(Arc::clone(&state));

		let first = warp::test::request()
			.method("GET")
			.path("/verify?email=a@b")
			.reply(&routes)
			.await;
		assert_eq!(first.status(), 200);

		let second = warp::test::request()
			.method("GET")
			.path("/verify?email=a@b")
			.reply(&routes)
			.await;
		assert_eq!(second.status(), 429);
		assert_eq!(state.metrics.snapshot().rate_limited_429, 1);
	}

	#[tokio::test]
	async fn batch_over_limit_is_400() {
		let state = test_state(None, 1000);
		let routes = routes(state);
		let emails: Vec<String> = (0..1001).map(|i| format!("user{}@x.com", i)).collect();
		let res = warp::test::request()
			.method("POST")
			.path("/verify/batch")
			.json(&serde_json::json!({ "emails": emails }))
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 400);
	}

	#[tokio::test]
	async fn batch_preserves_order() {
		let state = test_state(None, 1000);
		let routes = routes(state);
		// Syntax failures resolve without the network.
		let res = warp::test::request()
			.method("POST")
			.path("/verify/batch")
			.json(&serde_json::json!({ "emails": ["a@b", "bad1@", "@x.com"] }))
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 200);
		let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
		let list = body.as_array().unwrap();
		assert_eq!(list.len(), 3);
		assert_eq!(list[0]["email"], "a@b");
		assert_eq!(list[1]["email"], "bad1@");
		assert_eq!(list[2]["email"], "@x.com");
		for item in list {
			assert_eq!(item["status"], "invalid");
		}
	}

	#[tokio::test]
	async fn credits_are_effectively_unlimited() {
		let routes = routes(test_state(None, 100));
		let res = warp::test::request()
			.method("GET")
			.path("/v1/validate/credits")
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 200);
		let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
		assert_eq!(body["credits"], 999999);
		assert_eq!(body["remaining"], 999999);
	}

	#[tokio::test]
	async fn unknown_route_is_404() {
		let routes = routes(test_state(None, 100));
		let res = warp::test::request()
			.method("GET")
			.path("/nope")
			.reply(&routes)
			.await;
		assert_eq!(res.status(), 404);
	}
}
