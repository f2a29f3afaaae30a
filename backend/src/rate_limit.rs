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

//! Request rate limiting.
//!
//! Identity is (client IP, SHA-256 prefix of the presented API key), so
//! two keys behind one NAT get independent budgets. Two state backends:
//! a per-identity sliding window, and fixed-window buckets in a shared
//! key-value map. Both prune stale state on every request.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{BackendConfig, RateLimitBackend};

/// Build the rate-limit identity for a client.
pub fn identity(ip: &str, api_key: Option<&str>) -> String {
	let mut hasher = Sha256::new();
	hasher.update(api_key.unwrap_or("").as_bytes());
	let digest = hasher.finalize();
	let prefix: String = digest
		.iter()
		.take(8)
		.map(|b| format!("{:02x}", b))
		.collect();
	format!("{}|{}", ip, prefix)
}

enum Backend {
	/// Sliding window: per-identity timestamps pruned on every request.
	Memory {
		store: Mutex<HashMap<String, Vec<Instant>>>,
	},
	/// Fixed-window buckets keyed by (identity, window index), the shape
	/// a shared key-value store would hold with a TTL per bucket.
	SharedKv {
		buckets: Mutex<HashMap<String, (u64, usize)>>,
	},
}

pub struct RateLimiter {
	backend: Backend,
	window: Duration,
	max_per_window: usize,
	epoch: Instant,
}

impl RateLimiter {
	pub fn from_config(config: &BackendConfig) -> Self {
		Self::new(
			config.rate_limit_backend,
			Duration::from_secs(config.rate_limit_window_secs.max(1)),
			config.rate_limit_max,
		)
	}

	pub fn new(backend: RateLimitBackend, window: Duration, max_per_window: usize) -> Self {
		let backend = match backend {
			RateLimitBackend::Memory => Backend::Memory {
				store: Mutex::new(HashMap::new()),
			},
			RateLimitBackend::SharedKv => Backend::SharedKv {
				buckets: Mutex::new(HashMap::new()),
			},
		};
		RateLimiter {
			backend,
			window,
			max_per_window,
			epoch: Instant::now(),
		}
	}

	/// Record a request for `identity`. Returns false when the identity
	/// is over budget for the current window.
	pub fn check(&self, identity: &str) -> bool {
		match &self.backend {
			Backend::Memory { store } => {
				let now = Instant::now();
				let mut store = store.lock().expect("Rate limit lock poisoned. qed.");

				// Prune every identity so idle clients don't pin memory.
				store.retain(|_, hits| {
					hits.retain(|t| now.duration_since(*t) < self.window);
					!hits.is_empty()
				});

				let hits = store.entry(identity.to_string()).or_default();
				if hits.len() >= self.max_per_window {
					return false;
				}
				hits.push(now);
				true
			}
			Backend::SharedKv { buckets } => {
				let window_index =
					self.epoch.elapsed().as_secs() / self.window.as_secs().max(1);
				let mut buckets = buckets.lock().expect("Rate limit lock poisoned. qed.");

				// Old window buckets are what a KV TTL would have expired.
				buckets.retain(|_, (index, _)| *index + 1 >= window_index);

				let key = format!("{}#{}", identity, window_index);
				let entry = buckets.entry(key).or_insert((window_index, 0));
				if entry.1 >= self.max_per_window {
					return false;
				}
				entry.1 += 1;
				true
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_separates_keys_on_one_ip() {
		let a = identity("203.0.113.20", Some("key-a"));
		let b = identity("203.0.113.20", Some("key-b"));
		let none = identity("203.0.113.20", None);
		assert_ne!(a, b);
		assert_ne!(a, none);
		assert!(a.starts_with("203.0.113.20|"));
	}

	#[test]
	fn over_budget_is_rejected() {
		let limiter = RateLimiter::new(
			RateLimitBackend::Memory,
			Duration::from_secs(60),
			1,
		);
		let id = identity("203.0.113.5", None);
		assert!(limiter.check(&id));
		assert!(!limiter.check(&id));
	}

	#[test]
	fn budgets_are_per_identity() {
		let limiter = RateLimiter::new(
			RateLimitBackend::Memory,
			Duration::from_secs(60),
			1,
		);
		let a = identity("203.0.113.20", Some("key-a"));
		let b = identity("203.0.113.20", Some("key-b"));
		assert!(limiter.check(&a));
		// Same IP, different key: independent budget.
		assert!(limiter.check(&b));
		assert!(!limiter.check(&a));
	}

	#[test]
	fn window_expiry_restores_budget() {
		let limiter = RateLimiter::new(
			RateLimitBackend::Memory,
			Duration::from_millis(30),
			1,
		);
		let id = identity("203.0.113.5", None);
		assert!(limiter.check(&id));
		assert!(!limiter.check(&id));
		std::thread::sleep(Duration::from_millis(40));
		assert!(limiter.check(&id));
	}

	#[test]
	fn stale_identities_are_pruned_by_any_request() {
		let limiter = RateLimiter::new(
			RateLimitBackend::Memory,
			Duration::from_millis(20),
			10,
		);
		let stale = identity("198.51.100.10", None);
		assert!(limiter.check(&stale));
		std::thread::sleep(Duration::from_millis(30));

		// A request from an unrelated identity prunes the stale one.
		let fresh = identity("203.0.113.5", None);
		assert!(limiter.check(&fresh));

		if let Backend::Memory { store } = &limiter.backend {
			let store = store.lock().unwrap();
			assert!(!store.contains_key(&stale));
			assert!(store.contains_key(&fresh));
		}
	}

	#[test]
	fn shared_kv_backend_enforces_budget() {
		let limiter = RateLimiter::new(
			RateLimitBackend::SharedKv,
			Duration::from_secs(60),
			2,
		);
		let id = identity("203.0.113.5", Some("key"));
		assert!(limiter.check(&id));
		assert!(limiter.check(&id));
		assert!(!limiter.check(&id));
	}
}
