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

//! Process metrics: endpoint latencies (bounded ring, p50/p95), per-tier
//! counters and latencies, cache hit/miss, 429 count, SMTP failure
//! reasons and the enrichment spend total. One registry, one lock.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kadenverify::tiered::{EventSink, VerifyEvent};
use kadenverify::Reachability;

/// Samples kept per latency ring.
const RING_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
struct LatencyRing {
	samples: Vec<f64>,
	next: usize,
}

impl LatencyRing {
	fn observe(&mut self, millis: f64) {
		if self.samples.len() < RING_CAPACITY {
			self.samples.push(millis);
		} else {
			self.samples[self.next] = millis;
			self.next = (self.next + 1) % RING_CAPACITY;
		}
	}

	fn percentile(&self, p: f64) -> f64 {
		if self.samples.is_empty() {
			return 0.0;
		}
		let mut sorted = self.samples.clone();
		sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
		let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
		sorted[rank.min(sorted.len() - 1)]
	}

	fn count(&self) -> usize {
		self.samples.len()
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
	pub count: usize,
	pub p50_ms: f64,
	pub p95_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierSummary {
	pub count: u64,
	pub p50_ms: f64,
	pub p95_ms: f64,
}

/// Snapshot returned by `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
	pub endpoints: HashMap<String, LatencySummary>,
	pub tiers: HashMap<String, TierSummary>,
	pub cache_hits: u64,
	pub cache_misses: u64,
	pub rate_limited_429: u64,
	pub smtp_failure_reasons: HashMap<String, u64>,
	pub enrichment_spend_usd: f64,
}

#[derive(Default)]
struct Inner {
	endpoints: HashMap<String, LatencyRing>,
	tier_counts: HashMap<u8, u64>,
	tier_latency: HashMap<u8, LatencyRing>,
	cache_hits: u64,
	cache_misses: u64,
	rate_limited_429: u64,
	smtp_failure_reasons: HashMap<String, u64>,
	enrichment_spend_usd: f64,
}

/// The process-wide metrics registry. Constructed at startup and passed
/// down explicitly.
#[derive(Default)]
pub struct MetricsRegistry {
	inner: Mutex<Inner>,
}

impl MetricsRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn observe_endpoint(&self, endpoint: &str, elapsed: Duration) {
		let mut inner = self.inner.lock().expect("Metrics lock poisoned. qed.");
		inner
			.endpoints
			.entry(endpoint.to_string())
			.or_default()
			.observe(elapsed.as_secs_f64() * 1000.0);
	}

	pub fn incr_rate_limited(&self) {
		let mut inner = self.inner.lock().expect("Metrics lock poisoned. qed.");
		inner.rate_limited_429 += 1;
	}

	/// Classify a terminal result into the SMTP-failure histogram bucket.
	fn failure_reason(
		reachability: Reachability,
		smtp_code: u16,
		error: Option<&str>,
	) -> Option<String> {
		if let Some(error) = error {
			if error.starts_with("syntax:") {
				return Some("syntax_invalid".to_string());
			}
			if error.contains("no MX or A records") {
				return Some("dns_no_mx".to_string());
			}
			if error == "role_account_filtered" {
				return Some("role_account_filtered".to_string());
			}
		}
		if reachability == Reachability::Unknown && smtp_code == 0 {
			return Some("smtp_connection_or_timeout".to_string());
		}
		if (400..500).contains(&smtp_code) {
			return Some("smtp_4xx_temp_failure".to_string());
		}
		if (500..600).contains(&smtp_code) && reachability == Reachability::Invalid {
			return Some("smtp_5xx_rejection".to_string());
		}
		None
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		let inner = self.inner.lock().expect("Metrics lock poisoned. qed.");

		let endpoints = inner
			.endpoints
			.iter()
			.map(|(endpoint, ring)| {
				(
					endpoint.clone(),
					LatencySummary {
						count: ring.count(),
						p50_ms: ring.percentile(0.50),
						p95_ms: ring.percentile(0.95),
					},
				)
			})
			.collect();

		let tiers = inner
			.tier_counts
			.iter()
			.map(|(tier, count)| {
				let ring = inner.tier_latency.get(tier);
				(
					format!("tier_{}", tier),
					TierSummary {
						count: *count,
						p50_ms: ring.map(|r| r.percentile(0.50)).unwrap_or(0.0),
						p95_ms: ring.map(|r| r.percentile(0.95)).unwrap_or(0.0),
					},
				)
			})
			.collect();

		MetricsSnapshot {
			endpoints,
			tiers,
			cache_hits: inner.cache_hits,
			cache_misses: inner.cache_misses,
			rate_limited_429: inner.rate_limited_429,
			smtp_failure_reasons: inner.smtp_failure_reasons.clone(),
			enrichment_spend_usd: inner.enrichment_spend_usd,
		}
	}
}

impl EventSink for MetricsRegistry {
	fn emit(&self, event: VerifyEvent) {
		let mut inner = self.inner.lock().expect("Metrics lock poisoned. qed.");
		match event {
			VerifyEvent::CacheLookup { hit } => {
				if hit {
					inner.cache_hits += 1;
				} else {
					inner.cache_misses += 1;
				}
			}
			VerifyEvent::VerificationResult {
				tier,
				enrichment_cost,
				reachability,
				smtp_code,
				error,
				elapsed,
				..
			} => {
				*inner.tier_counts.entry(tier).or_insert(0) += 1;
				inner
					.tier_latency
					.entry(tier)
					.or_default()
					.observe(elapsed.as_secs_f64() * 1000.0);
				inner.enrichment_spend_usd += enrichment_cost;
				if let Some(reason) =
					Self::failure_reason(reachability, smtp_code, error.as_deref())
				{
					*inner.smtp_failure_reasons.entry(reason).or_insert(0) += 1;
				}
			}
		}
	}
}
