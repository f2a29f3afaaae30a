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

//! In-process domain intelligence cache.
//!
//! Caches MX lookups (24h TTL) and catch-all status (7d TTL) so batches of
//! addresses at the same domain don't repeat the expensive probes.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::mx::MxDetails;

pub const MX_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const CATCH_ALL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Default)]
struct DomainEntry {
	dns_info: Option<MxDetails>,
	dns_cached_at: Option<Instant>,
	is_catch_all: Option<bool>,
	catch_all_cached_at: Option<Instant>,
}

impl DomainEntry {
	fn dns_live(&self, now: Instant, ttl: Duration) -> bool {
		match (self.dns_info.as_ref(), self.dns_cached_at) {
			(Some(_), Some(at)) => now.duration_since(at) <= ttl,
			_ => false,
		}
	}

	fn catch_all_live(&self, now: Instant, ttl: Duration) -> bool {
		match self.catch_all_cached_at {
			Some(at) => now.duration_since(at) <= ttl,
			None => false,
		}
	}
}

/// Live-entry totals as reported by [DomainCache::stats].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DomainCacheStats {
	pub total_domains: usize,
	pub dns_cached: usize,
	pub catch_all_cached: usize,
	pub catch_all_domains: usize,
}

/// Read-mostly cache keyed by lower-cased domain; writes go behind one
/// lightweight mutex. Expired entries are dropped on read.
#[derive(Debug)]
pub struct DomainCache {
	entries: Mutex<HashMap<String, DomainEntry>>,
	mx_ttl: Duration,
	catch_all_ttl: Duration,
}

impl Default for DomainCache {
	fn default() -> Self {
		Self::new(MX_TTL, CATCH_ALL_TTL)
	}
}

impl DomainCache {
	pub fn new(mx_ttl: Duration, catch_all_ttl: Duration) -> Self {
		DomainCache {
			entries: Mutex::new(HashMap::new()),
			mx_ttl,
			catch_all_ttl,
		}
	}

	/// Cached DNS info for a domain, when present and not expired.
	pub fn get_dns(&self, domain: &str) -> Option<MxDetails> {
		let domain = domain.to_lowercase();
		let now = Instant::now();
		let mut entries = self.entries.lock().expect("Domain cache lock poisoned. qed.");
		let entry = entries.get_mut(&domain)?;
		if !entry.dns_live(now, self.mx_ttl) {
			entry.dns_info = None;
			entry.dns_cached_at = None;
			return None;
		}
		entry.dns_info.clone()
	}

	pub fn set_dns(&self, domain: &str, dns_info: MxDetails) {
		let domain = domain.to_lowercase();
		let mut entries = self.entries.lock().expect("Domain cache lock poisoned. qed.");
		let entry = entries.entry(domain).or_default();
		entry.dns_info = Some(dns_info);
		entry.dns_cached_at = Some(Instant::now());
	}

	/// Whether catch-all status is cached and fresh. The cached value may
	/// itself be `None` (indeterminate probe); this distinguishes "cached
	/// as indeterminate" from "not cached".
	pub fn has_catch_all(&self, domain: &str) -> bool {
		let domain = domain.to_lowercase();
		let now = Instant::now();
		let entries = self.entries.lock().expect("Domain cache lock poisoned. qed.");
		entries
			.get(&domain)
			.map(|e| e.catch_all_live(now, self.catch_all_ttl))
			.unwrap_or(false)
	}

	/// Cached catch-all tri-state, when fresh.
	pub fn get_catch_all(&self, domain: &str) -> Option<bool> {
		let domain = domain.to_lowercase();
		let now = Instant::now();
		let mut entries = self.entries.lock().expect("Domain cache lock poisoned. qed.");
		let entry = entries.get_mut(&domain)?;
		if !entry.catch_all_live(now, self.catch_all_ttl) {
			entry.catch_all_cached_at = None;
			return None;
		}
		entry.is_catch_all
	}

	pub fn set_catch_all(&self, domain: &str, is_catch_all: Option<bool>) {
		let domain = domain.to_lowercase();
		let mut entries = self.entries.lock().expect("Domain cache lock poisoned. qed.");
		let entry = entries.entry(domain).or_default();
		entry.is_catch_all = is_catch_all;
		entry.catch_all_cached_at = Some(Instant::now());
	}

	pub fn stats(&self) -> DomainCacheStats {
		let now = Instant::now();
		let entries = self.entries.lock().expect("Domain cache lock poisoned. qed.");
		let total_domains = entries.len();
		let dns_cached = entries
			.values()
			.filter(|e| e.dns_live(now, self.mx_ttl))
			.count();
		let catch_all_cached = entries
			.values()
			.filter(|e| e.catch_all_live(now, self.catch_all_ttl))
			.count();
		let catch_all_domains = entries
			.values()
			.filter(|e| e.catch_all_live(now, self.catch_all_ttl) && e.is_catch_all == Some(true))
			.count();

		DomainCacheStats {
			total_domains,
			dns_cached,
			catch_all_cached,
			catch_all_domains,
		}
	}

	/// Drop entries whose DNS and catch-all data have both expired.
	/// Returns how many were removed.
	pub fn clear_expired(&self) -> usize {
		let now = Instant::now();
		let mut entries = self.entries.lock().expect("Domain cache lock poisoned. qed.");
		let before = entries.len();
		entries.retain(|_, e| {
			e.dns_live(now, self.mx_ttl) || e.catch_all_live(now, self.catch_all_ttl)
		});
		before - entries.len()
	}

	pub fn clear(&self) {
		self.entries
			.lock()
			.expect("Domain cache lock poisoned. qed.")
			.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::provider::Provider;

	fn dns(domain: &str) -> MxDetails {
		MxDetails {
			mx_hosts: vec![format!("mx1.{}", domain)],
			has_mx: true,
			provider: Provider::Generic,
			domain: domain.to_string(),
		}
	}

	#[test]
	fn caches_dns_by_lowercased_domain() {
		let cache = DomainCache::default();
		cache.set_dns("Example.COM", dns("example.com"));
		let got = cache.get_dns("example.com").unwrap();
		assert_eq!(got.mx_hosts, vec!["mx1.example.com"]);
	}

	#[test]
	fn expired_dns_entries_are_dropped_on_read() {
		let cache = DomainCache::new(Duration::from_millis(0), CATCH_ALL_TTL);
		cache.set_dns("example.com", dns("example.com"));
		std::thread::sleep(Duration::from_millis(5));
		assert!(cache.get_dns("example.com").is_none());
	}

	#[test]
	fn catch_all_tri_state_roundtrips() {
		let cache = DomainCache::default();
		assert!(!cache.has_catch_all("example.com"));

		cache.set_catch_all("example.com", Some(true));
		assert!(cache.has_catch_all("example.com"));
		assert_eq!(cache.get_catch_all("example.com"), Some(true));

		// Indeterminate is cached too, distinguishable via has_catch_all.
		cache.set_catch_all("other.com", None);
		assert!(cache.has_catch_all("other.com"));
		assert_eq!(cache.get_catch_all("other.com"), None);
	}

	#[test]
	fn stats_count_live_entries() {
		let cache = DomainCache::default();
		cache.set_dns("a.com", dns("a.com"));
		cache.set_catch_all("a.com", Some(true));
		cache.set_catch_all("b.com", Some(false));

		let stats = cache.stats();
		assert_eq!(stats.total_domains, 2);
		assert_eq!(stats.dns_cached, 1);
		assert_eq!(stats.catch_all_cached, 2);
		assert_eq!(stats.catch_all_domains, 1);
	}

	#[test]
	fn clear_expired_removes_dead_entries() {
		let cache = DomainCache::new(Duration::from_millis(0), Duration::from_millis(0));
		cache.set_dns("a.com", dns("a.com"));
		cache.set_catch_all("b.com", Some(true));
		std::thread::sleep(Duration::from_millis(5));
		assert_eq!(cache.clear_expired(), 2);
		assert_eq!(cache.stats().total_domains, 0);
	}
}
