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

//! In-process store: a map behind a mutex. Useful for tests and
//! ephemeral single-node deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use kadenverify::{Reachability, VerificationResult};

use super::{
	store_key, DomainCount, QueryOptions, StoreError, StoreFilter, StoreStats,
	VerificationStore,
};

#[derive(Default)]
pub struct InMemoryStore {
	rows: Mutex<HashMap<String, VerificationResult>>,
}

impl InMemoryStore {
	fn matches(filter: &StoreFilter, row: &VerificationResult) -> bool {
		if let Some(reachability) = filter.reachability {
			if row.reachability != reachability {
				return false;
			}
		}
		if let Some(v) = filter.is_catch_all {
			if row.is_catch_all != Some(v) {
				return false;
			}
		}
		if let Some(v) = filter.is_disposable {
			if row.is_disposable != v {
				return false;
			}
		}
		if let Some(domain) = &filter.domain {
			if &row.domain != domain {
				return false;
			}
		}
		true
	}
}

#[async_trait]
impl VerificationStore for InMemoryStore {
	async fn lookup(&self, email: &str) -> Result<Option<VerificationResult>, StoreError> {
		Ok(self
			.rows
			.lock()
			.expect("Store lock poisoned. qed.")
			.get(email)
			.cloned())
	}

	async fn upsert(&self, result: &VerificationResult) -> Result<(), StoreError> {
		self.rows
			.lock()
			.expect("Store lock poisoned. qed.")
			.insert(store_key(result), result.clone());
		Ok(())
	}

	async fn upsert_batch(
		&self,
		results: &[VerificationResult],
		_chunk: usize,
	) -> Result<usize, StoreError> {
		let mut rows = self.rows.lock().expect("Store lock poisoned. qed.");
		for result in results {
			rows.insert(store_key(result), result.clone());
		}
		Ok(results.len())
	}

	async fn count(&self, filter: &StoreFilter) -> Result<i64, StoreError> {
		let rows = self.rows.lock().expect("Store lock poisoned. qed.");
		Ok(rows.values().filter(|r| Self::matches(filter, r)).count() as i64)
	}

	async fn stats(&self) -> Result<StoreStats, StoreError> {
		let rows = self.rows.lock().expect("Store lock poisoned. qed.");

		let mut by_reachability: HashMap<String, i64> = HashMap::new();
		let mut domains: HashMap<String, i64> = HashMap::new();
		let mut catch_all = 0;
		let mut disposable = 0;

		for row in rows.values() {
			*by_reachability
				.entry(row.reachability.as_str().to_string())
				.or_insert(0) += 1;
			*domains.entry(row.domain.clone()).or_insert(0) += 1;
			if row.is_catch_all == Some(true) {
				catch_all += 1;
			}
			if row.is_disposable {
				disposable += 1;
			}
		}

		let mut top_domains: Vec<DomainCount> = domains
			.into_iter()
			.map(|(domain, count)| DomainCount { domain, count })
			.collect();
		top_domains.sort_by(|a, b| b.count.cmp(&a.count).then(a.domain.cmp(&b.domain)));
		top_domains.truncate(20);

		Ok(StoreStats {
			total: rows.len() as i64,
			by_reachability,
			catch_all,
			disposable,
			top_domains,
		})
	}

	async fn query(&self, opts: &QueryOptions) -> Result<Vec<serde_json::Value>, StoreError> {
		let rows = self.rows.lock().expect("Store lock poisoned. qed.");
		let mut matched: Vec<&VerificationResult> = rows
			.values()
			.filter(|r| Self::matches(&opts.filter, r))
			.collect();
		matched.sort_by(|a, b| a.normalized.cmp(&b.normalized));
		if opts.order.as_deref() == Some("verified_at.desc") {
			matched.sort_by(|a, b| b.verified_at.cmp(&a.verified_at));
		}

		let offset = opts.offset.unwrap_or(0) as usize;
		let limit = opts.limit.unwrap_or(100) as usize;
		matched
			.into_iter()
			.skip(offset)
			.take(limit)
			.map(|r| serde_json::to_value(r).map_err(|e| StoreError::Other(e.to_string())))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	fn sample(email: &str, reachability: Reachability) -> VerificationResult {
		VerificationResult {
			email: email.to_string(),
			normalized: email.to_lowercase(),
			reachability,
			domain: email.split('@').nth(1).unwrap_or("").to_lowercase(),
			verified_at: Utc::now(),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn upsert_lookup_roundtrip_is_equal() {
		let store = InMemoryStore::default();
		let result = sample("user@x.com", Reachability::Safe);
		store.upsert(&result).await.unwrap();
		let fetched = store.lookup("user@x.com").await.unwrap().unwrap();
		assert_eq!(fetched, result);
	}

	#[tokio::test]
	async fn stats_aggregate() {
		let store = InMemoryStore::default();
		store.upsert(&sample("a@x.com", Reachability::Safe)).await.unwrap();
		store.upsert(&sample("b@x.com", Reachability::Safe)).await.unwrap();
		store.upsert(&sample("c@y.com", Reachability::Unknown)).await.unwrap();

		let stats = store.stats().await.unwrap();
		assert_eq!(stats.total, 3);
		assert_eq!(stats.by_reachability.get("safe"), Some(&2));
		assert_eq!(stats.top_domains[0].domain, "x.com");
	}
}
