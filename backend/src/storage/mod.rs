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

//! The persistent verification store.
//!
//! Two production backends (embedded SQLite file, remote PostgREST table)
//! plus an in-memory map, all behind one trait. The tiered engine consumes
//! the store only through the injected cache capability and never depends
//! on which backend is active.

pub mod memory;
pub mod rest;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use kadenverify::tiered::VerificationCache;
use kadenverify::{Reachability, VerificationResult};

use crate::config::{BackendConfig, CacheBackend};

/// Error from a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("rest error: status={0} {1}")]
	Rest(u16, String),
	#[error("{0}")]
	Other(String),
}

/// Filter for count/query operations.
#[derive(Debug, Default, Clone)]
pub struct StoreFilter {
	pub reachability: Option<Reachability>,
	pub is_catch_all: Option<bool>,
	pub is_disposable: Option<bool>,
	pub domain: Option<String>,
}

/// Options for the generic query operation.
#[derive(Debug, Default, Clone)]
pub struct QueryOptions {
	pub filter: StoreFilter,
	/// Column to order by, e.g. "verified_at.desc".
	pub order: Option<String>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainCount {
	pub domain: String,
	pub count: i64,
}

/// Backend-agnostic statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
	pub total: i64,
	pub by_reachability: HashMap<String, i64>,
	pub catch_all: i64,
	pub disposable: i64,
	pub top_domains: Vec<DomainCount>,
}

/// Contract shared by every store backend.
#[async_trait]
pub trait VerificationStore: Send + Sync {
	/// Fetch by normalized email key.
	async fn lookup(&self, email: &str) -> Result<Option<VerificationResult>, StoreError>;
	/// Upsert one row, keyed by normalized email.
	async fn upsert(&self, result: &VerificationResult) -> Result<(), StoreError>;
	/// Upsert many rows in chunks; returns the number submitted.
	async fn upsert_batch(
		&self,
		results: &[VerificationResult],
		chunk: usize,
	) -> Result<usize, StoreError>;
	async fn count(&self, filter: &StoreFilter) -> Result<i64, StoreError>;
	async fn stats(&self) -> Result<StoreStats, StoreError>;
	async fn query(&self, opts: &QueryOptions) -> Result<Vec<serde_json::Value>, StoreError>;
}

/// Parse a stored timestamp. Backends that persisted naive timestamps are
/// read as UTC, so freshness comparisons stay timezone-insensitive.
pub fn parse_verified_at(raw: &str) -> DateTime<Utc> {
	if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
		return parsed.with_timezone(&Utc);
	}
	for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
		if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
			return Utc.from_utc_datetime(&naive);
		}
	}
	Utc::now()
}

/// The normalized store key for a result row.
pub fn store_key(result: &VerificationResult) -> String {
	if result.normalized.is_empty() {
		result.email.trim().to_lowercase()
	} else {
		result.normalized.clone()
	}
}

/// Bridges the store into the tiered engine's cache capability.
pub struct StoreCache {
	store: Arc<dyn VerificationStore>,
}

impl StoreCache {
	pub fn new(store: Arc<dyn VerificationStore>) -> Self {
		StoreCache { store }
	}
}

#[async_trait]
impl VerificationCache for StoreCache {
	async fn lookup(&self, email: &str) -> anyhow::Result<Option<VerificationResult>> {
		Ok(self.store.lookup(email).await?)
	}

	async fn update(&self, result: &VerificationResult) -> anyhow::Result<()> {
		Ok(self.store.upsert(result).await?)
	}
}

/// Construct the configured store backend.
pub async fn make_store(config: &BackendConfig) -> anyhow::Result<Arc<dyn VerificationStore>> {
	match config.cache_backend {
		CacheBackend::Embedded => {
			let store = sqlite::SqliteStore::open(&config.db_path).await?;
			Ok(Arc::new(store))
		}
		CacheBackend::RemoteRest => {
			let url = config
				.rest_url
				.clone()
				.ok_or_else(|| anyhow::anyhow!("remote_rest backend requires KADENVERIFY_REST_URL"))?;
			let key = config
				.rest_key
				.clone()
				.ok_or_else(|| anyhow::anyhow!("remote_rest backend requires KADENVERIFY_REST_KEY"))?;
			Ok(Arc::new(rest::RestTableStore::new(
				url,
				key,
				config.rest_table.clone(),
			)))
		}
		CacheBackend::InMemory => Ok(Arc::new(memory::InMemoryStore::default())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rfc3339_timestamps_parse() {
		let parsed = parse_verified_at("2025-06-01T10:00:00+00:00");
		assert_eq!(parsed.timezone(), Utc);
		assert_eq!(parsed.to_rfc3339(), "2025-06-01T10:00:00+00:00");
	}

	#[test]
	fn naive_timestamps_are_read_as_utc() {
		let parsed = parse_verified_at("2025-06-01 10:00:00");
		assert_eq!(parsed.to_rfc3339(), "2025-06-01T10:00:00+00:00");

		let parsed = parse_verified_at("2025-06-01T10:00:00.123");
		assert_eq!(parsed.timestamp(), 1748772000);
	}

	#[test]
	fn store_key_prefers_normalized() {
		let mut result = VerificationResult {
			email: "John.Doe@Gmail.com".into(),
			normalized: "johndoe@gmail.com".into(),
			..Default::default()
		};
		assert_eq!(store_key(&result), "johndoe@gmail.com");

		result.normalized = String::new();
		assert_eq!(store_key(&result), "john.doe@gmail.com");
	}
}
