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

//! Embedded single-file store on SQLite (WAL mode).
//!
//! Writers serialize through a single mutex; every 100 upserts the WAL is
//! checkpointed to keep the sidecar file bounded. On open, the schema is
//! reconciled column-by-column so older database files keep working.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use kadenverify::provider::Provider;
use kadenverify::{Reachability, VerificationResult};

use super::{
	parse_verified_at, store_key, DomainCount, QueryOptions, StoreError, StoreFilter,
	StoreStats, VerificationStore,
};

const TABLE: &str = "verified_emails";

/// Upserts between WAL checkpoints.
const CHECKPOINT_EVERY: u64 = 100;

/// Declared schema: (column, type, required). Required columns are
/// synthesized when an existing file lacks them.
const COLUMNS: &[(&str, &str, bool)] = &[
	("email", "TEXT PRIMARY KEY", true),
	("normalized", "TEXT", true),
	("reachability", "TEXT", true),
	("is_deliverable", "BOOLEAN", false),
	("is_catch_all", "BOOLEAN", false),
	("is_disposable", "BOOLEAN", false),
	("is_role", "BOOLEAN", false),
	("is_free", "BOOLEAN", false),
	("mx_host", "TEXT", false),
	("smtp_code", "INTEGER", false),
	("smtp_message", "TEXT", false),
	("provider", "TEXT", true),
	("domain", "TEXT", true),
	("verified_at", "TEXT", true),
	("error", "TEXT", false),
];

pub struct SqliteStore {
	pool: SqlitePool,
	write_lock: Mutex<()>,
	upserts: AtomicU64,
}

impl SqliteStore {
	/// Open (creating if missing) the store at `path` and reconcile the
	/// schema.
	pub async fn open(path: &str) -> Result<Self, StoreError> {
		let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
			.map_err(StoreError::Database)?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal);

		let pool = SqlitePoolOptions::new()
			.max_connections(4)
			.connect_with(options)
			.await?;

		let store = SqliteStore {
			pool,
			write_lock: Mutex::new(()),
			upserts: AtomicU64::new(0),
		};
		store.migrate().await?;
		Ok(store)
	}

	/// Create the table and indexes; add any missing declared columns and
	/// synthesize required values for pre-existing rows.
	async fn migrate(&self) -> Result<(), StoreError> {
		let column_defs = COLUMNS
			.iter()
			.map(|(name, ty, _)| format!("{} {}", name, ty))
			.collect::<Vec<_>>()
			.join(", ");
		sqlx::query(&format!(
			"CREATE TABLE IF NOT EXISTS {} ({})",
			TABLE, column_defs
		))
		.execute(&self.pool)
		.await?;

		// Columns present in the file right now.
		let rows = sqlx::query(&format!("PRAGMA table_info({})", TABLE))
			.fetch_all(&self.pool)
			.await?;
		let present: HashSet<String> = rows
			.iter()
			.filter_map(|row| row.try_get::<String, _>("name").ok())
			.collect();

		for (name, ty, required) in COLUMNS {
			if present.contains(*name) {
				continue;
			}
			// PRIMARY KEY can't be added after the fact; a file missing
			// its key column is unusable anyway.
			let ty = ty.replace(" PRIMARY KEY", "");
			sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", TABLE, name, ty))
				.execute(&self.pool)
				.await?;

			if *required {
				let fill = match *name {
					"normalized" => "LOWER(email)".to_string(),
					"reachability" => "'unknown'".to_string(),
					"provider" => "'generic'".to_string(),
					"domain" => {
						"SUBSTR(email, INSTR(email, '@') + 1)".to_string()
					}
					"verified_at" => format!("'{}'", chrono::Utc::now().to_rfc3339()),
					_ => continue,
				};
				sqlx::query(&format!(
					"UPDATE {} SET {} = {} WHERE {} IS NULL",
					TABLE, name, fill, name
				))
				.execute(&self.pool)
				.await?;
			}
		}

		for index in [
			"CREATE INDEX IF NOT EXISTS idx_ve_reachability ON verified_emails(reachability)",
			"CREATE INDEX IF NOT EXISTS idx_ve_domain ON verified_emails(domain)",
			"CREATE INDEX IF NOT EXISTS idx_ve_verified_at ON verified_emails(verified_at)",
		] {
			sqlx::query(index).execute(&self.pool).await?;
		}

		Ok(())
	}

	fn row_to_result(row: &sqlx::sqlite::SqliteRow) -> Result<VerificationResult, StoreError> {
		let verified_at: String = row.try_get("verified_at").unwrap_or_default();
		Ok(VerificationResult {
			email: row.try_get("email").unwrap_or_default(),
			normalized: row.try_get("normalized").unwrap_or_default(),
			reachability: Reachability::from_str_or_unknown(
				&row.try_get::<String, _>("reachability").unwrap_or_default(),
			),
			is_deliverable: row.try_get("is_deliverable").ok(),
			is_catch_all: row.try_get("is_catch_all").ok(),
			is_disposable: row.try_get("is_disposable").unwrap_or(false),
			is_role: row.try_get("is_role").unwrap_or(false),
			is_free: row.try_get("is_free").unwrap_or(false),
			mx_host: row.try_get("mx_host").unwrap_or_default(),
			smtp_code: row.try_get::<i64, _>("smtp_code").unwrap_or(0) as u16,
			smtp_message: row.try_get("smtp_message").unwrap_or_default(),
			provider: Provider::from_str_or_generic(
				&row.try_get::<String, _>("provider").unwrap_or_default(),
			),
			domain: row.try_get("domain").unwrap_or_default(),
			verified_at: parse_verified_at(&verified_at),
			error: row.try_get("error").ok().flatten(),
		})
	}

	async fn upsert_inner(&self, result: &VerificationResult) -> Result<(), StoreError> {
		let key = store_key(result);
		sqlx::query(
			"INSERT INTO verified_emails (
				email, normalized, reachability, is_deliverable, is_catch_all,
				is_disposable, is_role, is_free, mx_host, smtp_code,
				smtp_message, provider, domain, verified_at, error
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(email) DO UPDATE SET
				normalized = excluded.normalized,
				reachability = excluded.reachability,
				is_deliverable = excluded.is_deliverable,
				is_catch_all = excluded.is_catch_all,
				is_disposable = excluded.is_disposable,
				is_role = excluded.is_role,
				is_free = excluded.is_free,
				mx_host = excluded.mx_host,
				smtp_code = excluded.smtp_code,
				smtp_message = excluded.smtp_message,
				provider = excluded.provider,
				domain = excluded.domain,
				verified_at = excluded.verified_at,
				error = excluded.error",
		)
		.bind(&key)
		.bind(&key)
		.bind(result.reachability.as_str())
		.bind(result.is_deliverable)
		.bind(result.is_catch_all)
		.bind(result.is_disposable)
		.bind(result.is_role)
		.bind(result.is_free)
		.bind(&result.mx_host)
		.bind(result.smtp_code as i64)
		.bind(&result.smtp_message)
		.bind(result.provider.as_str())
		.bind(&result.domain)
		.bind(result.verified_at.to_rfc3339())
		.bind(&result.error)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn maybe_checkpoint(&self) {
		let n = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
		if n % CHECKPOINT_EVERY == 0 {
			if let Err(e) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
				.execute(&self.pool)
				.await
			{
				tracing::warn!(target: "kadenverify", error = %e, "WAL checkpoint failed");
			} else {
				tracing::info!(target: "kadenverify", upserts = n, "Checkpointed WAL");
			}
		}
	}

	fn filter_clause(filter: &StoreFilter) -> (String, Vec<String>) {
		let mut clauses = Vec::new();
		let mut binds = Vec::new();
		if let Some(reachability) = filter.reachability {
			clauses.push("reachability = ?".to_string());
			binds.push(reachability.as_str().to_string());
		}
		if let Some(v) = filter.is_catch_all {
			clauses.push(format!("is_catch_all = {}", if v { 1 } else { 0 }));
		}
		if let Some(v) = filter.is_disposable {
			clauses.push(format!("is_disposable = {}", if v { 1 } else { 0 }));
		}
		if let Some(domain) = &filter.domain {
			clauses.push("domain = ?".to_string());
			binds.push(domain.clone());
		}
		let clause = if clauses.is_empty() {
			String::new()
		} else {
			format!(" WHERE {}", clauses.join(" AND "))
		};
		(clause, binds)
	}
}

#[async_trait]
impl VerificationStore for SqliteStore {
	async fn lookup(&self, email: &str) -> Result<Option<VerificationResult>, StoreError> {
		let row = sqlx::query("SELECT * FROM verified_emails WHERE email = ? LIMIT 1")
			.bind(email)
			.fetch_optional(&self.pool)
			.await?;
		match row {
			Some(row) => Ok(Some(Self::row_to_result(&row)?)),
			None => Ok(None),
		}
	}

	async fn upsert(&self, result: &VerificationResult) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		self.upsert_inner(result).await?;
		self.maybe_checkpoint().await;
		Ok(())
	}

	async fn upsert_batch(
		&self,
		results: &[VerificationResult],
		chunk: usize,
	) -> Result<usize, StoreError> {
		let _guard = self.write_lock.lock().await;
		let chunk = chunk.max(1);
		let mut written = 0;
		for batch in results.chunks(chunk) {
			let mut tx = self.pool.begin().await?;
			for result in batch {
				let key = store_key(result);
				sqlx::query(
					"INSERT OR REPLACE INTO verified_emails (
						email, normalized, reachability, is_deliverable, is_catch_all,
						is_disposable, is_role, is_free, mx_host, smtp_code,
						smtp_message, provider, domain, verified_at, error
					) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
				)
				.bind(&key)
				.bind(&key)
				.bind(result.reachability.as_str())
				.bind(result.is_deliverable)
				.bind(result.is_catch_all)
				.bind(result.is_disposable)
				.bind(result.is_role)
				.bind(result.is_free)
				.bind(&result.mx_host)
				.bind(result.smtp_code as i64)
				.bind(&result.smtp_message)
				.bind(result.provider.as_str())
				.bind(&result.domain)
				.bind(result.verified_at.to_rfc3339())
				.bind(&result.error)
				.execute(&mut *tx)
				.await?;
			}
			tx.commit().await?;
			written += batch.len();
			self.upserts.fetch_add(batch.len() as u64, Ordering::SeqCst);
		}
		Ok(written)
	}

	async fn count(&self, filter: &StoreFilter) -> Result<i64, StoreError> {
		let (clause, binds) = Self::filter_clause(filter);
		let sql = format!("SELECT COUNT(*) AS n FROM verified_emails{}", clause);
		let mut query = sqlx::query(&sql);
		for bind in &binds {
			query = query.bind(bind);
		}
		let row = query.fetch_one(&self.pool).await?;
		Ok(row.try_get::<i64, _>("n").unwrap_or(0))
	}

	async fn stats(&self) -> Result<StoreStats, StoreError> {
		let total = self.count(&StoreFilter::default()).await?;

		let mut by_reachability = HashMap::new();
		let rows = sqlx::query(
			"SELECT reachability, COUNT(*) AS n FROM verified_emails GROUP BY reachability",
		)
		.fetch_all(&self.pool)
		.await?;
		for row in rows {
			let key: String = row.try_get("reachability").unwrap_or_default();
			let n: i64 = row.try_get("n").unwrap_or(0);
			by_reachability.insert(key, n);
		}

		let catch_all = self
			.count(&StoreFilter {
				is_catch_all: Some(true),
				..Default::default()
			})
			.await?;
		let disposable = self
			.count(&StoreFilter {
				is_disposable: Some(true),
				..Default::default()
			})
			.await?;

		let rows = sqlx::query(
			"SELECT domain, COUNT(*) AS n FROM verified_emails
			 GROUP BY domain ORDER BY n DESC LIMIT 20",
		)
		.fetch_all(&self.pool)
		.await?;
		let top_domains = rows
			.iter()
			.map(|row| DomainCount {
				domain: row.try_get("domain").unwrap_or_default(),
				count: row.try_get("n").unwrap_or(0),
			})
			.collect();

		Ok(StoreStats {
			total,
			by_reachability,
			catch_all,
			disposable,
			top_domains,
		})
	}

	async fn query(&self, opts: &QueryOptions) -> Result<Vec<serde_json::Value>, StoreError> {
		let (clause, binds) = Self::filter_clause(&opts.filter);

		// Order is restricted to "column" or "column.desc" over declared
		// columns so caller input never reaches raw SQL.
		let order_clause = match &opts.order {
			Some(order) => {
				let (column, desc) = match order.strip_suffix(".desc") {
					Some(column) => (column, true),
					None => (order.as_str(), false),
				};
				if COLUMNS.iter().any(|(name, _, _)| *name == column) {
					format!(
						" ORDER BY {}{}",
						column,
						if desc { " DESC" } else { "" }
					)
				} else {
					String::new()
				}
			}
			None => String::new(),
		};

		let limit = opts.limit.unwrap_or(100).min(10_000);
		let offset = opts.offset.unwrap_or(0);
		let sql = format!(
			"SELECT * FROM verified_emails{}{} LIMIT {} OFFSET {}",
			clause, order_clause, limit, offset
		);

		let mut query = sqlx::query(&sql);
		for bind in &binds {
			query = query.bind(bind);
		}
		let rows = query.fetch_all(&self.pool).await?;
		let mut out = Vec::with_capacity(rows.len());
		for row in &rows {
			let result = Self::row_to_result(row)?;
			out.push(serde_json::to_value(&result).map_err(|e| StoreError::Other(e.to_string()))?);
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	async fn memory_store() -> SqliteStore {
		// Shared-cache in-memory database, one per test.
		let options = SqliteConnectOptions::from_str("sqlite::memory:")
			.unwrap()
			.create_if_missing(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await
			.unwrap();
		let store = SqliteStore {
			pool,
			write_lock: Mutex::new(()),
			upserts: AtomicU64::new(0),
		};
		store.migrate().await.unwrap();
		store
	}

	fn sample(email: &str, reachability: Reachability) -> VerificationResult {
		let normalized = email.to_lowercase();
		let domain = normalized.split('@').nth(1).unwrap_or("").to_string();
		VerificationResult {
			email: email.to_string(),
			normalized,
			reachability,
			is_deliverable: Some(reachability == Reachability::Safe),
			domain,
			verified_at: Utc::now(),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn upsert_then_lookup_roundtrips() {
		let store = memory_store().await;
		let result = sample("user@company.com", Reachability::Safe);
		store.upsert(&result).await.unwrap();

		let fetched = store.lookup("user@company.com").await.unwrap().unwrap();
		assert_eq!(fetched.email, "user@company.com");
		assert_eq!(fetched.reachability, Reachability::Safe);
		assert_eq!(fetched.is_deliverable, Some(true));
		// Timestamps survive the round trip to the second.
		assert!((fetched.verified_at - result.verified_at).num_seconds().abs() <= 1);
	}

	#[tokio::test]
	async fn upsert_is_keyed_by_normalized_email() {
		let store = memory_store().await;
		let mut result = sample("John.Doe@Gmail.com", Reachability::Safe);
		result.normalized = "johndoe@gmail.com".to_string();
		store.upsert(&result).await.unwrap();

		// The row lives under the normalized key.
		assert!(store.lookup("johndoe@gmail.com").await.unwrap().is_some());
		assert!(store
			.lookup("John.Doe@Gmail.com")
			.await
			.unwrap()
			.is_none());

		// A second upsert with the same key replaces, not duplicates.
		let mut second = sample("JohnDoe+x@gmail.com", Reachability::Risky);
		second.normalized = "johndoe@gmail.com".to_string();
		store.upsert(&second).await.unwrap();
		assert_eq!(store.count(&StoreFilter::default()).await.unwrap(), 1);
		let fetched = store.lookup("johndoe@gmail.com").await.unwrap().unwrap();
		assert_eq!(fetched.reachability, Reachability::Risky);
	}

	#[tokio::test]
	async fn batch_upsert_and_stats() {
		let store = memory_store().await;
		let results = vec![
			sample("a@x.com", Reachability::Safe),
			sample("b@x.com", Reachability::Invalid),
			sample("c@y.com", Reachability::Safe),
		];
		let written = store.upsert_batch(&results, 2).await.unwrap();
		assert_eq!(written, 3);

		let stats = store.stats().await.unwrap();
		assert_eq!(stats.total, 3);
		assert_eq!(stats.by_reachability.get("safe"), Some(&2));
		assert_eq!(stats.by_reachability.get("invalid"), Some(&1));
		assert_eq!(stats.top_domains[0].domain, "x.com");
		assert_eq!(stats.top_domains[0].count, 2);
	}

	#[tokio::test]
	async fn count_with_filters() {
		let store = memory_store().await;
		let mut r = sample("a@x.com", Reachability::Risky);
		r.is_catch_all = Some(true);
		store.upsert(&r).await.unwrap();
		store
			.upsert(&sample("b@x.com", Reachability::Safe))
			.await
			.unwrap();

		let filter = StoreFilter {
			is_catch_all: Some(true),
			..Default::default()
		};
		assert_eq!(store.count(&filter).await.unwrap(), 1);

		let filter = StoreFilter {
			reachability: Some(Reachability::Safe),
			..Default::default()
		};
		assert_eq!(store.count(&filter).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn query_respects_order_and_limit() {
		let store = memory_store().await;
		for email in ["a@x.com", "b@x.com", "c@x.com"] {
			store
				.upsert(&sample(email, Reachability::Safe))
				.await
				.unwrap();
		}

		let rows = store
			.query(&QueryOptions {
				order: Some("email.desc".to_string()),
				limit: Some(2),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0]["email"], "c@x.com");
	}

	#[tokio::test]
	async fn migrate_synthesizes_missing_required_columns() {
		// A legacy file with a reduced schema.
		let options = SqliteConnectOptions::from_str("sqlite::memory:")
			.unwrap()
			.create_if_missing(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect_with(options)
			.await
			.unwrap();
		sqlx::query("CREATE TABLE verified_emails (email TEXT PRIMARY KEY, reachability TEXT)")
			.execute(&pool)
			.await
			.unwrap();
		sqlx::query("INSERT INTO verified_emails (email, reachability) VALUES ('old@x.com', 'safe')")
			.execute(&pool)
			.await
			.unwrap();

		let store = SqliteStore {
			pool,
			write_lock: Mutex::new(()),
			upserts: AtomicU64::new(0),
		};
		store.migrate().await.unwrap();

		let fetched = store.lookup("old@x.com").await.unwrap().unwrap();
		assert_eq!(fetched.normalized, "old@x.com");
		assert_eq!(fetched.provider, Provider::Generic);
		assert_eq!(fetched.domain, "x.com");
		assert_eq!(fetched.reachability, Reachability::Safe);
	}
}
