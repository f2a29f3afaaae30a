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

//! Remote PostgREST-style table store.
//!
//! Upserts go through `POST /{table}?on_conflict=email` with
//! `Prefer: resolution=merge-duplicates`; counts use `Prefer: count=exact`
//! with a 0-0 Range and read the Content-Range total.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use kadenverify::provider::Provider;
use kadenverify::{Reachability, VerificationResult};

use super::{
	parse_verified_at, store_key, QueryOptions, StoreError, StoreFilter, StoreStats,
	VerificationStore,
};

pub struct RestTableStore {
	client: reqwest::Client,
	rest_url: String,
	api_key: String,
	table: String,
}

impl RestTableStore {
	pub fn new(base_url: String, api_key: String, table: String) -> Self {
		RestTableStore {
			client: reqwest::Client::builder()
				.timeout(Duration::from_secs(5))
				.build()
				.unwrap_or_default(),
			rest_url: format!("{}/rest/v1", base_url.trim_end_matches('/')),
			api_key,
			table,
		}
	}

	fn table_url(&self) -> String {
		format!("{}/{}", self.rest_url, self.table)
	}

	fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
		self.client
			.request(method, url)
			.header("apikey", &self.api_key)
			.header("Authorization", format!("Bearer {}", self.api_key))
			.header("Content-Type", "application/json")
	}

	async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
		let status = response.status();
		if !status.is_success() {
			// Never echo headers (the key) into error strings.
			let text = response.text().await.unwrap_or_default();
			let text: String = text.chars().take(500).collect();
			return Err(StoreError::Rest(status.as_u16(), text));
		}
		Ok(response)
	}

	/// Parse "0-0/123" or "*/0" into the total.
	fn parse_content_range_total(content_range: Option<&str>) -> Option<i64> {
		let content_range = content_range?;
		let total = content_range.split('/').nth(1)?.trim();
		total.parse().ok()
	}

	fn filter_params(filter: &StoreFilter) -> Vec<(String, String)> {
		let mut params = Vec::new();
		if let Some(reachability) = filter.reachability {
			params.push((
				"reachability".to_string(),
				format!("eq.{}", reachability.as_str()),
			));
		}
		if let Some(v) = filter.is_catch_all {
			params.push((
				"is_catch_all".to_string(),
				format!("is.{}", v),
			));
		}
		if let Some(v) = filter.is_disposable {
			params.push((
				"is_disposable".to_string(),
				format!("is.{}", v),
			));
		}
		if let Some(domain) = &filter.domain {
			params.push(("domain".to_string(), format!("eq.{}", domain)));
		}
		params
	}

	fn row_to_result(row: &serde_json::Value) -> VerificationResult {
		let s = |key: &str| row[key].as_str().unwrap_or_default().to_string();
		let b = |key: &str| row[key].as_bool();
		VerificationResult {
			email: s("email"),
			normalized: s("normalized"),
			reachability: Reachability::from_str_or_unknown(&s("reachability")),
			is_deliverable: b("is_deliverable"),
			is_catch_all: b("is_catch_all"),
			is_disposable: b("is_disposable").unwrap_or(false),
			is_role: b("is_role").unwrap_or(false),
			is_free: b("is_free").unwrap_or(false),
			mx_host: s("mx_host"),
			smtp_code: row["smtp_code"].as_u64().unwrap_or(0) as u16,
			smtp_message: s("smtp_message"),
			provider: Provider::from_str_or_generic(&s("provider")),
			domain: s("domain"),
			verified_at: parse_verified_at(&s("verified_at")),
			error: row["error"].as_str().map(|s| s.to_string()),
		}
	}

	fn result_to_row(result: &VerificationResult) -> serde_json::Value {
		let key = store_key(result);
		json!({
			"email": key,
			"normalized": key,
			"reachability": result.reachability.as_str(),
			"is_deliverable": result.is_deliverable,
			"is_catch_all": result.is_catch_all,
			"is_disposable": result.is_disposable,
			"is_role": result.is_role,
			"is_free": result.is_free,
			"mx_host": result.mx_host,
			"smtp_code": result.smtp_code,
			"smtp_message": result.smtp_message,
			"provider": result.provider.as_str(),
			"domain": result.domain,
			"verified_at": result.verified_at.to_rfc3339(),
			"error": result.error,
		})
	}
}

#[async_trait]
impl VerificationStore for RestTableStore {
	async fn lookup(&self, email: &str) -> Result<Option<VerificationResult>, StoreError> {
		let email_filter = format!("eq.{}", email);
		let response = self
			.request(reqwest::Method::GET, &self.table_url())
			.query(&[
				("select", "*"),
				("email", email_filter.as_str()),
				("limit", "1"),
			])
			.send()
			.await?;
		let response = Self::check(response).await?;
		let payload: serde_json::Value = response.json().await?;

		let row = match &payload {
			serde_json::Value::Array(rows) => rows.first().cloned(),
			serde_json::Value::Null => None,
			other => Some(other.clone()),
		};
		Ok(row.map(|row| Self::row_to_result(&row)))
	}

	async fn upsert(&self, result: &VerificationResult) -> Result<(), StoreError> {
		self.upsert_batch(std::slice::from_ref(result), 1).await?;
		Ok(())
	}

	async fn upsert_batch(
		&self,
		results: &[VerificationResult],
		chunk: usize,
	) -> Result<usize, StoreError> {
		if results.is_empty() {
			return Ok(0);
		}
		let chunk = chunk.max(1);
		let mut written = 0;
		for batch in results.chunks(chunk) {
			let payload: Vec<serde_json::Value> =
				batch.iter().map(Self::result_to_row).collect();
			let response = self
				.request(reqwest::Method::POST, &self.table_url())
				.header("Prefer", "resolution=merge-duplicates,return=minimal")
				.query(&[("on_conflict", "email")])
				.json(&payload)
				.send()
				.await?;
			Self::check(response).await?;
			written += batch.len();
		}
		Ok(written)
	}

	async fn count(&self, filter: &StoreFilter) -> Result<i64, StoreError> {
		let mut params = vec![("select".to_string(), "email".to_string())];
		params.extend(Self::filter_params(filter));

		let response = self
			.request(reqwest::Method::GET, &self.table_url())
			.header("Prefer", "count=exact")
			.header("Range", "0-0")
			.query(&params)
			.send()
			.await?;
		let response = Self::check(response).await?;

		let content_range = response
			.headers()
			.get("content-range")
			.and_then(|v| v.to_str().ok())
			.map(|s| s.to_string());
		if let Some(total) = Self::parse_content_range_total(content_range.as_deref()) {
			return Ok(total);
		}

		// Shouldn't happen with count=exact; infer from the payload.
		let payload: serde_json::Value = response.json().await?;
		Ok(match payload {
			serde_json::Value::Array(rows) => rows.len() as i64,
			serde_json::Value::Null => 0,
			_ => 1,
		})
	}

	async fn stats(&self) -> Result<StoreStats, StoreError> {
		let total = self.count(&StoreFilter::default()).await?;

		let mut by_reachability = HashMap::new();
		for reachability in [
			Reachability::Safe,
			Reachability::Risky,
			Reachability::Invalid,
			Reachability::Unknown,
		] {
			let n = self
				.count(&StoreFilter {
					reachability: Some(reachability),
					..Default::default()
				})
				.await?;
			by_reachability.insert(reachability.as_str().to_string(), n);
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

		// Top domains needs server-side aggregation; left empty until an
		// RPC exists for it.
		Ok(StoreStats {
			total,
			by_reachability,
			catch_all,
			disposable,
			top_domains: Vec::new(),
		})
	}

	async fn query(&self, opts: &QueryOptions) -> Result<Vec<serde_json::Value>, StoreError> {
		let mut params = vec![("select".to_string(), "*".to_string())];
		params.extend(Self::filter_params(&opts.filter));
		if let Some(order) = &opts.order {
			params.push(("order".to_string(), order.clone()));
		}
		if let Some(limit) = opts.limit {
			params.push(("limit".to_string(), limit.to_string()));
		}
		if let Some(offset) = opts.offset {
			params.push(("offset".to_string(), offset.to_string()));
		}

		let response = self
			.request(reqwest::Method::GET, &self.table_url())
			.query(&params)
			.send()
			.await?;
		let response = Self::check(response).await?;
		let payload: serde_json::Value = response.json().await?;
		Ok(match payload {
			serde_json::Value::Array(rows) => rows,
			serde_json::Value::Null => Vec::new(),
			other => vec![other],
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	#[test]
	fn content_range_parsing() {
		assert_eq!(
			RestTableStore::parse_content_range_total(Some("0-0/123")),
			Some(123)
		);
		assert_eq!(
			RestTableStore::parse_content_range_total(Some("*/0")),
			Some(0)
		);
		assert_eq!(RestTableStore::parse_content_range_total(Some("junk")), None);
		assert_eq!(RestTableStore::parse_content_range_total(None), None);
	}

	#[test]
	fn rows_roundtrip_through_json() {
		let result = VerificationResult {
			email: "John.Doe@Gmail.com".into(),
			normalized: "johndoe@gmail.com".into(),
			reachability: Reachability::Risky,
			is_deliverable: Some(true),
			is_catch_all: Some(false),
			is_role: true,
			mx_host: "mx.x.com".into(),
			smtp_code: 250,
			provider: Provider::Gmail,
			domain: "gmail.com".into(),
			verified_at: Utc::now(),
			..Default::default()
		};

		let row = RestTableStore::result_to_row(&result);
		// Rows are keyed by the normalized address.
		assert_eq!(row["email"], "johndoe@gmail.com");

		let parsed = RestTableStore::row_to_result(&row);
		assert_eq!(parsed.reachability, Reachability::Risky);
		assert_eq!(parsed.provider, Provider::Gmail);
		assert_eq!(parsed.smtp_code, 250);
		assert_eq!(parsed.is_deliverable, Some(true));
		assert_eq!(parsed.is_catch_all, Some(false));
		assert!(parsed.is_role);
	}

	#[test]
	fn filter_params_shape() {
		let params = RestTableStore::filter_params(&StoreFilter {
			reachability: Some(Reachability::Safe),
			is_catch_all: Some(true),
			..Default::default()
		});
		assert!(params.contains(&("reachability".to_string(), "eq.safe".to_string())));
		assert!(params.contains(&("is_catch_all".to_string(), "is.true".to_string())));
	}
}
