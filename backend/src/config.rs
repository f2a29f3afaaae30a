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

//! Backend configuration, read from `KADENVERIFY_*` environment variables.

use serde::Deserialize;

use kadenverify::tiered::RoleAccountFilter;

/// Which persistent store backs the verification cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
	/// Embedded single-file SQLite store (the default).
	Embedded,
	/// Remote PostgREST-style table.
	RemoteRest,
	/// In-process map; useful for tests and ephemeral deployments.
	#[serde(rename = "in_memory_kv", alias = "in_memory")]
	InMemory,
}

impl Default for CacheBackend {
	fn default() -> Self {
		CacheBackend::Embedded
	}
}

/// Which rate-limit state backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
	/// Per-identity sliding window in process memory.
	Memory,
	/// Fixed window buckets in a shared key-value map.
	SharedKv,
}

impl Default for RateLimitBackend {
	fn default() -> Self {
		RateLimitBackend::Memory
	}
}

fn default_http_host() -> String {
	"0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
	8080
}
fn default_helo_domain() -> String {
	"verify.kadenwood.com".to_string()
}
fn default_from_address() -> String {
	"verify@kadenwood.com".to_string()
}
fn default_concurrency() -> usize {
	5
}
fn default_db_path() -> String {
	"verified.db".to_string()
}
fn default_rest_table() -> String {
	"verified_emails".to_string()
}
fn default_fast_tier_threshold() -> f64 {
	0.85
}
fn default_true() -> bool {
	true
}
fn default_role_filter_mode() -> String {
	"invalid".to_string()
}
fn default_backfill_queue_size() -> usize {
	500
}
fn default_backfill_workers() -> usize {
	8
}
fn default_rate_limit_window_secs() -> u64 {
	60
}
fn default_rate_limit_max() -> usize {
	100
}
fn default_ready_dns_target() -> String {
	"gmail-smtp-in.l.google.com".to_string()
}
fn default_ready_smtp_target() -> String {
	"gmail-smtp-in.l.google.com:25".to_string()
}
fn default_max_batch_size() -> usize {
	1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
	#[serde(default = "default_http_host")]
	pub http_host: String,
	#[serde(default = "default_http_port")]
	pub http_port: u16,

	/// Shared auth secret. Auth is disabled when unset.
	#[serde(default)]
	pub api_key: Option<String>,

	#[serde(default = "default_helo_domain")]
	pub helo_domain: String,
	#[serde(default = "default_from_address")]
	pub from_address: String,

	/// Outer SMTP concurrency for batch verification.
	#[serde(default = "default_concurrency")]
	pub concurrency: usize,
	#[serde(default = "default_max_batch_size")]
	pub max_batch_size: usize,

	#[serde(default)]
	pub cache_backend: CacheBackend,
	#[serde(default = "default_db_path")]
	pub db_path: String,
	#[serde(default)]
	pub rest_url: Option<String>,
	#[serde(default)]
	pub rest_key: Option<String>,
	#[serde(default = "default_rest_table")]
	pub rest_table: String,

	#[serde(default = "default_fast_tier_threshold")]
	pub fast_tier_threshold: f64,
	#[serde(default = "default_true")]
	pub filter_role_accounts: bool,
	/// "invalid" (default) or "risky".
	#[serde(default = "default_role_filter_mode")]
	pub role_filter_mode: String,

	#[serde(default = "default_backfill_queue_size")]
	pub backfill_queue_size: usize,
	#[serde(default = "default_backfill_workers")]
	pub backfill_workers: usize,

	#[serde(default)]
	pub rate_limit_backend: RateLimitBackend,
	#[serde(default = "default_rate_limit_window_secs")]
	pub rate_limit_window_secs: u64,
	#[serde(default = "default_rate_limit_max")]
	pub rate_limit_max: usize,

	#[serde(default = "default_ready_dns_target")]
	pub ready_dns_target: String,
	#[serde(default = "default_ready_smtp_target")]
	pub ready_smtp_target: String,

	#[serde(default)]
	pub enrichment_enabled: bool,
	#[serde(default)]
	pub exa_api_key: Option<String>,
	#[serde(default)]
	pub prospeo_api_key: Option<String>,
	#[serde(default)]
	pub apollo_api_key: Option<String>,
}

impl Default for BackendConfig {
	fn default() -> Self {
		// An empty config source yields all serde defaults.
		serde_json::from_value(serde_json::json!({}))
			.expect("Every field has a default. qed.")
	}
}

impl BackendConfig {
	/// Load from `KADENVERIFY_*` environment variables.
	pub fn from_env() -> anyhow::Result<Self> {
		let cfg = config::Config::builder()
			.add_source(config::Environment::with_prefix("KADENVERIFY").try_parsing(true))
			.build()?;
		Ok(cfg.try_deserialize()?)
	}

	pub fn role_filter(&self) -> RoleAccountFilter {
		if !self.filter_role_accounts {
			return RoleAccountFilter::Off;
		}
		match self.role_filter_mode.as_str() {
			"risky" => RoleAccountFilter::Risky,
			_ => RoleAccountFilter::Invalid,
		}
	}
}
