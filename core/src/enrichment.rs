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

//! Enrichment adapters: propose a plausible email for a person-domain pair.
//!
//! All adapters share one interface and are driven in ascending unit-cost
//! order: local person store (free), web search (~$0.0005), enrich-person
//! (~$0.006), person-match (~$0.10). Unit cost accrues on every call,
//! miss or hit; a miss is not an error.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::util::ser_with_display::ser_with_display;
use crate::LOG_TARGET;

/// Backoff before the single retry on HTTP 429.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// A single email candidate produced while finding or enriching.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct CandidateResult {
	pub email: String,
	/// Pattern label, e.g. "first.last", or the adapter identity.
	pub pattern: String,
	pub smtp_code: u16,
	pub confidence: f64,
	/// Source tag: "smtp", "person_store", "web_search", "enrich_person",
	/// "person_match", "pattern_score".
	pub source: String,
}

/// Error from an enrichment backend.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum EnrichError {
	#[error("HTTP error: {0}")]
	#[serde(serialize_with = "ser_with_display")]
	Http(reqwest::Error),
	#[error("Unexpected response shape: {0}")]
	BadResponse(String),
}

impl From<reqwest::Error> for EnrichError {
	fn from(e: reqwest::Error) -> Self {
		EnrichError::Http(e)
	}
}

/// A record in the local person store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PersonRecord {
	pub email: String,
	pub name: Option<String>,
	pub title: Option<String>,
	pub company: Option<String>,
}

/// The local people directory (warehouse of previously-seen contacts).
/// Zero-cost source consulted before any paid provider.
#[async_trait]
pub trait PersonDirectory: Send + Sync {
	/// Exact-match lookup by email address.
	async fn find_by_email(&self, email: &str) -> Option<PersonRecord>;
	/// Lookup by person name at an organization domain.
	async fn find_by_name(&self, first: &str, last: &str, domain: &str)
		-> Option<PersonRecord>;
}

/// A directory with no entries. Used when no person store is configured.
#[derive(Debug, Default)]
pub struct EmptyDirectory;

#[async_trait]
impl PersonDirectory for EmptyDirectory {
	async fn find_by_email(&self, _email: &str) -> Option<PersonRecord> {
		None
	}

	async fn find_by_name(
		&self,
		_first: &str,
		_last: &str,
		_domain: &str,
	) -> Option<PersonRecord> {
		None
	}
}

/// Uniform interface over every enrichment source.
#[async_trait]
pub trait EnrichmentAdapter: Send + Sync {
	/// Identity used in `method` labels.
	fn name(&self) -> &'static str;
	/// Cost in USD charged per call, hit or miss.
	fn unit_cost(&self) -> f64;
	/// Propose an email for (first, last, domain), or None on a miss.
	async fn find(
		&self,
		first: &str,
		last: &str,
		domain: &str,
	) -> Result<Option<CandidateResult>, EnrichError>;
}

async fn send_with_429_retry(
	request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, EnrichError> {
	let retry = request.try_clone();
	let response = request.send().await?;
	if response.status().as_u16() == 429 {
		if let Some(retry) = retry {
			tracing::warn!(target: LOG_TARGET, "Enrichment provider rate limited, retrying once");
			tokio::time::sleep(RETRY_BACKOFF).await;
			return Ok(retry.send().await?);
		}
	}
	Ok(response)
}

/// Adapter over the local person store. Free.
pub struct PersonStoreAdapter {
	directory: Arc<dyn PersonDirectory>,
}

impl PersonStoreAdapter {
	pub fn new(directory: Arc<dyn PersonDirectory>) -> Self {
		PersonStoreAdapter { directory }
	}
}

#[async_trait]
impl EnrichmentAdapter for PersonStoreAdapter {
	fn name(&self) -> &'static str {
		"person_store"
	}

	fn unit_cost(&self) -> f64 {
		0.0
	}

	async fn find(
		&self,
		first: &str,
		last: &str,
		domain: &str,
	) -> Result<Option<CandidateResult>, EnrichError> {
		Ok(self
			.directory
			.find_by_name(first, last, domain)
			.await
			.map(|record| CandidateResult {
				email: record.email,
				pattern: "person_store".to_string(),
				confidence: 0.90,
				source: "person_store".to_string(),
				..Default::default()
			}))
	}
}

/// Web-search provider: queries an Exa-style search API and extracts the
/// first address at the target domain from the result text.
pub struct WebSearchAdapter {
	client: reqwest::Client,
	endpoint: String,
	api_key: String,
}

impl WebSearchAdapter {
	pub const DEFAULT_ENDPOINT: &'static str = "https://api.exa.ai";

	pub fn new(api_key: String) -> Self {
		Self::with_endpoint(api_key, Self::DEFAULT_ENDPOINT.to_string())
	}

	pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
		WebSearchAdapter {
			client: reqwest::Client::builder()
				.timeout(Duration::from_secs(5))
				.build()
				.unwrap_or_default(),
			endpoint,
			api_key,
		}
	}
}

#[async_trait]
impl EnrichmentAdapter for WebSearchAdapter {
	fn name(&self) -> &'static str {
		"web_search"
	}

	fn unit_cost(&self) -> f64 {
		0.0005
	}

	async fn find(
		&self,
		first: &str,
		last: &str,
		domain: &str,
	) -> Result<Option<CandidateResult>, EnrichError> {
		let company = domain.split('.').next().unwrap_or(domain);
		let queries = [
			format!("\"{} {}\" email @{}", first, last, domain),
			format!("\"{} {}\" {} site:linkedin.com", first, last, company),
		];

		let email_re = Regex::new(&format!(r"[\w.+-]+@{}", regex::escape(domain)))
			.map_err(|e| EnrichError::BadResponse(e.to_string()))?;

		for query in &queries {
			let request = self
				.client
				.post(format!("{}/search", self.endpoint))
				.header("x-api-key", &self.api_key)
				.json(&json!({ "query": query, "num_results": 3 }));

			let response = send_with_429_retry(request).await?;
			if !response.status().is_success() {
				continue;
			}

			let body: serde_json::Value = response.json().await?;
			let text: String = body["results"]
				.as_array()
				.map(|results| {
					results
						.iter()
						.filter_map(|r| r["text"].as_str())
						.collect::<Vec<_>>()
						.join(" ")
				})
				.unwrap_or_default()
				.to_lowercase();

			if let Some(found) = email_re.find(&text) {
				return Ok(Some(CandidateResult {
					email: found.as_str().to_string(),
					pattern: "web_search".to_string(),
					confidence: 0.85,
					source: "web_search".to_string(),
					..Default::default()
				}));
			}
		}

		Ok(None)
	}
}

/// Enrich-person provider (Prospeo-style): one credit per match, no charge
/// on a miss according to the vendor, but we still count the unit cost.
pub struct EnrichPersonAdapter {
	client: reqwest::Client,
	endpoint: String,
	api_key: String,
}

impl EnrichPersonAdapter {
	pub const DEFAULT_ENDPOINT: &'static str = "https://api.prospeo.io";

	pub fn new(api_key: String) -> Self {
		Self::with_endpoint(api_key, Self::DEFAULT_ENDPOINT.to_string())
	}

	pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
		EnrichPersonAdapter {
			client: reqwest::Client::builder()
				.timeout(Duration::from_secs(15))
				.build()
				.unwrap_or_default(),
			endpoint,
			api_key,
		}
	}
}

#[async_trait]
impl EnrichmentAdapter for EnrichPersonAdapter {
	fn name(&self) -> &'static str {
		"enrich_person"
	}

	fn unit_cost(&self) -> f64 {
		0.006
	}

	async fn find(
		&self,
		first: &str,
		last: &str,
		domain: &str,
	) -> Result<Option<CandidateResult>, EnrichError> {
		let request = self
			.client
			.post(format!("{}/enrich-person", self.endpoint))
			.header("X-KEY", &self.api_key)
			.json(&json!({
				"data": {
					"first_name": first,
					"last_name": last,
					"company_website": domain,
				},
				"only_verified_email": true,
			}));

		let response = send_with_429_retry(request).await?;
		if !response.status().is_success() {
			tracing::debug!(
				target: LOG_TARGET,
				status = response.status().as_u16(),
				"Enrich-person provider returned non-success"
			);
			return Ok(None);
		}

		let body: serde_json::Value = response.json().await?;
		if body["error"] != serde_json::Value::Bool(false) {
			return Ok(None);
		}

		let email_obj = &body["person"]["email"];
		let email = email_obj["email"].as_str().unwrap_or("").trim().to_string();
		if email.is_empty() || !email.contains('@') {
			return Ok(None);
		}

		let verified = email_obj["status"].as_str() == Some("VERIFIED");
		Ok(Some(CandidateResult {
			email,
			pattern: "enrich_person".to_string(),
			confidence: if verified { 0.95 } else { 0.85 },
			source: "enrich_person".to_string(),
			..Default::default()
		}))
	}
}

/// Person-match provider (Apollo-style people match). Most expensive,
/// always last in the chain.
pub struct PersonMatchAdapter {
	client: reqwest::Client,
	endpoint: String,
	api_key: String,
}

impl PersonMatchAdapter {
	pub const DEFAULT_ENDPOINT: &'static str = "https://api.apollo.io";

	pub fn new(api_key: String) -> Self {
		Self::with_endpoint(api_key, Self::DEFAULT_ENDPOINT.to_string())
	}

	pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
		PersonMatchAdapter {
			client: reqwest::Client::builder()
				.timeout(Duration::from_secs(10))
				.build()
				.unwrap_or_default(),
			endpoint,
			api_key,
		}
	}
}

#[async_trait]
impl EnrichmentAdapter for PersonMatchAdapter {
	fn name(&self) -> &'static str {
		"person_match"
	}

	fn unit_cost(&self) -> f64 {
		0.10
	}

	async fn find(
		&self,
		first: &str,
		last: &str,
		domain: &str,
	) -> Result<Option<CandidateResult>, EnrichError> {
		let request = self
			.client
			.post(format!("{}/v1/people/match", self.endpoint))
			.header("X-Api-Key", &self.api_key)
			.json(&json!({
				"first_name": first,
				"last_name": last,
				"organization_name": domain.split('.').next().unwrap_or(domain),
				"domain": domain,
			}));

		let response = send_with_429_retry(request).await?;
		if !response.status().is_success() {
			return Ok(None);
		}

		let body: serde_json::Value = response.json().await?;
		let email = body["person"]["email"].as_str().unwrap_or("").to_string();
		if email.is_empty() {
			return Ok(None);
		}

		Ok(Some(CandidateResult {
			email,
			pattern: "person_match".to_string(),
			confidence: 0.92,
			source: "person_match".to_string(),
			..Default::default()
		}))
	}
}

/// Outcome of driving the chain: the first hit (if any) with the adapter
/// that produced it, and the total accrued cost.
#[derive(Debug, Default)]
pub struct ChainOutcome {
	pub candidate: Option<CandidateResult>,
	pub method: Option<&'static str>,
	pub cost: f64,
}

/// Drives adapters in configured order until one returns a candidate or
/// the chain is exhausted.
#[derive(Clone, Default)]
pub struct EnrichmentChain {
	adapters: Vec<Arc<dyn EnrichmentAdapter>>,
}

impl std::fmt::Debug for EnrichmentChain {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EnrichmentChain")
			.field("adapters", &self.adapters.iter().map(|a| a.name()).collect::<Vec<_>>())
			.finish()
	}
}

impl EnrichmentChain {
	pub fn new(adapters: Vec<Arc<dyn EnrichmentAdapter>>) -> Self {
		EnrichmentChain { adapters }
	}

	pub fn is_empty(&self) -> bool {
		self.adapters.is_empty()
	}

	pub fn adapters(&self) -> &[Arc<dyn EnrichmentAdapter>] {
		&self.adapters
	}

	/// Run the chain for a person-domain pair. Backend errors are logged
	/// and treated as misses; cost accrues for every adapter invoked.
	pub async fn run(&self, first: &str, last: &str, domain: &str) -> ChainOutcome {
		let mut outcome = ChainOutcome::default();

		for adapter in &self.adapters {
			outcome.cost += adapter.unit_cost();
			match adapter.find(first, last, domain).await {
				Ok(Some(candidate)) => {
					tracing::info!(
						target: LOG_TARGET,
						adapter = adapter.name(),
						email = %candidate.email,
						cost = outcome.cost,
						"Enrichment hit"
					);
					outcome.method = Some(adapter.name());
					outcome.candidate = Some(candidate);
					return outcome;
				}
				Ok(None) => {}
				Err(e) => {
					tracing::warn!(
						target: LOG_TARGET,
						adapter = adapter.name(),
						error = %e,
						"Enrichment adapter failed, continuing down the chain"
					);
				}
			}
		}

		outcome
	}
}

/// Extract a probable (first, last) from an email local part, with a
/// confidence for the matched shape.
pub fn extract_name_from_email(email: &str) -> (Option<String>, Option<String>, f64, &'static str) {
	fn shape(pattern: &str) -> Regex {
		Regex::new(pattern).expect("Static patterns are valid regexes. qed.")
	}

	static FIRST_DOT_LAST: Lazy<Regex> = Lazy::new(|| shape(r"^([a-z]{2,})\.([a-z]{2,})$"));
	static FIRST_M_LAST: Lazy<Regex> =
		Lazy::new(|| shape(r"^([a-z]{2,})\.([a-z])\.([a-z]{2,})$"));
	static F_DOT_LAST: Lazy<Regex> = Lazy::new(|| shape(r"^([a-z])\.([a-z]{2,})$"));
	static FLAST: Lazy<Regex> = Lazy::new(|| shape(r"^([a-z])([a-z]{3,})$"));

	fn cap(s: &str) -> String {
		let mut chars = s.chars();
		match chars.next() {
			Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
			None => String::new(),
		}
	}

	let local = email.split('@').next().unwrap_or("").to_lowercase();

	if let Some(caps) = FIRST_M_LAST.captures(&local) {
		return (
			Some(cap(&caps[1])),
			Some(cap(&caps[3])),
			0.88,
			"first.m.last",
		);
	}

	if let Some(caps) = FIRST_DOT_LAST.captures(&local) {
		let (first, last) = (&caps[1], &caps[2]);
		if first.len() <= 15 && last.len() <= 20 {
			return (Some(cap(first)), Some(cap(last)), 0.92, "first.last");
		}
	}

	for sep in ['_', '-'] {
		if local.contains(sep) {
			let parts: Vec<&str> = local.split(sep).collect();
			if parts.len() == 2
				&& parts.iter().all(|p| {
					p.len() >= 2 && p.len() <= 15 && p.chars().all(|c| c.is_ascii_alphabetic())
				}) {
				let pattern = if sep == '_' { "first_last" } else { "first-last" };
				return (Some(cap(parts[0])), Some(cap(parts[1])), 0.86, pattern);
			}
		}
	}

	if let Some(caps) = F_DOT_LAST.captures(&local) {
		return (
			Some(caps[1].to_uppercase()),
			Some(cap(&caps[2])),
			0.78,
			"f.last",
		);
	}

	if local.len() <= 10 {
		if let Some(caps) = FLAST.captures(&local) {
			return (
				Some(caps[1].to_uppercase()),
				Some(cap(&caps[2])),
				0.74,
				"flast",
			);
		}
	}

	(None, None, 0.0, "no_pattern")
}

#[cfg(test)]
mod tests {
	use super::*;

	struct OneHit;

	#[async_trait]
	impl EnrichmentAdapter for OneHit {
		fn name(&self) -> &'static str {
			"one_hit"
		}
		fn unit_cost(&self) -> f64 {
			0.01
		}
		async fn find(
			&self,
			first: &str,
			last: &str,
			domain: &str,
		) -> Result<Option<CandidateResult>, EnrichError> {
			Ok(Some(CandidateResult {
				email: format!("{}.{}@{}", first, last, domain),
				confidence: 0.9,
				source: "one_hit".to_string(),
				..Default::default()
			}))
		}
	}

	struct AlwaysMiss;

	#[async_trait]
	impl EnrichmentAdapter for AlwaysMiss {
		fn name(&self) -> &'static str {
			"always_miss"
		}
		fn unit_cost(&self) -> f64 {
			0.05
		}
		async fn find(
			&self,
			_first: &str,
			_last: &str,
			_domain: &str,
		) -> Result<Option<CandidateResult>, EnrichError> {
			Ok(None)
		}
	}

	#[tokio::test]
	async fn chain_stops_at_first_hit() {
		let chain = EnrichmentChain::new(vec![Arc::new(AlwaysMiss), Arc::new(OneHit)]);
		let outcome = chain.run("jane", "smith", "company.com").await;
		assert_eq!(outcome.method, Some("one_hit"));
		assert_eq!(
			outcome.candidate.unwrap().email,
			"jane.smith@company.com"
		);
		// Both adapters accrued cost.
		assert!((outcome.cost - 0.06).abs() < 1e-9);
	}

	#[tokio::test]
	async fn exhausted_chain_accrues_all_costs() {
		let chain = EnrichmentChain::new(vec![Arc::new(AlwaysMiss), Arc::new(AlwaysMiss)]);
		let outcome = chain.run("jane", "smith", "company.com").await;
		assert!(outcome.candidate.is_none());
		assert!((outcome.cost - 0.10).abs() < 1e-9);
	}

	#[tokio::test]
	async fn empty_directory_misses() {
		let adapter = PersonStoreAdapter::new(Arc::new(EmptyDirectory));
		let hit = adapter.find("jane", "smith", "company.com").await.unwrap();
		assert!(hit.is_none());
		assert_eq!(adapter.unit_cost(), 0.0);
	}

	#[test]
	fn name_extraction_shapes() {
		let (first, last, conf, pattern) = extract_name_from_email("jane.smith@x.com");
		assert_eq!(first.as_deref(), Some("Jane"));
		assert_eq!(last.as_deref(), Some("Smith"));
		assert!(conf >= 0.90);
		assert_eq!(pattern, "first.last");

		let (first, last, _, pattern) = extract_name_from_email("jane.m.smith@x.com");
		assert_eq!(first.as_deref(), Some("Jane"));
		assert_eq!(last.as_deref(), Some("Smith"));
		assert_eq!(pattern, "first.m.last");

		let (first, last, _, pattern) = extract_name_from_email("jane_smith@x.com");
		assert_eq!(first.as_deref(), Some("Jane"));
		assert_eq!(last.as_deref(), Some("Smith"));
		assert_eq!(pattern, "first_last");

		let (first, last, _, pattern) = extract_name_from_email("j.smith@x.com");
		assert_eq!(first.as_deref(), Some("J"));
		assert_eq!(last.as_deref(), Some("Smith"));
		assert_eq!(pattern, "f.last");

		let (first, last, _, pattern) = extract_name_from_email("jsmith@x.com");
		assert_eq!(first.as_deref(), Some("J"));
		assert_eq!(last.as_deref(), Some("Smith"));
		assert_eq!(pattern, "flast");

		let (first, _, conf, pattern) = extract_name_from_email("x9@x.com");
		assert!(first.is_none());
		assert_eq!(conf, 0.0);
		assert_eq!(pattern, "no_pattern");
	}
}
