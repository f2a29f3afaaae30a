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

//! Tiered verification: a cache-first, cost-ascending decision loop.
//!
//! - Tier 1: cached result (fresh within 30 days).
//! - Tier 2: fast probabilistic decision from syntax + metadata + DNS; a
//!   qualifying decision enqueues a background tier-3 backfill.
//! - Tier 3: full SMTP verification.
//! - Tier 4: catch-all scoring against the person store (free).
//! - Tier 5: the paid enrichment chain.
//! - Tier 6: SMTP re-confirmation of an enrichment hit.
//!
//! Cache lookup/update are injected capabilities so the engine never
//! depends on a concrete backend.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::catchall::{score_catch_all, ScoreContext, DOWNGRADE_THRESHOLD, UPGRADE_THRESHOLD};
use crate::domain_cache::DomainCache;
use crate::enrichment::{extract_name_from_email, EnrichmentChain, PersonDirectory};
use crate::misc::{check_misc, MiscDetails};
use crate::mx::MxDetails;
use crate::provider::Provider;
use crate::syntax::check_syntax;
use crate::{CheckEmailInput, Reachability, Verifier, VerificationResult, LOG_TARGET};

/// Default cache freshness window.
pub const CACHE_TTL_DAYS: i64 = 30;

/// Default confidence needed for a tier-2 decision.
pub const FAST_TIER_THRESHOLD: f64 = 0.85;

/// Injected cache capability. Implementations may be genuinely async
/// (store-backed) or synchronous wrapped via [FnCache].
#[async_trait]
pub trait VerificationCache: Send + Sync {
	async fn lookup(&self, email: &str) -> anyhow::Result<Option<VerificationResult>>;
	async fn update(&self, result: &VerificationResult) -> anyhow::Result<()>;
}

/// Adapts a pair of synchronous closures into the async cache capability.
pub struct FnCache<L, U>
where
	L: Fn(&str) -> Option<VerificationResult> + Send + Sync,
	U: Fn(&VerificationResult) + Send + Sync,
{
	lookup_fn: L,
	update_fn: U,
}

impl<L, U> FnCache<L, U>
where
	L: Fn(&str) -> Option<VerificationResult> + Send + Sync,
	U: Fn(&VerificationResult) + Send + Sync,
{
	pub fn new(lookup_fn: L, update_fn: U) -> Self {
		FnCache {
			lookup_fn,
			update_fn,
		}
	}
}

#[async_trait]
impl<L, U> VerificationCache for FnCache<L, U>
where
	L: Fn(&str) -> Option<VerificationResult> + Send + Sync,
	U: Fn(&VerificationResult) + Send + Sync,
{
	async fn lookup(&self, email: &str) -> anyhow::Result<Option<VerificationResult>> {
		Ok((self.lookup_fn)(email))
	}

	async fn update(&self, result: &VerificationResult) -> anyhow::Result<()> {
		(self.update_fn)(result);
		Ok(())
	}
}

/// A cache that remembers nothing.
pub struct NoCache;

#[async_trait]
impl VerificationCache for NoCache {
	async fn lookup(&self, _email: &str) -> anyhow::Result<Option<VerificationResult>> {
		Ok(None)
	}

	async fn update(&self, _result: &VerificationResult) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Events emitted for metrics.
#[derive(Debug, Clone)]
pub enum VerifyEvent {
	CacheLookup {
		hit: bool,
	},
	VerificationResult {
		tier: u8,
		reason: String,
		enrichment_cost: f64,
		reachability: Reachability,
		smtp_code: u16,
		error: Option<String>,
		elapsed: std::time::Duration,
	},
}

/// Sink for [VerifyEvent]s; the metrics registry implements this.
pub trait EventSink: Send + Sync {
	fn emit(&self, event: VerifyEvent);
}

/// Discards every event.
pub struct NullEventSink;

impl EventSink for NullEventSink {
	fn emit(&self, _event: VerifyEvent) {}
}

/// What to do with role accounts after tier 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleAccountFilter {
	/// Leave role accounts to the normal scoring.
	Off,
	/// Rewrite role accounts to invalid (the default).
	Invalid,
	/// Keep role accounts but cap them at risky.
	Risky,
}

impl Default for RoleAccountFilter {
	fn default() -> Self {
		RoleAccountFilter::Invalid
	}
}

#[derive(Debug, Clone)]
pub struct TieredConfig {
	pub fast_tier_threshold: f64,
	pub cache_ttl: ChronoDuration,
	pub role_filter: RoleAccountFilter,
	pub enrichment_enabled: bool,
}

impl Default for TieredConfig {
	fn default() -> Self {
		TieredConfig {
			fast_tier_threshold: FAST_TIER_THRESHOLD,
			cache_ttl: ChronoDuration::days(CACHE_TTL_DAYS),
			role_filter: RoleAccountFilter::default(),
			enrichment_enabled: false,
		}
	}
}

/// The terminal decision, with the tier that produced it.
#[derive(Debug, Clone)]
pub struct TieredOutcome {
	pub result: VerificationResult,
	pub tier: u8,
	pub reason: String,
}

/// Normalize an email into its cache/store key. Dotted and plus variants
/// of the canonical free provider collapse to one key; invalid syntax
/// falls back to trimmed lowercase.
pub fn cache_key(email: &str) -> String {
	let syntax = check_syntax(email);
	if syntax.is_valid_syntax {
		syntax.normalized
	} else {
		email.trim().to_lowercase()
	}
}

/// Tier-2 confidence from metadata and DNS alone.
pub fn fast_tier_confidence(misc: &MiscDetails, dns_info: &MxDetails) -> f64 {
	let mut confidence: f64 = 0.5;

	if matches!(
		dns_info.provider,
		Provider::Gmail | Provider::GoogleWorkspace
	) {
		confidence += 0.3;
	}
	if dns_info.provider == Provider::Microsoft365 {
		confidence += 0.2;
	}
	if misc.is_free {
		confidence += 0.1;
	}
	if !misc.is_disposable && !misc.is_role_account {
		confidence += 0.1;
	}
	if misc.is_disposable {
		confidence -= 0.2;
	}
	if dns_info.provider == Provider::Generic {
		confidence -= 0.1;
	}

	confidence.clamp(0.0, 1.0)
}

/// Infer reachability without an SMTP dialogue. A probabilistic decision
/// is never `safe`: known-provider and free-mail categories come back
/// risky, everything else unknown.
pub fn infer_reachability(misc: &MiscDetails, dns_info: &MxDetails) -> Reachability {
	if misc.is_disposable || misc.is_role_account {
		return Reachability::Risky;
	}
	if matches!(
		dns_info.provider,
		Provider::Gmail | Provider::GoogleWorkspace | Provider::Microsoft365
	) {
		return Reachability::Risky;
	}
	if misc.is_free {
		return Reachability::Risky;
	}
	Reachability::Unknown
}

/// Apply the role-account policy to a tier-3 result. Returns the reason
/// label when the result was rewritten.
pub fn apply_role_filter(
	result: &mut VerificationResult,
	filter: RoleAccountFilter,
) -> Option<&'static str> {
	if !result.is_role || filter == RoleAccountFilter::Off {
		return None;
	}

	match filter {
		RoleAccountFilter::Invalid => {
			result.reachability = Reachability::Invalid;
			result.is_deliverable = Some(false);
			result.error = Some("role_account_filtered".to_string());
		}
		RoleAccountFilter::Risky => {
			if result.reachability == Reachability::Safe {
				result.reachability = Reachability::Risky;
			}
			result.error = Some("role_account_filtered".to_string());
		}
		RoleAccountFilter::Off => unreachable!(),
	}
	Some("role_account_filtered")
}

/// Bounded background queue feeding full-SMTP backfill workers. Enqueue
/// never blocks the request path: a full queue drops the job with a
/// warning.
#[derive(Clone)]
pub struct BackfillScheduler {
	tx: mpsc::Sender<String>,
}

impl std::fmt::Debug for BackfillScheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BackfillScheduler").finish()
	}
}

impl BackfillScheduler {
	/// Spawn `workers` drain tasks over a queue of `queue_size` jobs.
	/// Workers run for the life of the process and ignore request
	/// cancellation.
	pub fn start(
		verifier: Arc<Verifier>,
		cache: Arc<dyn VerificationCache>,
		template: CheckEmailInput,
		queue_size: usize,
		workers: usize,
	) -> Self {
		let (tx, rx) = mpsc::channel::<String>(queue_size.max(1));
		let rx = Arc::new(tokio::sync::Mutex::new(rx));

		for worker_id in 0..workers.max(1) {
			let verifier = Arc::clone(&verifier);
			let cache = Arc::clone(&cache);
			let rx = Arc::clone(&rx);
			let template = template.clone();

			tokio::spawn(async move {
				loop {
					let job = { rx.lock().await.recv().await };
					let email = match job {
						Some(email) => email,
						None => break,
					};

					tracing::debug!(
						target: LOG_TARGET,
						worker = worker_id,
						email = %email,
						"Background SMTP backfill"
					);

					let mut input = template.clone();
					input.to_email = email.clone();
					let result = verifier.check_email(&input).await;
					if let Err(e) = cache.update(&result).await {
						tracing::error!(
							target: LOG_TARGET,
							email = %email,
							error = %e,
							"Backfill cache update failed"
						);
					}
				}
			});
		}

		BackfillScheduler { tx }
	}

	pub fn enqueue(&self, email: String) {
		match self.tx.try_send(email) {
			Ok(()) => {}
			Err(TrySendError::Full(email)) => {
				tracing::warn!(
					target: LOG_TARGET,
					email = %email,
					"Backfill queue full, dropping job"
				);
			}
			Err(TrySendError::Closed(email)) => {
				tracing::warn!(
					target: LOG_TARGET,
					email = %email,
					"Backfill queue closed, dropping job"
				);
			}
		}
	}
}

/// The tiered verification engine.
pub struct TieredVerifier {
	verifier: Arc<Verifier>,
	cache: Arc<dyn VerificationCache>,
	events: Arc<dyn EventSink>,
	chain: EnrichmentChain,
	directory: Arc<dyn PersonDirectory>,
	config: TieredConfig,
	template: CheckEmailInput,
	backfill: Option<BackfillScheduler>,
}

impl TieredVerifier {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		verifier: Arc<Verifier>,
		cache: Arc<dyn VerificationCache>,
		events: Arc<dyn EventSink>,
		chain: EnrichmentChain,
		directory: Arc<dyn PersonDirectory>,
		config: TieredConfig,
		template: CheckEmailInput,
		backfill: Option<BackfillScheduler>,
	) -> Self {
		TieredVerifier {
			verifier,
			cache,
			events,
			chain,
			directory,
			config,
			template,
			backfill,
		}
	}

	pub fn domain_cache(&self) -> &Arc<DomainCache> {
		self.verifier.domain_cache()
	}

	/// Verify through the tiers. `force_tier` skips earlier tiers (2 skips
	/// the cache, 3 skips cache and fast tier); used by tests and the
	/// reverify tooling.
	pub async fn verify_with_tier(&self, email: &str, force_tier: Option<u8>) -> TieredOutcome {
		let started = Instant::now();
		let email = email.trim().to_string();
		let key = cache_key(&email);

		// Tier 1: cache.
		if force_tier.is_none() {
			if let Some(cached) = self.tier1(&key).await {
				let outcome = TieredOutcome {
					result: cached,
					tier: 1,
					reason: "cached_result".to_string(),
				};
				self.emit_result(&outcome, 0.0, started);
				return outcome;
			}
		}

		// Tier 2: fast probabilistic.
		if force_tier.map(|t| t <= 2).unwrap_or(true) {
			if let Some((result, confidence)) = self.tier2(&email).await {
				if confidence >= self.config.fast_tier_threshold || force_tier == Some(2) {
					if let Some(backfill) = &self.backfill {
						backfill.enqueue(email.clone());
					}
					let outcome = TieredOutcome {
						result,
						tier: 2,
						reason: format!("fast_validation_confidence_{:.2}", confidence),
					};
					self.emit_result(&outcome, 0.0, started);
					return outcome;
				}
			}
		}

		// Tier 3: full SMTP.
		let mut input = self.template.clone();
		input.to_email = email.clone();
		let mut result = self.verifier.check_email(&input).await;
		result.normalized = key.clone();

		if let Some(reason) = apply_role_filter(&mut result, self.config.role_filter) {
			self.cache_update(&result).await;
			let outcome = TieredOutcome {
				result,
				tier: 3,
				reason: reason.to_string(),
			};
			self.emit_result(&outcome, 0.0, started);
			return outcome;
		}

		// Tiers 4-6: enrichment for unknowns and catch-all acceptances.
		let needs_enrichment = (result.reachability == Reachability::Unknown
			|| result.is_catch_all == Some(true))
			&& self.config.enrichment_enabled;

		let (tier, reason, cost) = if needs_enrichment {
			self.enrich(&mut result, &input).await
		} else {
			(3, "full_smtp_verification".to_string(), 0.0)
		};

		self.cache_update(&result).await;
		let outcome = TieredOutcome {
			result,
			tier,
			reason,
		};
		self.emit_result(&outcome, cost, started);
		outcome
	}

	pub async fn verify(&self, email: &str) -> TieredOutcome {
		self.verify_with_tier(email, None).await
	}

	async fn tier1(&self, key: &str) -> Option<VerificationResult> {
		match self.cache.lookup(key).await {
			Ok(Some(cached)) => {
				let age = Utc::now().signed_duration_since(cached.verified_at);
				if age <= self.config.cache_ttl {
					self.events.emit(VerifyEvent::CacheLookup { hit: true });
					tracing::debug!(target: LOG_TARGET, email = %key, "Cache hit");
					Some(cached)
				} else {
					self.events.emit(VerifyEvent::CacheLookup { hit: false });
					tracing::debug!(target: LOG_TARGET, email = %key, "Cache expired");
					None
				}
			}
			Ok(None) => {
				self.events.emit(VerifyEvent::CacheLookup { hit: false });
				None
			}
			Err(e) => {
				tracing::error!(target: LOG_TARGET, email = %key, error = %e, "Cache lookup error");
				self.events.emit(VerifyEvent::CacheLookup { hit: false });
				None
			}
		}
	}

	/// Fast validation from syntax + metadata + DNS. Returns the
	/// probabilistic result and its confidence; terminal failures carry
	/// confidence 1.0.
	async fn tier2(&self, email: &str) -> Option<(VerificationResult, f64)> {
		let syntax = check_syntax(email);
		if !syntax.is_valid_syntax {
			let result = VerificationResult {
				email: email.to_string(),
				normalized: email.to_lowercase(),
				reachability: Reachability::Invalid,
				is_deliverable: Some(false),
				error: Some(format!("syntax: {}", syntax.reason)),
				..Default::default()
			};
			return Some((result, 1.0));
		}

		let misc = check_misc(&syntax);

		let dns_info = match self.verifier.domain_cache().get_dns(&syntax.domain) {
			Some(cached) => cached,
			None => match self.verifier.resolver().check_mx(&syntax.domain).await {
				Ok(dns_info) => {
					self.verifier
						.domain_cache()
						.set_dns(&syntax.domain, dns_info.clone());
					dns_info
				}
				// Resolver failure: let tier 3 handle it.
				Err(_) => return None,
			},
		};

		if !dns_info.has_mx {
			let result = VerificationResult {
				email: email.to_string(),
				normalized: syntax.normalized.clone(),
				reachability: Reachability::Invalid,
				is_deliverable: Some(false),
				is_disposable: misc.is_disposable,
				is_role: misc.is_role_account,
				is_free: misc.is_free,
				provider: dns_info.provider,
				domain: syntax.domain.clone(),
				error: Some("no MX or A records found".to_string()),
				..Default::default()
			};
			return Some((result, 1.0));
		}

		let confidence = fast_tier_confidence(&misc, &dns_info);
		if confidence < self.config.fast_tier_threshold {
			return None;
		}

		let reachability = infer_reachability(&misc, &dns_info);
		let result = VerificationResult {
			email: email.to_string(),
			normalized: syntax.normalized.clone(),
			reachability,
			is_deliverable: None,
			is_disposable: misc.is_disposable,
			is_role: misc.is_role_account,
			is_free: misc.is_free,
			mx_host: dns_info.mx_hosts.first().cloned().unwrap_or_default(),
			smtp_code: 0,
			provider: dns_info.provider,
			domain: syntax.domain.clone(),
			error: Some("fast_tier_probabilistic".to_string()),
			..Default::default()
		};
		Some((result, confidence))
	}

	/// Tiers 4-6. Returns (tier, reason, accrued cost) and mutates the
	/// result in place.
	async fn enrich(
		&self,
		result: &mut VerificationResult,
		input: &CheckEmailInput,
	) -> (u8, String, f64) {
		let email = result.normalized.clone();
		let is_catchall = result.is_catch_all == Some(true);
		let (first, last, _, _) = extract_name_from_email(&email);

		// Tier 4: free catch-all scoring against the person store.
		let mut catchall_medium_reason: Option<String> = None;
		if is_catchall {
			let person_hit = self.directory.find_by_email(&email).await.is_some();
			let ctx = ScoreContext {
				first_name: first.clone(),
				last_name: last.clone(),
				person_store_match: person_hit,
				..Default::default()
			};
			let score = score_catch_all(&email, &ctx);
			let top_reasons = score
				.reasons
				.iter()
				.take(2)
				.cloned()
				.collect::<Vec<_>>()
				.join("_");

			if score.confidence >= UPGRADE_THRESHOLD {
				result.reachability = Reachability::Safe;
				result.is_deliverable = Some(true);
				result.error = None;
				return (
					4,
					format!("tier4_catchall_validated_{}", top_reasons),
					0.0,
				);
			}
			if score.confidence <= DOWNGRADE_THRESHOLD {
				result.reachability = Reachability::Invalid;
				result.is_deliverable = Some(false);
				result.error = Some(format!(
					"catch_all_low_confidence_{:.2}",
					score.confidence
				));
				return (4, format!("tier4_catchall_low_{}", top_reasons), 0.0);
			}
			catchall_medium_reason = Some(format!("tier4_catchall_medium_{}", top_reasons));
		}

		// Tier 5: the paid chain needs a name to search with.
		let (first, last) = match (first, last) {
			(Some(first), Some(last)) => (first, last),
			_ => {
				return match catchall_medium_reason {
					Some(reason) => {
						result.reachability = Reachability::Risky;
						(4, reason, 0.0)
					}
					None => (5, "enrichment_no_name".to_string(), 0.0),
				};
			}
		};

		let outcome = self.chain.run(&first, &last, &result.domain).await;
		let cost = outcome.cost;

		if let (Some(_), Some(method)) = (outcome.candidate, outcome.method) {
			// Tier 6: re-confirm over SMTP before trusting the hit.
			let mut reverify_input = input.clone();
			reverify_input.to_email = email.clone();
			let reverified = self.verifier.check_email(&reverify_input).await;

			if reverified.smtp_code == 250 {
				result.reachability = Reachability::Safe;
				result.is_deliverable = Some(true);
				result.smtp_code = reverified.smtp_code;
				result.smtp_message = reverified.smtp_message;
				result.error = None;
				return (6, format!("tier6_{}_smtp_confirmed", method), cost);
			}
			if reverified.smtp_code >= 500 {
				result.reachability = Reachability::Invalid;
				result.is_deliverable = Some(false);
				result.smtp_code = reverified.smtp_code;
				result.smtp_message = reverified.smtp_message;
				return (
					6,
					format!("tier6_{}_smtp_rejected_{}", method, reverified.smtp_code),
					cost,
				);
			}

			// SMTP inconclusive: trust the enrichment evidence, discounted.
			result.reachability = Reachability::Safe;
			result.is_deliverable = Some(true);
			result.error = None;
			return (6, format!("tier6_{}_smtp_inconclusive", method), cost);
		}

		// Exhausted enrichment is not an error: the result is unchanged
		// (catch-all acceptances stay risky) and the cost stands.
		match catchall_medium_reason {
			Some(reason) => {
				result.reachability = Reachability::Risky;
				(if cost > 0.0 { 5 } else { 4 }, reason, cost)
			}
			None => (5, "enrichment_exhausted".to_string(), cost),
		}
	}

	async fn cache_update(&self, result: &VerificationResult) {
		if let Err(e) = self.cache.update(result).await {
			tracing::error!(
				target: LOG_TARGET,
				email = %result.normalized,
				error = %e,
				"Cache update failed"
			);
		}
	}

	fn emit_result(&self, outcome: &TieredOutcome, cost: f64, started: Instant) {
		self.events.emit(VerifyEvent::VerificationResult {
			tier: outcome.tier,
			reason: outcome.reason.clone(),
			enrichment_cost: cost,
			reachability: outcome.result.reachability,
			smtp_code: outcome.result.smtp_code,
			error: outcome.result.error.clone(),
			elapsed: started.elapsed(),
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::enrichment::EmptyDirectory;
	use crate::mx::MxResolver;
	use std::collections::HashMap;
	use std::sync::Mutex;
	use std::time::Duration;

	struct MapCache {
		map: Mutex<HashMap<String, VerificationResult>>,
	}

	impl MapCache {
		fn new() -> Self {
			MapCache {
				map: Mutex::new(HashMap::new()),
			}
		}

		fn insert(&self, result: VerificationResult) {
			self.map
				.lock()
				.unwrap()
				.insert(result.normalized.clone(), result);
		}
	}

	#[async_trait]
	impl VerificationCache for MapCache {
		async fn lookup(&self, email: &str) -> anyhow::Result<Option<VerificationResult>> {
			Ok(self.map.lock().unwrap().get(email).cloned())
		}

		async fn update(&self, result: &VerificationResult) -> anyhow::Result<()> {
			self.insert(result.clone());
			Ok(())
		}
	}

	fn tiered_with_cache(cache: Arc<MapCache>) -> TieredVerifier {
		let verifier = Arc::new(Verifier::with_parts(
			Arc::new(MxResolver::with_timeout(Duration::from_millis(200))),
			Arc::new(DomainCache::default()),
		));
		TieredVerifier::new(
			verifier,
			cache,
			Arc::new(NullEventSink),
			EnrichmentChain::default(),
			Arc::new(EmptyDirectory),
			TieredConfig::default(),
			CheckEmailInput::default(),
			None,
		)
	}

	fn dns(provider: Provider) -> MxDetails {
		MxDetails {
			mx_hosts: vec!["mx1.example.com".to_string()],
			has_mx: true,
			provider,
			domain: "example.com".to_string(),
		}
	}

	#[test]
	fn cache_key_collapses_gmail_variants() {
		assert_eq!(cache_key("john.doe@gmail.com"), "johndoe@gmail.com");
		assert_eq!(cache_key("johndoe+tag@gmail.com"), "johndoe@gmail.com");
		assert_eq!(cache_key("JohnDoe@googlemail.com"), "johndoe@gmail.com");
		assert_eq!(cache_key("John.Doe@Company.com"), "john.doe@company.com");
		// Invalid syntax falls back to trimmed lowercase.
		assert_eq!(cache_key(" BROKEN@@x "), "broken@@x");
	}

	#[test]
	fn fast_confidence_weights() {
		let clean = MiscDetails::default();

		// Gmail: 0.5 + 0.3 + 0.1 free + 0.1 clean = 1.0
		let mut free = clean;
		free.is_free = true;
		assert!((fast_tier_confidence(&free, &dns(Provider::Gmail)) - 1.0).abs() < 1e-9);

		// Microsoft365 corporate: 0.5 + 0.2 + 0.1 = 0.8
		assert!(
			(fast_tier_confidence(&clean, &dns(Provider::Microsoft365)) - 0.8).abs() < 1e-9
		);

		// Generic corporate: 0.5 + 0.1 - 0.1 = 0.5
		assert!((fast_tier_confidence(&clean, &dns(Provider::Generic)) - 0.5).abs() < 1e-9);

		// Disposable on generic: 0.5 - 0.2 - 0.1 = 0.2
		let mut disposable = clean;
		disposable.is_disposable = true;
		assert!(
			(fast_tier_confidence(&disposable, &dns(Provider::Generic)) - 0.2).abs() < 1e-9
		);
	}

	#[test]
	fn tier2_never_says_safe() {
		let clean = MiscDetails::default();
		let mut free = clean;
		free.is_free = true;

		assert_eq!(
			infer_reachability(&free, &dns(Provider::Gmail)),
			Reachability::Risky
		);
		assert_eq!(
			infer_reachability(&clean, &dns(Provider::GoogleWorkspace)),
			Reachability::Risky
		);
		assert_eq!(
			infer_reachability(&clean, &dns(Provider::Microsoft365)),
			Reachability::Risky
		);
		assert_eq!(
			infer_reachability(&free, &dns(Provider::Generic)),
			Reachability::Risky
		);

		let mut disposable = clean;
		disposable.is_disposable = true;
		assert_eq!(
			infer_reachability(&disposable, &dns(Provider::Generic)),
			Reachability::Risky
		);

		// Generic corporate domain stays unknown.
		assert_eq!(
			infer_reachability(&clean, &dns(Provider::Generic)),
			Reachability::Unknown
		);
	}

	#[test]
	fn role_filter_modes() {
		let base = VerificationResult {
			email: "info@company.com".into(),
			normalized: "info@company.com".into(),
			reachability: Reachability::Risky,
			is_deliverable: Some(true),
			is_role: true,
			..Default::default()
		};

		let mut invalid = base.clone();
		assert_eq!(
			apply_role_filter(&mut invalid, RoleAccountFilter::Invalid),
			Some("role_account_filtered")
		);
		assert_eq!(invalid.reachability, Reachability::Invalid);
		assert_eq!(invalid.is_deliverable, Some(false));

		let mut risky = base.clone();
		risky.reachability = Reachability::Safe;
		assert_eq!(
			apply_role_filter(&mut risky, RoleAccountFilter::Risky),
			Some("role_account_filtered")
		);
		assert_eq!(risky.reachability, Reachability::Risky);

		let mut off = base.clone();
		assert_eq!(apply_role_filter(&mut off, RoleAccountFilter::Off), None);
		assert_eq!(off.reachability, Reachability::Risky);

		let mut not_role = base;
		not_role.is_role = false;
		assert_eq!(
			apply_role_filter(&mut not_role, RoleAccountFilter::Invalid),
			None
		);
	}

	#[tokio::test]
	async fn fn_cache_wraps_sync_closures() {
		let seen = Arc::new(Mutex::new(Vec::<String>::new()));
		let sink = Arc::clone(&seen);
		let cache = FnCache::new(
			|_email: &str| None,
			move |result: &VerificationResult| {
				sink.lock().unwrap().push(result.normalized.clone())
			},
		);

		assert!(cache.lookup("x@y.com").await.unwrap().is_none());
		cache
			.update(&VerificationResult {
				normalized: "x@y.com".into(),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(seen.lock().unwrap().as_slice(), ["x@y.com".to_string()]);

		assert!(NoCache.lookup("x@y.com").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn tier1_hit_on_fresh_cache_with_normalized_key() {
		let cache = Arc::new(MapCache::new());
		cache.insert(VerificationResult {
			email: "john.doe@gmail.com".into(),
			normalized: "johndoe@gmail.com".into(),
			reachability: Reachability::Safe,
			is_deliverable: Some(true),
			verified_at: Utc::now(),
			..Default::default()
		});

		let tiered = tiered_with_cache(Arc::clone(&cache));
		// A dotted/plus variant of the cached address is a tier-1 hit.
		let outcome = tiered.verify("johndoe+tag@gmail.com").await;
		assert_eq!(outcome.tier, 1);
		assert_eq!(outcome.reason, "cached_result");
		assert_eq!(outcome.result.reachability, Reachability::Safe);
	}

	#[tokio::test]
	async fn stale_cache_is_a_miss() {
		let cache = Arc::new(MapCache::new());
		cache.insert(VerificationResult {
			email: "a@b".into(),
			normalized: "a@b".into(),
			reachability: Reachability::Safe,
			verified_at: Utc::now() - ChronoDuration::days(CACHE_TTL_DAYS + 1),
			..Default::default()
		});

		let tiered = tiered_with_cache(Arc::clone(&cache));
		// The stale row is skipped; "a@b" then terminates at tier 2 with
		// a syntax failure.
		let outcome = tiered.verify("a@b").await;
		assert_eq!(outcome.tier, 2);
		assert_eq!(outcome.result.reachability, Reachability::Invalid);
		assert_eq!(
			outcome.result.error.as_deref(),
			Some("syntax: domain must have at least one dot")
		);
	}

	#[tokio::test]
	async fn force_tier_two_skips_cache() {
		let cache = Arc::new(MapCache::new());
		cache.insert(VerificationResult {
			email: "a@b".into(),
			normalized: "a@b".into(),
			reachability: Reachability::Safe,
			verified_at: Utc::now(),
			..Default::default()
		});

		let tiered = tiered_with_cache(Arc::clone(&cache));
		let outcome = tiered.verify_with_tier("a@b", Some(2)).await;
		assert_eq!(outcome.tier, 2);
		assert_eq!(outcome.result.reachability, Reachability::Invalid);
	}
}
