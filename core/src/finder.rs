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

//! Email finder: given (first name, last name, domain), propose the most
//! likely working address.
//!
//! Waterfall: domain intelligence (cached) -> candidate pattern generation
//! -> multi-RCPT SMTP batch on non-catch-all domains -> the enrichment
//! chain in ascending cost order -> catch-all pattern scoring fallback.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::catchall::{score_catch_all, ScoreContext};
use crate::domain_cache::DomainCache;
use crate::enrichment::{CandidateResult, EnrichmentChain};
use crate::mx::{MxDetails, MxResolver};
use crate::provider::Provider;
use crate::smtp;
use crate::{CheckEmailInput, Reachability, LOG_TARGET};

/// Default concurrent domains for the batch finder.
pub const DEFAULT_FINDER_CONCURRENCY: usize = 10;

/// Candidate local-part patterns, in fixed precedence order.
const PATTERNS: &[(&str, fn(&str, &str) -> String)] = &[
	("first.last", |f, l| format!("{}.{}", f, l)),
	("flast", |f, l| format!("{}{}", initial(f), l)),
	("firstl", |f, l| format!("{}{}", f, initial(l))),
	("first", |f, _| f.to_string()),
	("first_last", |f, l| format!("{}_{}", f, l)),
	("first-last", |f, l| format!("{}-{}", f, l)),
	("f.last", |f, l| format!("{}.{}", initial(f), l)),
	("lastf", |f, l| format!("{}{}", l, initial(f))),
	("last.first", |f, l| format!("{}.{}", l, f)),
	("firstlast", |f, l| format!("{}{}", f, l)),
];

fn initial(name: &str) -> &str {
	name.get(..1).unwrap_or("")
}

/// A person to find an email for.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FinderInput {
	pub first_name: String,
	pub last_name: String,
	pub domain: String,
	pub company_name: Option<String>,
}

/// Result of email finding for one contact.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FinderResult {
	/// Best found email, None when nothing usable surfaced.
	pub email: Option<String>,
	pub confidence: f64,
	/// How it was found: "smtp_verified", an adapter identity,
	/// "pattern_score_catchall" or "exhausted".
	pub method: String,
	pub reachability: Reachability,
	pub domain_is_catchall: Option<bool>,
	pub provider: Provider,
	pub candidates_tried: usize,
	pub candidates: Vec<CandidateResult>,
	/// Total enrichment spend in USD.
	pub cost: f64,
	pub error: Option<String>,
}

/// Generate candidate emails for a person at a domain, lowercased and
/// deduplicated preserving pattern precedence.
pub fn generate_candidates(first: &str, last: &str, domain: &str) -> Vec<CandidateResult> {
	let first = first.trim().to_lowercase();
	let last = last.trim().to_lowercase();

	let mut seen: Vec<String> = Vec::new();
	let mut candidates = Vec::new();
	for (pattern, build) in PATTERNS {
		let local = build(&first, &last);
		let email = format!("{}@{}", local, domain);
		if !seen.contains(&email) {
			seen.push(email.clone());
			candidates.push(CandidateResult {
				email,
				pattern: pattern.to_string(),
				..Default::default()
			});
		}
	}
	candidates
}

/// The finder engine: shares the resolver and domain cache with the
/// verifier, plus the enrichment chain. Cloning shares all of them.
#[derive(Clone)]
pub struct EmailFinder {
	resolver: Arc<MxResolver>,
	domain_cache: Arc<DomainCache>,
	chain: EnrichmentChain,
	template: CheckEmailInput,
}

impl EmailFinder {
	pub fn new(
		resolver: Arc<MxResolver>,
		domain_cache: Arc<DomainCache>,
		chain: EnrichmentChain,
		template: CheckEmailInput,
	) -> Self {
		EmailFinder {
			resolver,
			domain_cache,
			chain,
			template,
		}
	}

	/// Domain intelligence: DNS info plus catch-all status, both cached.
	async fn domain_intel(&self, domain: &str) -> (Option<MxDetails>, Option<bool>) {
		let dns_info = match self.domain_cache.get_dns(domain) {
			Some(cached) => Some(cached),
			None => match self.resolver.check_mx(domain).await {
				Ok(dns_info) => {
					self.domain_cache.set_dns(domain, dns_info.clone());
					Some(dns_info)
				}
				Err(e) => {
					tracing::debug!(target: LOG_TARGET, domain = %domain, error = %e, "Finder DNS lookup failed");
					None
				}
			},
		};

		let dns_info = match dns_info {
			Some(info) if info.has_mx => info,
			other => return (other, None),
		};

		let is_catchall = if self.domain_cache.has_catch_all(domain) {
			self.domain_cache.get_catch_all(domain)
		} else {
			let probed =
				smtp::check_catch_all(domain, &dns_info.mx_hosts[0], &self.template).await;
			self.domain_cache.set_catch_all(domain, probed);
			probed
		};

		(Some(dns_info), is_catchall)
	}

	/// Find an email for one person.
	pub async fn find_email(&self, input: &FinderInput) -> FinderResult {
		let domain = input
			.domain
			.trim()
			.trim_start_matches('@')
			.to_lowercase();
		let first = input.first_name.trim().to_string();
		let last = input.last_name.trim().to_string();
		let mut cost = 0.0;

		// Phase A: domain intelligence.
		let (dns_info, is_catchall) = self.domain_intel(&domain).await;
		let dns_info = match dns_info {
			Some(info) if info.has_mx => info,
			other => {
				return FinderResult {
					error: Some(format!("No MX records for {}", domain)),
					provider: other.map(|i| i.provider).unwrap_or_default(),
					method: "exhausted".to_string(),
					..Default::default()
				};
			}
		};
		let mx_host = dns_info.mx_hosts[0].clone();

		// Phase B: candidates.
		let mut candidates = generate_candidates(&first, &last, &domain);

		// Phase C: multi-RCPT batch on non-catch-all domains; first 250
		// wins.
		if is_catchall == Some(false) {
			let emails: Vec<String> = candidates.iter().map(|c| c.email.clone()).collect();
			let responses = smtp::check_smtp_batch(&emails, &mx_host, &self.template).await;

			for (candidate, response) in candidates.iter_mut().zip(&responses) {
				candidate.smtp_code = response.code;
				if response.code == 250 {
					candidate.confidence = 0.95;
					candidate.source = "smtp".to_string();
				}
			}

			if let Some(winner) = candidates.iter().find(|c| c.smtp_code == 250).cloned() {
				return FinderResult {
					email: Some(winner.email.clone()),
					confidence: winner.confidence,
					method: "smtp_verified".to_string(),
					reachability: Reachability::Safe,
					domain_is_catchall: Some(false),
					provider: dns_info.provider,
					candidates_tried: candidates.len(),
					candidates,
					cost,
					error: None,
				};
			}
			// All rejected or mixed: fall through to enrichment either
			// way.
		}

		// Phase D: enrichment chain, cheapest first.
		let outcome = self.chain.run(&first, &last, &domain).await;
		cost += outcome.cost;
		if let (Some(candidate), Some(method)) = (outcome.candidate, outcome.method) {
			candidates.push(candidate.clone());
			return FinderResult {
				email: Some(candidate.email.clone()),
				confidence: candidate.confidence,
				method: method.to_string(),
				reachability: Reachability::Risky,
				domain_is_catchall: is_catchall,
				provider: dns_info.provider,
				candidates_tried: candidates.len(),
				candidates,
				cost,
				error: None,
			};
		}

		// Phase E: catch-all pattern scoring fallback on the top pattern.
		if is_catchall == Some(true) {
			let best = candidates[0].clone();
			let score = score_catch_all(
				&best.email,
				&ScoreContext {
					first_name: Some(first.clone()),
					last_name: Some(last.clone()),
					..Default::default()
				},
			);
			if let Some(slot) = candidates.first_mut() {
				slot.confidence = score.confidence;
				slot.source = "pattern_score".to_string();
			}
			return FinderResult {
				email: Some(best.email),
				confidence: score.confidence,
				method: "pattern_score_catchall".to_string(),
				reachability: if score.confidence >= 0.50 {
					Reachability::Risky
				} else {
					Reachability::Unknown
				},
				domain_is_catchall: Some(true),
				provider: dns_info.provider,
				candidates_tried: candidates.len(),
				candidates,
				cost,
				error: None,
			};
		}

		// Nothing found.
		FinderResult {
			email: None,
			confidence: 0.0,
			method: "exhausted".to_string(),
			reachability: Reachability::Unknown,
			domain_is_catchall: is_catchall,
			provider: dns_info.provider,
			candidates_tried: candidates.len(),
			candidates,
			cost,
			error: None,
		}
	}

	/// Find emails for many contacts. Contacts are grouped by domain;
	/// within one domain they run sequentially (sharing domain intel and
	/// the SMTP dialogue window) while distinct domains run concurrently
	/// under the semaphore. Output order matches input order.
	pub async fn find_emails_batch(
		&self,
		contacts: &[FinderInput],
		concurrency: usize,
	) -> Vec<FinderResult> {
		let mut domain_groups: HashMap<String, Vec<usize>> = HashMap::new();
		for (idx, contact) in contacts.iter().enumerate() {
			let domain = contact
				.domain
				.trim()
				.trim_start_matches('@')
				.to_lowercase();
			domain_groups.entry(domain).or_default().push(idx);
		}

		let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
		let mut handles = Vec::new();

		for (domain, indexes) in domain_groups {
			let finder = self.clone();
			let semaphore = Arc::clone(&semaphore);
			let group: Vec<(usize, FinderInput)> = indexes
				.into_iter()
				.map(|idx| (idx, contacts[idx].clone()))
				.collect();

			handles.push(tokio::spawn(async move {
				// Pre-warm domain intelligence once per group.
				finder.domain_intel(&domain).await;

				let mut results = Vec::with_capacity(group.len());
				for (idx, contact) in group {
					let _permit = semaphore
						.acquire()
						.await
						.expect("Semaphore is never closed. qed.");
					results.push((idx, finder.find_email(&contact).await));
				}
				results
			}));
		}

		let mut results: Vec<Option<FinderResult>> = vec![None; contacts.len()];
		for handle in handles {
			match handle.await {
				Ok(group_results) => {
					for (idx, result) in group_results {
						results[idx] = Some(result);
					}
				}
				Err(e) => {
					tracing::error!(target: LOG_TARGET, error = %e, "Finder task failed");
				}
			}
		}

		results
			.into_iter()
			.map(|r| {
				r.unwrap_or_else(|| FinderResult {
					method: "exhausted".to_string(),
					error: Some("internal finder error".to_string()),
					..Default::default()
				})
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn patterns_generate_in_fixed_order() {
		let candidates = generate_candidates("Jane", "Smith", "company.com");
		let emails: Vec<&str> = candidates.iter().map(|c| c.email.as_str()).collect();
		assert_eq!(
			emails,
			vec![
				"jane.smith@company.com",
				"jsmith@company.com",
				"janes@company.com",
				"jane@company.com",
				"jane_smith@company.com",
				"jane-smith@company.com",
				"j.smith@company.com",
				"smithj@company.com",
				"smith.jane@company.com",
				"janesmith@company.com",
			]
		);
		let patterns: Vec<&str> = candidates.iter().map(|c| c.pattern.as_str()).collect();
		assert_eq!(
			patterns,
			vec![
				"first.last",
				"flast",
				"firstl",
				"first",
				"first_last",
				"first-last",
				"f.last",
				"lastf",
				"last.first",
				"firstlast",
			]
		);
	}

	#[test]
	fn duplicate_patterns_are_deduplicated_preserving_order() {
		// A single-letter first name makes "first.last" and "f.last"
		// collide, and "flast"/"firstlast" collide too.
		let candidates = generate_candidates("J", "Smith", "company.com");
		let emails: Vec<&str> = candidates.iter().map(|c| c.email.as_str()).collect();
		let mut deduped = emails.clone();
		deduped.dedup();
		assert_eq!(emails, deduped);
		assert!(emails.contains(&"j.smith@company.com"));
		assert_eq!(
			candidates
				.iter()
				.filter(|c| c.email == "j.smith@company.com")
				.count(),
			1
		);
	}

	#[test]
	fn candidates_are_lowercased_and_trimmed() {
		let candidates = generate_candidates("  Jane ", " SMITH ", "company.com");
		assert_eq!(candidates[0].email, "jane.smith@company.com");
	}
}
