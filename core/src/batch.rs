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

//! Batch verification with domain-first optimization.
//!
//! Unique domains are DNS-prewarmed in parallel, emails sharing a domain
//! serialize on a per-domain mutex (one SMTP dialogue per MX at a time),
//! and an outer semaphore bounds total concurrency. Output order always
//! matches input order, and a failure inside one item's verification never
//! fails the batch.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use crate::{CheckEmailInput, Reachability, Verifier, VerificationResult, LOG_TARGET};

/// Default concurrent SMTP dialogues for a batch.
pub const DEFAULT_CONCURRENCY: usize = 5;

fn domain_of(email: &str) -> String {
	email
		.trim()
		.rsplit_once('@')
		.map(|(_, d)| d.to_lowercase())
		.unwrap_or_default()
}

fn internal_error_result(email: &str, domain: String) -> VerificationResult {
	VerificationResult {
		email: email.to_string(),
		normalized: email.trim().to_lowercase(),
		reachability: Reachability::Unknown,
		is_deliverable: None,
		domain,
		error: Some("internal verification error".to_string()),
		..Default::default()
	}
}

impl Verifier {
	/// Verify a batch of emails. See the module docs for the concurrency
	/// contract; `template` carries the SMTP parameters shared by every
	/// item.
	pub async fn check_email_batch(
		&self,
		emails: &[String],
		template: &CheckEmailInput,
		concurrency: usize,
	) -> Vec<VerificationResult> {
		if emails.is_empty() {
			return Vec::new();
		}

		// Pre-warm DNS for every unique domain in parallel.
		let mut unique_domains: Vec<String> = emails
			.iter()
			.filter(|e| e.contains('@'))
			.map(|e| domain_of(e))
			.collect();
		unique_domains.sort();
		unique_domains.dedup();

		tracing::info!(
			target: LOG_TARGET,
			domains = unique_domains.len(),
			emails = emails.len(),
			"Pre-warming DNS cache for batch"
		);

		join_all(unique_domains.iter().map(|domain| async move {
			if self.domain_cache().get_dns(domain).is_none() {
				if let Ok(dns_info) = self.resolver().check_mx(domain).await {
					self.domain_cache().set_dns(domain, dns_info);
				}
			}
		}))
		.await;

		// One mutex per destination domain, one semaphore for the whole
		// batch.
		let domain_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>> =
			Arc::new(Mutex::new(HashMap::new()));
		let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

		let mut handles = Vec::with_capacity(emails.len());
		for email in emails.iter() {
			let verifier = self.clone();
			let domain_locks = Arc::clone(&domain_locks);
			let semaphore = Arc::clone(&semaphore);
			let email = email.clone();
			let mut input = template.clone();

			handles.push(tokio::spawn(async move {
				let domain = domain_of(&email);
				let lock = {
					let mut locks = domain_locks.lock().await;
					Arc::clone(locks.entry(domain).or_insert_with(|| Arc::new(Mutex::new(()))))
				};

				let _permit = semaphore
					.acquire_owned()
					.await
					.expect("Semaphore is never closed. qed.");
				let _domain_guard = lock.lock().await;

				input.to_email = email.clone();
				verifier.check_email(&input).await
			}));
		}

		// Collect in spawn order; a panicked task becomes a structured
		// unknown result instead of failing the batch.
		let mut results = Vec::with_capacity(emails.len());
		for (email, handle) in emails.iter().zip(handles) {
			match handle.await {
				Ok(result) => results.push(result),
				Err(e) => {
					tracing::error!(
						target: LOG_TARGET,
						email = %email,
						error = %e,
						"Verification task failed"
					);
					results.push(internal_error_result(email, domain_of(email)));
				}
			}
		}

		results
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn domain_extraction_handles_odd_inputs() {
		assert_eq!(domain_of("a@B.com"), "b.com");
		assert_eq!(domain_of("no-at-sign"), "");
		assert_eq!(domain_of(" a@x.org "), "x.org");
	}

	#[test]
	fn internal_error_result_shape() {
		let r = internal_error_result("boom@example.com", "example.com".to_string());
		assert_eq!(r.reachability, Reachability::Unknown);
		assert_eq!(r.error.as_deref(), Some("internal verification error"));
		assert_eq!(r.is_deliverable, None);
	}

	#[tokio::test]
	async fn batch_preserves_order_and_length() {
		use crate::domain_cache::DomainCache;
		use crate::mx::MxResolver;
		use std::time::Duration;

		// A short DNS timeout keeps the pre-warm phase fast when the test
		// environment has no resolver.
		let verifier = Arc::new(Verifier::with_parts(
			Arc::new(MxResolver::with_timeout(Duration::from_millis(200))),
			Arc::new(DomainCache::default()),
		));
		// Syntactically invalid addresses terminate before any network
		// I/O, so this exercises ordering without a live MX.
		let emails = vec![
			"bad1@".to_string(),
			"a@b".to_string(),
			"@nodomain.com".to_string(),
		];
		let input = CheckEmailInput::default();
		let results = verifier.check_email_batch(&emails, &input, 2).await;
		assert_eq!(results.len(), emails.len());
		for (email, result) in emails.iter().zip(&results) {
			assert_eq!(&result.email, email.trim());
			assert_eq!(result.reachability, Reachability::Invalid);
		}
	}

	#[tokio::test]
	async fn empty_batch_is_empty() {
		let verifier = Arc::new(Verifier::new());
		let results = verifier
			.check_email_batch(&[], &CheckEmailInput::default(), 5)
			.await;
		assert!(results.is_empty());
	}
}
