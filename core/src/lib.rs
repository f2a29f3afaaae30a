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

//! `kadenverify` decides whether a mailbox is safely deliverable, risky,
//! undeliverable or indeterminate, without sending any email.
//!
//! Under the hood it runs a pipeline of checks against the address:
//! - Syntax validation: is the address well-formed?
//! - Metadata: disposable provider, role account, free-mail provider.
//! - DNS: does the domain have MX (or fallback A/AAAA) records, and which
//!   provider serves them?
//! - SMTP: connect to the mail exchanger and probe `RCPT TO` without ever
//!   sending `DATA`.
//! - Catch-all: probe a random local part to detect accept-everything
//!   domains, and score those addresses with name/pattern heuristics.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kadenverify::{CheckEmailInputBuilder, Verifier};
//!
//! async fn check() {
//!     let verifier = Arc::new(Verifier::new());
//!     let input = CheckEmailInputBuilder::default()
//!         .to_email("someone@gmail.com".to_string())
//!         .build()
//!         .unwrap();
//!
//!     let result = verifier.check_email(&input).await;
//!     println!("{}", serde_json::to_string(&result).unwrap());
//! }
//! ```

pub mod batch;
pub mod catchall;
pub mod domain_cache;
pub mod enrichment;
pub mod finder;
pub mod misc;
pub mod mx;
pub mod provider;
pub mod smtp;
pub mod syntax;
pub mod tiered;
mod util;

use std::sync::Arc;
use std::sync::Once;

use chrono::Utc;
use rustls::crypto::ring;

use domain_cache::DomainCache;
use misc::{check_misc, MiscDetails};
use mx::MxResolver;
use smtp::SmtpResponse;
use syntax::check_syntax;

pub use util::input_output::*;

/// The target for kadenverify tracing events.
pub const LOG_TARGET: &str = "kadenverify";

static INIT: Once = Once::new();

/// kadenverify uses rustls for its TLS connections. This function installs
/// the default ring crypto provider, once per process.
pub fn initialize_crypto_provider() {
	INIT.call_once(|| {
		let _ = ring::default_provider().install_default();
	});
}

/// Compute reachability and deliverability from the verification signals.
///
/// Returns `(reachability, is_deliverable)`.
fn score(
	smtp_result: Option<&SmtpResponse>,
	is_catch_all: Option<bool>,
	misc: &MiscDetails,
	provider_mark_risky: bool,
) -> (Reachability, Option<bool>) {
	// Provider auto-marked risky (Hotmail B2C).
	if provider_mark_risky {
		return (Reachability::Risky, None);
	}

	let smtp = match smtp_result {
		Some(smtp) => smtp,
		None => return (Reachability::Unknown, None),
	};

	// A blocklisted probe tells us nothing about the mailbox.
	if smtp.is_blacklisted {
		return (Reachability::Unknown, None);
	}

	// Connection failure.
	if smtp.code == 0 {
		return (Reachability::Unknown, None);
	}

	if smtp.is_invalid {
		return (Reachability::Invalid, Some(false));
	}

	if smtp.is_disabled {
		return (Reachability::Invalid, Some(false));
	}

	// Temporary rejection: can't be sure either way.
	if smtp.is_greylisted {
		return (Reachability::Risky, None);
	}

	// The user exists but can't receive right now.
	if smtp.is_full_inbox {
		return (Reachability::Risky, Some(true));
	}

	if (200..300).contains(&smtp.code) {
		// Accepted by a catch-all proves nothing.
		if is_catch_all == Some(true) {
			return (Reachability::Risky, None);
		}
		if misc.is_disposable {
			return (Reachability::Risky, Some(true));
		}
		if misc.is_role_account {
			return (Reachability::Risky, Some(true));
		}
		return (Reachability::Safe, Some(true));
	}

	if (500..600).contains(&smtp.code) {
		return (Reachability::Invalid, Some(false));
	}

	if (400..500).contains(&smtp.code) {
		return (Reachability::Risky, None);
	}

	(Reachability::Unknown, None)
}

/// The verification engine: one long-lived instance owning the DNS
/// resolver and the domain intelligence cache. Cloning shares both.
#[derive(Debug, Clone)]
pub struct Verifier {
	resolver: Arc<MxResolver>,
	domain_cache: Arc<DomainCache>,
}

impl Default for Verifier {
	fn default() -> Self {
		Self::new()
	}
}

impl Verifier {
	pub fn new() -> Self {
		Verifier {
			resolver: Arc::new(MxResolver::new()),
			domain_cache: Arc::new(DomainCache::default()),
		}
	}

	pub fn with_parts(resolver: Arc<MxResolver>, domain_cache: Arc<DomainCache>) -> Self {
		Verifier {
			resolver,
			domain_cache,
		}
	}

	pub fn resolver(&self) -> &Arc<MxResolver> {
		&self.resolver
	}

	pub fn domain_cache(&self) -> &Arc<DomainCache> {
		&self.domain_cache
	}

	/// Verify a single email through the full pipeline: syntax ->
	/// metadata -> DNS (cached) -> provider routing -> SMTP -> catch-all
	/// -> scoring.
	pub async fn check_email(&self, input: &CheckEmailInput) -> VerificationResult {
		initialize_crypto_provider();
		let email = input.to_email.trim();

		tracing::debug!(target: LOG_TARGET, email=%email, "Checking email");

		// Step 1: syntax.
		let syntax = check_syntax(email);
		if !syntax.is_valid_syntax {
			return VerificationResult {
				email: email.to_string(),
				normalized: email.to_lowercase(),
				reachability: Reachability::Invalid,
				is_deliverable: Some(false),
				error: Some(format!("syntax: {}", syntax.reason)),
				verified_at: Utc::now(),
				..Default::default()
			};
		}

		tracing::debug!(target: LOG_TARGET, email=%email, syntax=?syntax, "Found syntax validation");

		// Step 2: metadata.
		let misc = check_misc(&syntax);

		// Step 3: DNS, through the domain cache.
		let dns_info = match self.domain_cache.get_dns(&syntax.domain) {
			Some(cached) => cached,
			None => match self.resolver.check_mx(&syntax.domain).await {
				Ok(dns_info) => {
					self.domain_cache.set_dns(&syntax.domain, dns_info.clone());
					dns_info
				}
				Err(e) => {
					// Internal resolver failure; should be rare.
					return VerificationResult {
						email: email.to_string(),
						normalized: syntax.normalized.clone(),
						reachability: Reachability::Unknown,
						is_disposable: misc.is_disposable,
						is_role: misc.is_role_account,
						is_free: misc.is_free,
						domain: syntax.domain.clone(),
						error: Some(format!("dns lookup failed: {}", e)),
						verified_at: Utc::now(),
						..Default::default()
					};
				}
			},
		};

		if !dns_info.has_mx {
			return VerificationResult {
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
				verified_at: Utc::now(),
				..Default::default()
			};
		}

		tracing::debug!(
			target: LOG_TARGET,
			email=%email,
			mx_hosts=?dns_info.mx_hosts,
			provider=?dns_info.provider,
			"Found MX hosts"
		);

		let mx_host = dns_info.mx_hosts[0].clone();
		let provider = dns_info.provider;
		let policy = provider.policy();

		// Steps 4-6: provider routing drives SMTP and the catch-all probe.
		let mut smtp_result: Option<SmtpResponse> = None;
		let mut is_catch_all: Option<bool> = None;

		if policy.do_smtp {
			let response = smtp::check_smtp(&syntax.normalized, &mx_host, input).await;

			if policy.do_catch_all && response.code >= 200 {
				is_catch_all = if self.domain_cache.has_catch_all(&syntax.domain) {
					self.domain_cache.get_catch_all(&syntax.domain)
				} else {
					let probed =
						smtp::check_catch_all(&syntax.domain, &mx_host, input).await;
					self.domain_cache.set_catch_all(&syntax.domain, probed);
					probed
				};
			}

			smtp_result = Some(response);
		}

		// Step 7: scoring.
		let (reachability, is_deliverable) =
			score(smtp_result.as_ref(), is_catch_all, &misc, policy.mark_risky);

		VerificationResult {
			email: email.to_string(),
			normalized: syntax.normalized.clone(),
			reachability,
			is_deliverable,
			is_catch_all,
			is_disposable: misc.is_disposable,
			is_role: misc.is_role_account,
			is_free: misc.is_free,
			mx_host,
			smtp_code: smtp_result.as_ref().map(|r| r.code).unwrap_or(0),
			smtp_message: smtp_result
				.as_ref()
				.map(|r| r.message.clone())
				.unwrap_or_default(),
			provider,
			domain: syntax.domain.clone(),
			verified_at: Utc::now(),
			error: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::smtp::parse_smtp_response;

	fn misc_clean() -> MiscDetails {
		MiscDetails::default()
	}

	#[test]
	fn mark_risky_overrides_everything() {
		let smtp = parse_smtp_response(250, "OK");
		let (reach, deliv) = score(Some(&smtp), Some(false), &misc_clean(), true);
		assert_eq!(reach, Reachability::Risky);
		assert_eq!(deliv, None);
	}

	#[test]
	fn no_smtp_result_is_unknown() {
		let (reach, deliv) = score(None, None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Unknown);
		assert_eq!(deliv, None);
	}

	#[test]
	fn code_zero_is_unknown() {
		let smtp = SmtpResponse::no_response("connection timeout");
		let (reach, _) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Unknown);
	}

	#[test]
	fn blacklisted_is_unknown() {
		let smtp = parse_smtp_response(554, "listed on spamhaus blocklist");
		assert!(smtp.is_blacklisted);
		let (reach, _) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Unknown);
	}

	#[test]
	fn invalid_flag_is_invalid_not_deliverable() {
		let smtp = parse_smtp_response(550, "user unknown");
		let (reach, deliv) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Invalid);
		assert_eq!(deliv, Some(false));
	}

	#[test]
	fn disabled_flag_is_invalid() {
		let smtp = parse_smtp_response(550, "account has been disabled by provider");
		assert!(smtp.is_disabled);
		let (reach, deliv) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Invalid);
		assert_eq!(deliv, Some(false));
	}

	#[test]
	fn greylisted_is_risky_unknown_deliverability() {
		let smtp = parse_smtp_response(451, "greylisted, try again later");
		let (reach, deliv) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Risky);
		assert_eq!(deliv, None);
	}

	#[test]
	fn full_inbox_is_risky_but_deliverable() {
		let smtp = parse_smtp_response(552, "mailbox full, quota exceeded");
		let (reach, deliv) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Risky);
		assert_eq!(deliv, Some(true));
	}

	#[test]
	fn accepted_on_catch_all_is_risky() {
		let smtp = parse_smtp_response(250, "OK");
		let (reach, deliv) = score(Some(&smtp), Some(true), &misc_clean(), false);
		assert_eq!(reach, Reachability::Risky);
		assert_eq!(deliv, None);
	}

	#[test]
	fn accepted_disposable_or_role_is_risky_deliverable() {
		let smtp = parse_smtp_response(250, "OK");

		let mut misc = misc_clean();
		misc.is_disposable = true;
		let (reach, deliv) = score(Some(&smtp), Some(false), &misc, false);
		assert_eq!(reach, Reachability::Risky);
		assert_eq!(deliv, Some(true));

		let mut misc = misc_clean();
		misc.is_role_account = true;
		let (reach, deliv) = score(Some(&smtp), Some(false), &misc, false);
		assert_eq!(reach, Reachability::Risky);
		assert_eq!(deliv, Some(true));
	}

	#[test]
	fn clean_acceptance_is_safe() {
		let smtp = parse_smtp_response(250, "2.1.5 OK");
		let (reach, deliv) = score(Some(&smtp), Some(false), &misc_clean(), false);
		assert_eq!(reach, Reachability::Safe);
		assert_eq!(deliv, Some(true));
	}

	#[test]
	fn default_5xx_is_invalid_and_default_4xx_is_risky() {
		let smtp = parse_smtp_response(554, "transaction failed");
		let (reach, deliv) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Invalid);
		assert_eq!(deliv, Some(false));

		// A 4xx that dodged every pattern would still default to greylist
		// in the parser; build one artificially to check the scoring fall
		// through.
		let smtp = SmtpResponse {
			code: 430,
			message: "odd".to_string(),
			..Default::default()
		};
		let (reach, deliv) = score(Some(&smtp), None, &misc_clean(), false);
		assert_eq!(reach, Reachability::Risky);
		assert_eq!(deliv, None);
	}

	#[tokio::test]
	async fn syntax_failure_short_circuits() {
		let verifier = Verifier::new();
		let input = CheckEmailInputBuilder::default()
			.to_email("a@b".to_string())
			.build()
			.unwrap();
		let result = verifier.check_email(&input).await;
		assert_eq!(result.reachability, Reachability::Invalid);
		assert_eq!(result.is_deliverable, Some(false));
		assert_eq!(
			result.error.as_deref(),
			Some("syntax: domain must have at least one dot")
		);
	}
}
