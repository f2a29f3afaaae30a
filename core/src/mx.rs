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

//! Async MX lookup with A/AAAA fallback and provider fingerprinting.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::provider::Provider;
use crate::syntax::{GMAIL_ALIAS_DOMAIN, GMAIL_DOMAIN};
use crate::util::ser_with_display::ser_with_display;
use crate::LOG_TARGET;

/// Default DNS timeout.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(10);

/// DNS lookup results for a domain.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MxDetails {
	/// Mail exchanger hostnames, ordered by ascending preference. When the
	/// domain has no MX records, these are A/AAAA fallback targets.
	pub mx_hosts: Vec<String>,
	/// Whether any MX/A/AAAA target was found.
	pub has_mx: bool,
	/// Provider tag derived from the first MX host.
	pub provider: Provider,
	/// The domain that was looked up.
	pub domain: String,
}

/// Error while resolving MX records.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum MxError {
	/// Error from the DNS resolver.
	#[error("DNS resolution error: {0}")]
	#[serde(serialize_with = "ser_with_display")]
	Resolve(ResolveError),
}

/// Detect the email provider from MX hostnames.
///
/// Checks the highest-priority (first) MX host against known patterns. The
/// source domain distinguishes Gmail personal from Google Workspace on the
/// same MX family.
pub fn detect_provider(mx_hosts: &[String], domain: &str) -> Provider {
	let domain = domain.to_lowercase();
	let domain = domain.trim_end_matches('.');

	for mx in mx_hosts {
		let mx = mx.to_lowercase();
		let mx = mx.trim_end_matches('.');

		// Google (Gmail / Google Workspace)
		if mx.ends_with(".google.com") || mx.ends_with(".googlemail.com") {
			if domain == GMAIL_DOMAIN || domain == GMAIL_ALIAS_DOMAIN {
				return Provider::Gmail;
			}
			return Provider::GoogleWorkspace;
		}

		// Yahoo
		if mx.ends_with(".yahoodns.net") {
			return Provider::Yahoo;
		}

		// Microsoft: distinguish B2B (M365) from B2C (Hotmail/Outlook.com)
		if mx.ends_with(".protection.outlook.com") {
			if mx.contains(".olc.protection.outlook.com") {
				return Provider::Hotmail;
			}
			return Provider::Microsoft365;
		}

		// Outlook.com direct MX
		if mx.ends_with(".hotmail.com") || mx.ends_with(".outlook.com") {
			return Provider::Hotmail;
		}
	}

	Provider::Generic
}

fn is_no_records(err: &ResolveError) -> bool {
	matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

/// A process-wide DNS resolver with an in-memory cache. Constructed once at
/// startup and passed down; never a hidden global.
pub struct MxResolver {
	resolver: TokioAsyncResolver,
}

impl std::fmt::Debug for MxResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MxResolver").finish()
	}
}

impl MxResolver {
	/// Create a resolver using the system configuration when available,
	/// falling back to Google public DNS.
	pub fn new() -> Self {
		Self::with_timeout(DNS_TIMEOUT)
	}

	pub fn with_timeout(timeout: Duration) -> Self {
		let (config, mut opts) = hickory_resolver::system_conf::read_system_conf()
			.unwrap_or_else(|_| (ResolverConfig::google(), ResolverOpts::default()));
		opts.timeout = timeout;
		opts.cache_size = 4096;
		let resolver = TokioAsyncResolver::tokio(config, opts);
		MxResolver { resolver }
	}

	/// Look up MX records for a domain, falling back to A then AAAA.
	///
	/// The returned hosts are sorted by preference (lowest number first).
	/// `NoRecordsFound` falls through to the next record type; other
	/// resolver errors (timeouts, server failures) are returned as-is.
	pub async fn check_mx(&self, domain: &str) -> Result<MxDetails, MxError> {
		let mut mx_hosts: Vec<String> = Vec::new();

		match self.resolver.mx_lookup(domain).await {
			Ok(lookup) => {
				let mut records: Vec<_> = lookup.iter().cloned().collect();
				records.sort_by_key(|r| r.preference());
				mx_hosts = records
					.iter()
					.map(|r| r.exchange().to_string().trim_end_matches('.').to_string())
					.collect();
			}
			Err(e) if is_no_records(&e) => {
				tracing::debug!(target: LOG_TARGET, domain=%domain, error=%e, "MX lookup returned no records");
			}
			Err(e) => return Err(MxError::Resolve(e)),
		}

		if mx_hosts.is_empty() {
			match self.resolver.ipv4_lookup(domain).await {
				Ok(lookup) => {
					mx_hosts = lookup.iter().map(|a| a.to_string()).collect();
				}
				Err(e) if is_no_records(&e) => {
					tracing::debug!(target: LOG_TARGET, domain=%domain, error=%e, "A lookup returned no records");
				}
				Err(e) => return Err(MxError::Resolve(e)),
			}
		}

		if mx_hosts.is_empty() {
			match self.resolver.ipv6_lookup(domain).await {
				Ok(lookup) => {
					mx_hosts = lookup.iter().map(|a| a.to_string()).collect();
				}
				Err(e) if is_no_records(&e) => {
					tracing::debug!(target: LOG_TARGET, domain=%domain, error=%e, "AAAA lookup returned no records");
				}
				Err(e) => return Err(MxError::Resolve(e)),
			}
		}

		let has_mx = !mx_hosts.is_empty();
		let provider = if has_mx {
			detect_provider(&mx_hosts, domain)
		} else {
			Provider::Generic
		};

		Ok(MxDetails {
			mx_hosts,
			has_mx,
			provider,
			domain: domain.to_string(),
		})
	}
}

impl Default for MxResolver {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hosts(list: &[&str]) -> Vec<String> {
		list.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn gmail_mx_with_gmail_domain_is_gmail() {
		let mx = hosts(&["gmail-smtp-in.l.google.com"]);
		assert_eq!(detect_provider(&mx, "gmail.com"), Provider::Gmail);
	}

	#[test]
	fn gmail_mx_with_alias_domain_is_gmail() {
		let mx = hosts(&["gmail-smtp-in.l.google.com"]);
		assert_eq!(detect_provider(&mx, "googlemail.com"), Provider::Gmail);
	}

	#[test]
	fn google_mx_with_custom_domain_is_workspace() {
		let mx = hosts(&["aspmx.l.google.com"]);
		assert_eq!(
			detect_provider(&mx, "kadenwood.com"),
			Provider::GoogleWorkspace
		);
	}

	#[test]
	fn yahoo_mx_is_yahoo() {
		let mx = hosts(&["mta5.am0.yahoodns.net"]);
		assert_eq!(detect_provider(&mx, "yahoo.com"), Provider::Yahoo);
	}

	#[test]
	fn protection_outlook_is_microsoft365() {
		let mx = hosts(&["company-com.mail.protection.outlook.com"]);
		assert_eq!(detect_provider(&mx, "company.com"), Provider::Microsoft365);
	}

	#[test]
	fn olc_protection_outlook_is_hotmail() {
		let mx = hosts(&["outlook-com.olc.protection.outlook.com"]);
		assert_eq!(detect_provider(&mx, "outlook.com"), Provider::Hotmail);
	}

	#[test]
	fn direct_hotmail_mx_is_hotmail() {
		let mx = hosts(&["mx1.hotmail.com"]);
		assert_eq!(detect_provider(&mx, "hotmail.com"), Provider::Hotmail);
	}

	#[test]
	fn unknown_mx_is_generic() {
		let mx = hosts(&["mail.custom-server.net"]);
		assert_eq!(detect_provider(&mx, "custom-server.net"), Provider::Generic);
	}

	#[test]
	fn trailing_dots_are_ignored() {
		let mx = hosts(&["ASPMX.L.GOOGLE.COM."]);
		assert_eq!(
			detect_provider(&mx, "kadenwood.com."),
			Provider::GoogleWorkspace
		);
	}
}
