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

//! RFC 5322 syntax validation (dot-atom subset, no quoted strings) with
//! provider-aware normalization.

use serde::{Deserialize, Serialize};

/// The canonical free-mail domain whose local parts ignore dots and
/// plus-suffixes.
pub const GMAIL_DOMAIN: &str = "gmail.com";

/// Alias domain mapped onto [GMAIL_DOMAIN] during normalization.
pub const GMAIL_ALIAS_DOMAIN: &str = "googlemail.com";

/// Details about the syntax of an email address.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyntaxDetails {
	/// Whether the address passed the syntax checks.
	pub is_valid_syntax: bool,
	/// Reason the address was rejected, empty when valid.
	pub reason: String,
	/// The local part of the address, as given (untouched case).
	pub local_part: String,
	/// The domain of the address, lowercased, alias-mapped.
	pub domain: String,
	/// The normalized form used as cache/store key. For the canonical
	/// free-mail provider, dots are stripped from the local part and
	/// everything at and after `+` is removed.
	pub normalized: String,
}

impl SyntaxDetails {
	fn invalid(reason: &str) -> Self {
		SyntaxDetails {
			is_valid_syntax: false,
			reason: reason.to_string(),
			..Default::default()
		}
	}
}

fn is_atext(c: char) -> bool {
	c.is_ascii_alphanumeric()
		|| matches!(
			c,
			'!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '='
				| '?' | '^' | '_' | '`' | '{' | '|' | '}' | '~'
		)
}

fn is_valid_label(label: &str) -> bool {
	let bytes = label.as_bytes();
	if bytes.is_empty() {
		return false;
	}
	if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
		return false;
	}
	label
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Normalize a (local part, domain) pair into the canonical cache key.
pub fn normalize(local_part: &str, domain: &str) -> String {
	let domain = domain.to_lowercase();
	let domain = if domain == GMAIL_ALIAS_DOMAIN {
		GMAIL_DOMAIN.to_string()
	} else {
		domain
	};

	let normalized_local = if domain == GMAIL_DOMAIN {
		let no_dots: String = local_part.chars().filter(|c| *c != '.').collect();
		let base = no_dots.split('+').next().unwrap_or_default().to_string();
		base.to_lowercase()
	} else {
		local_part.to_lowercase()
	};

	format!("{}@{}", normalized_local, domain)
}

/// Validate email syntax per RFC 5322 (simplified, no quoted strings).
///
/// Checks total length (<= 254), local part length (<= 64), domain length
/// (<= 255), consecutive or leading/trailing dots in the local part, the
/// dot-atom character set, domain labels, and the TLD. On success the
/// returned details carry the normalized form of the address.
pub fn check_syntax(email: &str) -> SyntaxDetails {
	let email = email.trim();

	if email.is_empty() {
		return SyntaxDetails::invalid("empty email");
	}
	if email.len() > 254 {
		return SyntaxDetails::invalid("total length exceeds 254");
	}
	if email.matches('@').count() != 1 {
		return SyntaxDetails::invalid("must contain exactly one @");
	}

	let (local_part, raw_domain) = email
		.rsplit_once('@')
		.expect("We checked there is exactly one @. qed.");
	let local_part = local_part.trim();
	let domain = raw_domain.trim().to_lowercase();
	let domain = if domain == GMAIL_ALIAS_DOMAIN {
		GMAIL_DOMAIN.to_string()
	} else {
		domain
	};

	if local_part.is_empty() {
		return SyntaxDetails::invalid("empty local part");
	}
	if local_part.len() > 64 {
		return SyntaxDetails::invalid("local part exceeds 64 characters");
	}
	if domain.is_empty() {
		return SyntaxDetails::invalid("empty domain");
	}
	if domain.len() > 255 {
		return SyntaxDetails::invalid("domain exceeds 255 characters");
	}
	if local_part.contains("..") {
		return SyntaxDetails::invalid("consecutive dots in local part");
	}
	if local_part.starts_with('.') || local_part.ends_with('.') {
		return SyntaxDetails::invalid("leading or trailing dot in local part");
	}
	if local_part.starts_with('"') || local_part.ends_with('"') {
		return SyntaxDetails::invalid("quoted strings not supported");
	}
	if !local_part.chars().all(|c| is_atext(c) || c == '.') {
		return SyntaxDetails::invalid("invalid characters in local part");
	}

	let labels: Vec<&str> = domain.split('.').collect();
	if labels.len() < 2 {
		return SyntaxDetails::invalid("domain must have at least one dot");
	}

	let tld = labels[labels.len() - 1];
	if tld.len() < 2 {
		return SyntaxDetails::invalid("TLD too short");
	}
	if !tld.chars().all(|c| c.is_ascii_alphabetic()) {
		return SyntaxDetails::invalid("TLD must be alphabetic");
	}

	for label in &labels {
		if label.is_empty() {
			return SyntaxDetails::invalid("empty domain label");
		}
		if label.len() > 63 {
			return SyntaxDetails::invalid("domain label exceeds 63 characters");
		}
		if !is_valid_label(label) {
			return SyntaxDetails {
				is_valid_syntax: false,
				reason: format!("invalid domain label: {}", label),
				..Default::default()
			};
		}
	}

	let normalized = normalize(local_part, &domain);

	SyntaxDetails {
		is_valid_syntax: true,
		reason: String::new(),
		local_part: local_part.to_string(),
		domain,
		normalized,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn should_accept_simple_address() {
		let s = check_syntax("john.doe@company.com");
		assert!(s.is_valid_syntax);
		assert_eq!(s.local_part, "john.doe");
		assert_eq!(s.domain, "company.com");
		assert_eq!(s.normalized, "john.doe@company.com");
	}

	#[test]
	fn should_reject_missing_tld() {
		let s = check_syntax("a@b");
		assert!(!s.is_valid_syntax);
		assert_eq!(s.reason, "domain must have at least one dot");
	}

	#[test]
	fn should_reject_empty_and_malformed() {
		assert_eq!(check_syntax("").reason, "empty email");
		assert_eq!(check_syntax("no-at-sign").reason, "must contain exactly one @");
		assert_eq!(check_syntax("a@@b.com").reason, "must contain exactly one @");
		assert_eq!(check_syntax("@b.com").reason, "empty local part");
		assert_eq!(
			check_syntax("a..b@company.com").reason,
			"consecutive dots in local part"
		);
		assert_eq!(
			check_syntax(".a@company.com").reason,
			"leading or trailing dot in local part"
		);
		assert_eq!(
			check_syntax("\"quoted\"@company.com").reason,
			"quoted strings not supported"
		);
		assert_eq!(
			check_syntax("a b@company.com").reason,
			"invalid characters in local part"
		);
		assert_eq!(check_syntax("a@company.c").reason, "TLD too short");
		assert_eq!(check_syntax("a@company.c0m").reason, "TLD must be alphabetic");
		assert_eq!(
			check_syntax("a@-bad-.com").reason,
			"invalid domain label: -bad-"
		);
	}

	#[test]
	fn should_reject_overlong_parts() {
		let long_local = format!("{}@b.com", "a".repeat(65));
		assert_eq!(check_syntax(&long_local).reason, "local part exceeds 64 characters");

		let long_total = format!("a@{}.com", "b".repeat(260));
		assert_eq!(check_syntax(&long_total).reason, "total length exceeds 254");
	}

	#[test]
	fn should_normalize_gmail_dots_and_plus() {
		let s = check_syntax("John.Doe+newsletter@Gmail.com");
		assert!(s.is_valid_syntax);
		assert_eq!(s.normalized, "johndoe@gmail.com");
	}

	#[test]
	fn should_map_googlemail_alias() {
		let s = check_syntax("john.doe@googlemail.com");
		assert!(s.is_valid_syntax);
		assert_eq!(s.domain, "gmail.com");
		assert_eq!(s.normalized, "johndoe@gmail.com");
	}

	#[test]
	fn should_keep_dots_outside_gmail() {
		let s = check_syntax("John.Doe@Company.com");
		assert!(s.is_valid_syntax);
		assert_eq!(s.normalized, "john.doe@company.com");
	}

	#[test]
	fn normalize_is_idempotent() {
		for email in &[
			"john.doe+x@gmail.com",
			"jane@company.com",
			"UP.case@GoogleMail.com",
		] {
			let once = check_syntax(email);
			assert!(once.is_valid_syntax);
			let twice = check_syntax(&once.normalized);
			assert!(twice.is_valid_syntax);
			assert_eq!(once.normalized, twice.normalized);
		}
	}
}
