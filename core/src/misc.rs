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

//! Metadata classification: disposable, role-account and free-provider
//! lookups against frozen static sets.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::syntax::SyntaxDetails;

/// Local-part prefixes that denote role accounts rather than people.
const ROLE_PREFIXES: &[&str] = &[
	"abuse",
	"admin",
	"administrator",
	"billing",
	"careers",
	"contact",
	"customercare",
	"customerservice",
	"dev",
	"enquiries",
	"feedback",
	"finance",
	"ftp",
	"hello",
	"help",
	"helpdesk",
	"hostmaster",
	"hr",
	"info",
	"inquiries",
	"it",
	"jobs",
	"legal",
	"list",
	"mail",
	"mailer-daemon",
	"marketing",
	"media",
	"news",
	"newsletter",
	"no-reply",
	"noc",
	"noreply",
	"office",
	"postmaster",
	"press",
	"privacy",
	"root",
	"sales",
	"security",
	"service",
	"services",
	"subscribe",
	"support",
	"team",
	"unsubscribe",
	"webmaster",
	"www",
];

/// Domains of well-known free-mail providers.
const FREE_PROVIDERS: &[&str] = &[
	"163.com",
	"aol.com",
	"att.net",
	"bellsouth.net",
	"bigpond.com",
	"btinternet.com",
	"charter.net",
	"comcast.net",
	"cox.net",
	"daum.net",
	"earthlink.net",
	"fastmail.com",
	"free.fr",
	"freenet.de",
	"gmail.com",
	"gmx.com",
	"gmx.de",
	"gmx.net",
	"googlemail.com",
	"hotmail.co.uk",
	"hotmail.com",
	"hotmail.fr",
	"hushmail.com",
	"icloud.com",
	"laposte.net",
	"libero.it",
	"live.com",
	"mac.com",
	"mail.com",
	"mail.ru",
	"me.com",
	"msn.com",
	"naver.com",
	"orange.fr",
	"outlook.com",
	"proton.me",
	"protonmail.com",
	"qq.com",
	"rediffmail.com",
	"rogers.com",
	"sbcglobal.net",
	"sfr.fr",
	"sky.com",
	"t-online.de",
	"tiscali.it",
	"tutanota.com",
	"verizon.net",
	"virgilio.it",
	"virginmedia.com",
	"wanadoo.fr",
	"web.de",
	"yahoo.co.uk",
	"yahoo.com",
	"yahoo.fr",
	"yandex.com",
	"yandex.ru",
	"zoho.com",
];

static ROLE_SET: Lazy<HashSet<&'static str>> =
	Lazy::new(|| ROLE_PREFIXES.iter().copied().collect());

static FREE_SET: Lazy<HashSet<&'static str>> =
	Lazy::new(|| FREE_PROVIDERS.iter().copied().collect());

/// Miscellaneous metadata about an email address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MiscDetails {
	/// Is the domain a known disposable email address provider?
	pub is_disposable: bool,
	/// Is the local part a known role account prefix (info@, admin@, ...)?
	pub is_role_account: bool,
	/// Is the domain a known free-mail provider?
	pub is_free: bool,
}

/// Base domain (last two labels), used so `sub.tempmail.com` matches the
/// `tempmail.com` list entry.
fn base_domain(domain: &str) -> Option<String> {
	let parts: Vec<&str> = domain.split('.').collect();
	if parts.len() > 2 {
		Some(parts[parts.len() - 2..].join("."))
	} else {
		None
	}
}

/// Check if the domain is a known disposable provider. Delegates to the
/// mailchecker blocklist, checking both the full domain and the base domain.
pub fn is_disposable(domain: &str) -> bool {
	let domain = domain.to_lowercase();
	if !mailchecker::is_valid(&format!("probe@{}", domain)) {
		return true;
	}
	if let Some(base) = base_domain(&domain) {
		if !mailchecker::is_valid(&format!("probe@{}", base)) {
			return true;
		}
	}
	false
}

/// Check if the local part is a known role-account prefix.
pub fn is_role_account(local_part: &str) -> bool {
	ROLE_SET.contains(local_part.to_lowercase().as_str())
}

/// Check if the domain belongs to a known free-mail provider. Checks the
/// full domain, then the base domain.
pub fn is_free_provider(domain: &str) -> bool {
	let domain = domain.to_lowercase();
	if FREE_SET.contains(domain.as_str()) {
		return true;
	}
	if let Some(base) = base_domain(&domain) {
		return FREE_SET.contains(base.as_str());
	}
	false
}

/// Classify an address whose syntax already passed validation.
pub fn check_misc(syntax: &SyntaxDetails) -> MiscDetails {
	MiscDetails {
		is_disposable: is_disposable(&syntax.domain),
		is_role_account: is_role_account(&syntax.local_part),
		is_free: is_free_provider(&syntax.domain),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::syntax::check_syntax;

	#[test]
	fn should_flag_role_accounts() {
		assert!(is_role_account("info"));
		assert!(is_role_account("SUPPORT"));
		assert!(is_role_account("noreply"));
		assert!(!is_role_account("jane.smith"));
	}

	#[test]
	fn should_flag_free_providers() {
		assert!(is_free_provider("gmail.com"));
		assert!(is_free_provider("YAHOO.com"));
		// Subdomain resolves through the base domain.
		assert!(is_free_provider("mx.yahoo.com"));
		assert!(!is_free_provider("kadenwood.com"));
	}

	#[test]
	fn should_flag_disposable_domains() {
		assert!(is_disposable("yopmail.com"));
		assert!(is_disposable("mailinator.com"));
		assert!(!is_disposable("gmail.com"));
	}

	#[test]
	fn should_classify_from_syntax() {
		let syntax = check_syntax("info@gmail.com");
		let misc = check_misc(&syntax);
		assert!(misc.is_role_account);
		assert!(misc.is_free);
		assert!(!misc.is_disposable);
	}
}
