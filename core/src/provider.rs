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

//! Provider-specific verification routing.
//!
//! Different email providers behave differently over SMTP:
//! - Gmail / Google Workspace return a definitive 550 for bad mailboxes, so
//!   the catch-all probe is unnecessary.
//! - Yahoo and Microsoft 365 are standard SMTP; many M365 domains are
//!   catch-all, so the probe is worth it.
//! - Hotmail/Outlook.com (B2C) SMTP is unreliable for verification.

use serde::{Deserialize, Serialize};

/// Detected email provider type, derived from the first MX host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
	Gmail,
	GoogleWorkspace,
	Yahoo,
	Microsoft365,
	Hotmail,
	Generic,
}

impl Default for Provider {
	fn default() -> Self {
		Provider::Generic
	}
}

impl Provider {
	pub fn as_str(&self) -> &'static str {
		match self {
			Provider::Gmail => "gmail",
			Provider::GoogleWorkspace => "google_workspace",
			Provider::Yahoo => "yahoo",
			Provider::Microsoft365 => "microsoft365",
			Provider::Hotmail => "hotmail",
			Provider::Generic => "generic",
		}
	}

	/// Parse a provider tag as stored in the verification store.
	pub fn from_str_or_generic(s: &str) -> Self {
		match s {
			"gmail" => Provider::Gmail,
			"google_workspace" => Provider::GoogleWorkspace,
			"yahoo" => Provider::Yahoo,
			"microsoft365" => Provider::Microsoft365,
			"hotmail" => Provider::Hotmail,
			_ => Provider::Generic,
		}
	}

	/// The verification policy for this provider.
	pub fn policy(&self) -> &'static ProviderPolicy {
		match self {
			Provider::Gmail => &GMAIL_POLICY,
			Provider::GoogleWorkspace => &GOOGLE_WORKSPACE_POLICY,
			Provider::Yahoo => &YAHOO_POLICY,
			Provider::Microsoft365 => &MICROSOFT365_POLICY,
			Provider::Hotmail => &HOTMAIL_POLICY,
			Provider::Generic => &GENERIC_POLICY,
		}
	}
}

/// How to verify emails hosted at a given provider.
#[derive(Debug, Clone, Copy)]
pub struct ProviderPolicy {
	/// Whether to perform the SMTP handshake at all.
	pub do_smtp: bool,
	/// Whether to probe for a catch-all with a random local part.
	pub do_catch_all: bool,
	/// Whether to skip verification and mark the address risky outright.
	pub mark_risky: bool,
	pub notes: &'static str,
}

const GMAIL_POLICY: ProviderPolicy = ProviderPolicy {
	do_smtp: true,
	do_catch_all: false,
	mark_risky: false,
	notes: "Gmail always returns definitive 550 for nonexistent addresses",
};

const GOOGLE_WORKSPACE_POLICY: ProviderPolicy = ProviderPolicy {
	do_smtp: true,
	do_catch_all: false,
	mark_risky: false,
	notes: "Google Workspace returns definitive 550 for nonexistent addresses",
};

const YAHOO_POLICY: ProviderPolicy = ProviderPolicy {
	do_smtp: true,
	do_catch_all: true,
	mark_risky: false,
	notes: "Yahoo standard SMTP verification",
};

const MICROSOFT365_POLICY: ProviderPolicy = ProviderPolicy {
	do_smtp: true,
	do_catch_all: true,
	mark_risky: false,
	notes: "M365 B2B, many domains have catch-all enabled",
};

const HOTMAIL_POLICY: ProviderPolicy = ProviderPolicy {
	do_smtp: false,
	do_catch_all: false,
	mark_risky: true,
	notes: "Hotmail/Outlook.com B2C SMTP is unreliable, auto-mark risky",
};

const GENERIC_POLICY: ProviderPolicy = ProviderPolicy {
	do_smtp: true,
	do_catch_all: true,
	mark_risky: false,
	notes: "Generic provider, full SMTP plus catch-all probe",
};

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn google_family_skips_catch_all() {
		assert!(Provider::Gmail.policy().do_smtp);
		assert!(!Provider::Gmail.policy().do_catch_all);
		assert!(Provider::GoogleWorkspace.policy().do_smtp);
		assert!(!Provider::GoogleWorkspace.policy().do_catch_all);
	}

	#[test]
	fn hotmail_is_auto_risky() {
		let policy = Provider::Hotmail.policy();
		assert!(!policy.do_smtp);
		assert!(!policy.do_catch_all);
		assert!(policy.mark_risky);
	}

	#[test]
	fn generic_runs_everything() {
		let policy = Provider::Generic.policy();
		assert!(policy.do_smtp);
		assert!(policy.do_catch_all);
		assert!(!policy.mark_risky);
	}

	#[test]
	fn serde_tags_match_store_format() {
		for p in &[
			Provider::Gmail,
			Provider::GoogleWorkspace,
			Provider::Yahoo,
			Provider::Microsoft365,
			Provider::Hotmail,
			Provider::Generic,
		] {
			let json = serde_json::to_string(p).unwrap();
			assert_eq!(json, format!("\"{}\"", p.as_str()));
			assert_eq!(Provider::from_str_or_generic(p.as_str()), *p);
		}
	}
}
