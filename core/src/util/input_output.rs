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

use async_smtp::{ClientSecurity, ClientTlsParameters};
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::provider::Provider;

/// Define how to apply TLS to a SMTP client connection. Will be converted
/// into async_smtp::ClientSecurity.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub enum SmtpSecurity {
	/// Insecure connection only (for testing purposes).
	None,
	/// Start with insecure connection and use `STARTTLS` when available.
	Opportunistic,
	/// Start with insecure connection and require `STARTTLS`.
	Required,
	/// Use TLS wrapped connection.
	Wrapper,
}

impl Default for SmtpSecurity {
	fn default() -> Self {
		Self::Opportunistic
	}
}

impl SmtpSecurity {
	pub fn to_client_security(self, tls_params: ClientTlsParameters) -> ClientSecurity {
		match self {
			Self::None => ClientSecurity::None,
			Self::Opportunistic => ClientSecurity::Opportunistic(tls_params),
			Self::Required => ClientSecurity::Required(tls_params),
			Self::Wrapper => ClientSecurity::Wrapper(tls_params),
		}
	}
}

/// Builder-pattern input for the verification functions.
#[derive(Builder, Debug, Clone, Deserialize, Serialize)]
#[builder(default)]
pub struct CheckEmailInput {
	/// The email to verify.
	pub to_email: String,
	/// Address used in the `MAIL FROM:` command. No mail is ever sent.
	pub from_email: String,
	/// Name used in the `EHLO` command.
	pub hello_name: String,
	/// SMTP port, almost always 25 for MX-facing verification.
	pub smtp_port: u16,
	/// TLS behavior for the dialogue.
	pub smtp_security: SmtpSecurity,
	/// TCP connect timeout.
	pub connect_timeout: Duration,
	/// Per-command timeout (covers each read and write).
	pub command_timeout: Duration,
	/// Hard cap on a whole dialogue attempt. None disables the cap.
	pub smtp_timeout: Option<Duration>,
	/// Delay before retrying after a greylist response.
	pub greylist_delay: Duration,
	/// How many times to retry a greylisted attempt.
	pub greylist_retries: usize,
}

impl Default for CheckEmailInput {
	fn default() -> Self {
		CheckEmailInput {
			to_email: String::new(),
			from_email: "verify@kadenwood.com".into(),
			hello_name: "verify.kadenwood.com".into(),
			smtp_port: 25,
			smtp_security: SmtpSecurity::default(),
			connect_timeout: Duration::from_secs(10),
			command_timeout: Duration::from_secs(10),
			smtp_timeout: Some(Duration::from_secs(45)),
			greylist_delay: Duration::from_secs(35),
			greylist_retries: 2,
		}
	}
}

/// How confident we are that the recipient address is real.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
	/// The email is safe to send.
	Safe,
	/// The address appears to exist but has quality issues (catch-all,
	/// disposable, role account, full inbox, greylisting).
	Risky,
	/// The address doesn't exist or is syntactically invalid. Do not send.
	Invalid,
	/// We couldn't get a usable answer from the recipient's server.
	Unknown,
}

impl Default for Reachability {
	fn default() -> Self {
		Reachability::Unknown
	}
}

impl Reachability {
	pub fn as_str(&self) -> &'static str {
		match self {
			Reachability::Safe => "safe",
			Reachability::Risky => "risky",
			Reachability::Invalid => "invalid",
			Reachability::Unknown => "unknown",
		}
	}

	pub fn from_str_or_unknown(s: &str) -> Self {
		match s {
			"safe" => Reachability::Safe,
			"risky" => Reachability::Risky,
			"invalid" => Reachability::Invalid,
			_ => Reachability::Unknown,
		}
	}
}

/// Complete verification result for one email address. This is also the
/// row shape persisted by the verification store, keyed by `normalized`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VerificationResult {
	/// The address as the caller supplied it.
	pub email: String,
	/// Canonical form (lowercased; dot/plus-stripped for the canonical
	/// free provider). Cache and store key.
	pub normalized: String,
	pub reachability: Reachability,
	/// Tri-state: None when we could not tell.
	pub is_deliverable: Option<bool>,
	/// Tri-state: None when the probe was skipped or indeterminate.
	pub is_catch_all: Option<bool>,
	pub is_disposable: bool,
	pub is_role: bool,
	pub is_free: bool,
	pub mx_host: String,
	pub smtp_code: u16,
	pub smtp_message: String,
	pub provider: Provider,
	pub domain: String,
	/// Always UTC. Backends that store naive timestamps must re-attach
	/// UTC on read.
	pub verified_at: DateTime<Utc>,
	pub error: Option<String>,
}

impl Default for VerificationResult {
	fn default() -> Self {
		VerificationResult {
			email: String::new(),
			normalized: String::new(),
			reachability: Reachability::Unknown,
			is_deliverable: None,
			is_catch_all: None,
			is_disposable: false,
			is_role: false,
			is_free: false,
			mx_host: String::new(),
			smtp_code: 0,
			smtp_message: String::new(),
			provider: Provider::Generic,
			domain: String::new(),
			verified_at: Utc::now(),
			error: None,
		}
	}
}

impl VerificationResult {
	/// Convert to the OmniVerifier-compatible response shape.
	///
	/// The `result` field maps safe→deliverable, invalid→undeliverable,
	/// risky+catch-all→accept_all, risky→risky, else unknown; `status`
	/// follows the same partition with valid/invalid/catch_all/risky/
	/// unknown. Boolean fields are emitted under both historical naming
	/// conventions.
	pub fn to_omni(&self) -> serde_json::Value {
		let catch_all = self.is_catch_all.unwrap_or(false);
		let (result, status) = match self.reachability {
			Reachability::Safe => ("deliverable", "valid"),
			Reachability::Invalid => ("undeliverable", "invalid"),
			Reachability::Risky => {
				if catch_all {
					("accept_all", "catch_all")
				} else {
					("risky", "risky")
				}
			}
			Reachability::Unknown => {
				if catch_all {
					("accept_all", "catch_all")
				} else {
					("unknown", "unknown")
				}
			}
		};

		let mx_records: Vec<&str> = if self.mx_host.is_empty() {
			vec![]
		} else {
			vec![self.mx_host.as_str()]
		};

		json!({
			"email": self.email,
			"result": result,
			"status": status,
			"reason": self
				.error
				.clone()
				.unwrap_or_else(|| self.reachability.as_str().to_string()),
			"is_disposable": self.is_disposable,
			"is_role": self.is_role,
			"is_free": self.is_free,
			"mx_records": mx_records,
			"is_valid": self.reachability == Reachability::Safe,
			"is_catchall": catch_all,
			"mx_found": !self.mx_host.is_empty(),
			"smtp_check": self.smtp_code > 0,
			// Aliases kept for historical clients.
			"disposable": self.is_disposable,
			"role_account": self.is_role,
			"free_provider": self.is_free,
			// Extended fields.
			"is_deliverable": self.is_deliverable,
			"is_catch_all": self.is_catch_all,
			"provider": self.provider.as_str(),
			"mx_host": self.mx_host,
			"smtp_code": self.smtp_code,
			"verified_at": self.verified_at.to_rfc3339(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base(reachability: Reachability) -> VerificationResult {
		VerificationResult {
			email: "user@company.com".into(),
			normalized: "user@company.com".into(),
			reachability,
			..Default::default()
		}
	}

	#[test]
	fn omni_safe_maps_to_deliverable() {
		let mut r = base(Reachability::Safe);
		r.is_deliverable = Some(true);
		let omni = r.to_omni();
		assert_eq!(omni["result"], "deliverable");
		assert_eq!(omni["status"], "valid");
		assert_eq!(omni["is_valid"], true);
	}

	#[test]
	fn omni_invalid_maps_to_undeliverable() {
		let r = base(Reachability::Invalid);
		let omni = r.to_omni();
		assert_eq!(omni["result"], "undeliverable");
		assert_eq!(omni["status"], "invalid");
	}

	#[test]
	fn omni_risky_non_catchall_is_risky_not_unknown() {
		let mut r = base(Reachability::Risky);
		r.is_catch_all = Some(false);
		let omni = r.to_omni();
		assert_eq!(omni["result"], "risky");
		assert_eq!(omni["status"], "risky");
	}

	#[test]
	fn omni_risky_catchall_is_accept_all() {
		let mut r = base(Reachability::Risky);
		r.is_catch_all = Some(true);
		let omni = r.to_omni();
		assert_eq!(omni["result"], "accept_all");
		assert_eq!(omni["status"], "catch_all");
	}

	#[test]
	fn omni_unknown_stays_unknown() {
		let r = base(Reachability::Unknown);
		let omni = r.to_omni();
		assert_eq!(omni["result"], "unknown");
		assert_eq!(omni["status"], "unknown");
	}

	#[test]
	fn omni_is_total_over_all_variants() {
		for reachability in [
			Reachability::Safe,
			Reachability::Risky,
			Reachability::Invalid,
			Reachability::Unknown,
		] {
			for catch_all in [None, Some(false), Some(true)] {
				let mut r = base(reachability);
				r.is_catch_all = catch_all;
				let omni = r.to_omni();
				assert!(omni["result"].is_string());
				assert!(omni["status"].is_string());
			}
		}
	}

	#[test]
	fn omni_reports_mx_presence() {
		let mut r = base(Reachability::Safe);
		r.mx_host = "mx1.company.com".into();
		r.smtp_code = 250;
		let omni = r.to_omni();
		assert_eq!(omni["mx_found"], true);
		assert_eq!(omni["smtp_check"], true);
		assert_eq!(omni["mx_records"][0], "mx1.company.com");
	}

	#[test]
	fn input_defaults_match_wire_contract() {
		let input = CheckEmailInput::default();
		assert_eq!(input.smtp_port, 25);
		assert_eq!(input.connect_timeout, Duration::from_secs(10));
		assert_eq!(input.command_timeout, Duration::from_secs(10));
		assert_eq!(input.smtp_timeout, Some(Duration::from_secs(45)));
		assert_eq!(input.greylist_delay, Duration::from_secs(35));
		assert_eq!(input.greylist_retries, 2);
	}
}
