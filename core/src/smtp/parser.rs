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

//! SMTP error response classification.
//!
//! Detects invalid mailboxes, greylisting, IP blocklists, full inboxes and
//! disabled accounts from response codes and messages. Message patterns
//! cover English, French, German, Spanish, Italian, Polish and Czech.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Raw SMTP response from the server, classified into flags.
///
/// A code of 0 means no response was received (connection failure or
/// timeout). For 2xx responses all flags are false. A 4xx sets exactly one
/// of greylisted/full-inbox (defaulting to greylisted). A 5xx sets invalid
/// unless matched as disabled or full-inbox. Any code may set blacklisted
/// when the message matches blocklist vocabulary.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SmtpResponse {
	pub code: u16,
	pub message: String,
	pub is_invalid: bool,
	pub is_greylisted: bool,
	pub is_blacklisted: bool,
	pub is_full_inbox: bool,
	pub is_disabled: bool,
}

impl SmtpResponse {
	/// A response representing a connection-level failure (no SMTP reply).
	pub fn no_response(message: impl Into<String>) -> Self {
		SmtpResponse {
			code: 0,
			message: message.into(),
			..Default::default()
		}
	}
}

fn build(patterns: &[&str]) -> Vec<Regex> {
	patterns
		.iter()
		.map(|p| {
			RegexBuilder::new(p)
				.case_insensitive(true)
				.build()
				.expect("Static patterns are valid regexes. qed.")
		})
		.collect()
}

/// The user does not exist.
static INVALID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
	build(&[
		// English
		"user unknown",
		"unknown user",
		"user not found",
		"no such user",
		"mailbox not found",
		"mailbox unavailable",
		"recipient not found",
		"recipient rejected",
		"recipient unknown",
		"unknown recipient",
		"address rejected",
		"address unknown",
		"does not exist",
		"doesn't exist",
		"not exist",
		"no mailbox",
		"invalid address",
		"invalid recipient",
		"invalid mailbox",
		"undeliverable",
		"bad destination",
		"unknown address",
		"account .* not found",
		"no such account",
		"mailbox .* does not exist",
		"email address .* not found",
		"is not a valid mailbox",
		"relay not permitted",
		"relaying denied",
		"not our customer",
		"no such recipient",
		"verification failed",
		"recipient address denied",
		// French
		"utilisateur inconnu",
		"adresse .* introuvable",
		"destinataire inconnu",
		"bo[iî]te .* introuvable",
		"n'existe pas",
		// German
		"postfach nicht gefunden",
		"benutzer nicht gefunden",
		"empf[aä]nger .* unbekannt",
		"unbekannter empf[aä]nger",
		"nicht gefunden",
		"existiert nicht",
		// Spanish
		"usuario desconocido",
		"destinatario desconocido",
		"buz[oó]n no encontrado",
		"no existe",
		"direcci[oó]n .* inv[aá]lida",
		// Italian
		"utente sconosciuto",
		"destinatario sconosciuto",
		"casella .* non trovata",
		"non esiste",
		// Polish
		"u[zż]ytkownik nieznany",
		"skrzynka .* nie istnieje",
		"odbiorca nieznany",
		"nie istnieje",
		// Czech
		"u[zž]ivatel nenalezen",
		"adresa nenalezena",
		"p[rř][ií]jemce nenalezen",
		"neexistuje",
	])
});

/// Our IP is on a blocklist.
static BLACKLIST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
	build(&[
		"spamhaus",
		"proofpoint",
		"cloudmark",
		"barracuda",
		"sorbs",
		"spamcop",
		"blocked.*ip",
		"ip.*blocked",
		"blacklist",
		"blocklist",
		"denied.*ip",
		"ip.*denied",
		"reject.*ip",
		"listed.*rbl",
		"rbl.*listed",
		"dnsbl",
		"your ip .* has been .* blocked",
		"connection .* refused",
		"access denied",
		"not allowed to send",
		"service refused",
	])
});

/// Temporary rejection, try again later.
static GREYLIST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
	build(&[
		"try again later",
		"temporarily rejected",
		"please try again",
		"temporary.*failure",
		"temporary.*error",
		"greylisted",
		"greylist",
		"too many connections",
		"rate limit",
		"come back later",
		"defer.*connection",
		"resource temporarily unavailable",
		"service temporarily unavailable",
	])
});

/// The inbox exists but is over quota.
static FULL_INBOX_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
	build(&[
		"mailbox full",
		"mailbox .* full",
		"over.*quota",
		"quota exceeded",
		"insufficient.*storage",
		"not enough space",
		"user .* over .* quota",
		"mail.*box.*storage",
		"exceeded.*storage",
		"bo[iî]te .* pleine",  // French
		"postfach .* voll",    // German
		"buz[oó]n .* lleno",   // Spanish
	])
});

/// The account exists but has been disabled by the provider.
static DISABLED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
	build(&[
		"account .* disabled",
		"account .* suspended",
		"account .* deactivated",
		"account .* locked",
		// The bare phrase; the `.*` variant above can't match it.
		"account disabled",
		"account has been disabled",
		"mailbox .* disabled",
		"mailbox .* inactive",
		"mailbox disabled",
		"user .* disabled",
		"temporarily disabled",
	])
});

fn match_any(message: &str, patterns: &[Regex]) -> bool {
	patterns.iter().any(|p| p.is_match(message))
}

/// Parse an SMTP response code and message into a structured result.
///
/// Precedence on 5xx: blacklist (any code) > disabled > full inbox >
/// invalid pattern > generic 550/551/552/553 treated as invalid. On 4xx:
/// blacklist > greylist patterns > full inbox > default greylist.
pub fn parse_smtp_response(code: u16, message: &str) -> SmtpResponse {
	let mut result = SmtpResponse {
		code,
		message: message.to_string(),
		..Default::default()
	};

	// 2xx means success, nothing to classify.
	if (200..300).contains(&code) {
		return result;
	}

	// Blocklist vocabulary wins regardless of code, including over
	// greylist wording in 4xx replies.
	if match_any(message, &BLACKLIST_PATTERNS) {
		result.is_blacklisted = true;
		return result;
	}

	if (400..500).contains(&code) {
		if match_any(message, &GREYLIST_PATTERNS) {
			result.is_greylisted = true;
		} else if match_any(message, &FULL_INBOX_PATTERNS) {
			result.is_full_inbox = true;
		} else {
			// Generic 4xx defaults to greylist.
			result.is_greylisted = true;
		}
		return result;
	}

	if (500..600).contains(&code) {
		// Disabled is more specific than invalid.
		if match_any(message, &DISABLED_PATTERNS) {
			result.is_disabled = true;
			return result;
		}

		// User exists but cannot receive.
		if match_any(message, &FULL_INBOX_PATTERNS) {
			result.is_full_inbox = true;
			return result;
		}

		if match_any(message, &INVALID_PATTERNS) {
			result.is_invalid = true;
			return result;
		}

		// Unrecognized 550-family responses are still most likely invalid.
		if matches!(code, 550 | 551 | 552 | 553) {
			result.is_invalid = true;
			return result;
		}
	}

	result
}
