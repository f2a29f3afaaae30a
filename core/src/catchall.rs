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

//! Confidence scoring for addresses accepted by a catch-all domain.
//!
//! A catch-all MX accepts RCPT TO for any local part, so acceptance proves
//! nothing. This scorer estimates how likely the mailbox is real from
//! name/pattern heuristics, domain-type signals and person-store hits.
//! Confidence >= 0.80 upgrades to safe, <= 0.30 downgrades to invalid,
//! anything between stays risky.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Upgrade threshold.
pub const UPGRADE_THRESHOLD: f64 = 0.80;
/// Downgrade threshold.
pub const DOWNGRADE_THRESHOLD: f64 = 0.30;
/// "Likely real" threshold used by the finder fallback.
pub const LIKELY_REAL_THRESHOLD: f64 = 0.70;

fn regex(pattern: &str) -> Regex {
	Regex::new(pattern).expect("Static patterns are valid regexes. qed.")
}

/// Common corporate local-part shapes, ordered by confidence. First match
/// wins, so the broad all-alpha `firstlast` entry shadows the later
/// all-alpha shapes, as intended.
static CORPORATE_PATTERNS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
	vec![
		(regex(r"^[a-z]+\.[a-z]+$"), 0.90),          // first.last
		(regex(r"^[a-z]+[a-z]+$"), 0.85),            // firstlast
		(regex(r"^[a-z]\.[a-z]+$"), 0.80),           // f.last
		(regex(r"^[a-z]+$"), 0.75),                  // first
		(regex(r"^[a-z]+_[a-z]+$"), 0.70),           // first_last
		(regex(r"^[a-z]+-[a-z]+$"), 0.70),           // first-last
		(regex(r"^[a-z]+\.[a-z]\.[a-z]+$"), 0.65),   // first.m.last
		(regex(r"^[a-z]+[0-9]+$"), 0.50),            // first123
		(regex(r"^[a-z][a-z]+$"), 0.60),             // flast
	]
});

/// Local parts that are almost certainly not a person. The paired value is
/// a hard cap on the final confidence.
static RED_FLAG_PATTERNS: Lazy<Vec<(Regex, f64)>> = Lazy::new(|| {
	vec![
		(regex(r"^test"), 0.05),
		(regex(r"^admin"), 0.10),
		(regex(r"^noreply"), 0.05),
		(regex(r"^[0-9]+$"), 0.10),
		(regex(r"^[a-z]{15,}$"), 0.20),
		(regex(r"^\w{3,}[0-9]{5,}$"), 0.15),
	]
});

/// TLD-class adjustments: (suffix, confidence delta).
const DOMAIN_TYPE_SIGNALS: &[(&str, f64)] = &[
	(".edu", 0.15),
	(".gov", -0.10),
	(".mil", -0.10),
	(".org", 0.05),
];

/// Additional context for scoring a catch-all address.
#[derive(Debug, Default, Clone)]
pub struct ScoreContext {
	pub first_name: Option<String>,
	pub last_name: Option<String>,
	pub company_size: Option<u32>,
	/// The address was found in a trusted person store.
	pub person_store_match: bool,
	/// A LinkedIn-style profile matched the person at this company.
	pub profile_match: bool,
}

/// Scored confidence for one catch-all address, with the reason codes that
/// contributed.
#[derive(Debug, Clone, Serialize)]
pub struct CatchAllScore {
	pub email: String,
	pub confidence: f64,
	pub is_likely_real: bool,
	pub reasons: Vec<String>,
}

/// How well the local part matches the (first, last) name.
fn name_pattern_confidence(local: &str, first: &str, last: &str) -> f64 {
	let first = first.to_lowercase();
	let last = last.to_lowercase();
	let first = first.trim();
	let last = last.trim();
	if first.is_empty() || last.is_empty() {
		return 0.0;
	}
	let first_initial = &first[..1];

	// Exact shapes.
	if local == format!("{}.{}", first, last) {
		return 0.95;
	}
	if local == format!("{}{}", first, last) {
		return 0.90;
	}
	if local == format!("{}.{}", first_initial, last) {
		return 0.85;
	}
	if local == format!("{}_{}", first, last) || local == format!("{}-{}", first, last) {
		return 0.85;
	}
	if local == first {
		return 0.80;
	}

	// Partial token matches.
	if local.contains(first) && local.contains(last) {
		return 0.70;
	}
	if local.contains(last) {
		return 0.60;
	}
	if local.contains(first) {
		return 0.50;
	}

	0.0
}

/// How corporate-looking the local part is, from the shape alone.
fn email_pattern_confidence(local: &str) -> f64 {
	for (pattern, confidence) in RED_FLAG_PATTERNS.iter() {
		if pattern.is_match(local) {
			return *confidence;
		}
	}
	for (pattern, confidence) in CORPORATE_PATTERNS.iter() {
		if pattern.is_match(local) {
			return *confidence;
		}
	}
	0.50
}

/// Score a catch-all-accepted address.
pub fn score_catch_all(email: &str, ctx: &ScoreContext) -> CatchAllScore {
	let email_lower = email.to_lowercase().trim().to_string();
	let (local, domain) = match email_lower.split_once('@') {
		Some((l, d)) => (l.to_string(), d.to_string()),
		None => (email_lower.clone(), String::new()),
	};

	let mut confidence: f64 = 0.50;
	let mut reasons: Vec<String> = Vec::new();

	// Directory cross-references are the strongest signal.
	if ctx.person_store_match {
		confidence += 0.40;
		reasons.push("person_store_match".to_string());
	}
	if ctx.profile_match {
		confidence += 0.35;
		reasons.push("profile_match".to_string());
	}

	// Name-based pattern matching.
	if let (Some(first), Some(last)) = (ctx.first_name.as_deref(), ctx.last_name.as_deref()) {
		let name_confidence = name_pattern_confidence(&local, first, last);
		if name_confidence > 0.0 {
			confidence += name_confidence * 0.30;
			reasons.push(format!("name_pattern_match_{:.2}", name_confidence));
		} else {
			confidence -= 0.20;
			reasons.push("name_pattern_mismatch".to_string());
		}
	}

	// Shape of the local part, adjusted from the 0.5 baseline.
	let pattern_confidence = email_pattern_confidence(&local);
	confidence += (pattern_confidence - 0.50) * 0.20;
	reasons.push(format!("pattern_confidence_{:.2}", pattern_confidence));

	// Company-size heuristics: large orgs rarely run true catch-alls.
	if let Some(size) = ctx.company_size {
		if size > 1000 {
			confidence += 0.15;
			reasons.push(format!("large_company_{}_employees", size));
		} else if size < 10 {
			confidence -= 0.05;
			reasons.push(format!("small_company_{}_employees", size));
		}
	}

	// Domain-type signals.
	for (suffix, delta) in DOMAIN_TYPE_SIGNALS {
		if domain.ends_with(suffix) {
			confidence += delta;
			reasons.push(format!("domain_type_{}", suffix));
		}
	}

	// Red flags hard-cap the score.
	for (pattern, cap) in RED_FLAG_PATTERNS.iter() {
		if pattern.is_match(&local) {
			confidence = confidence.min(*cap);
			reasons.push(format!("red_flag_{}", pattern.as_str()));
			break;
		}
	}

	let confidence = confidence.clamp(0.0, 1.0);

	CatchAllScore {
		email: email_lower,
		confidence,
		is_likely_real: confidence >= LIKELY_REAL_THRESHOLD,
		reasons,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn named(first: &str, last: &str) -> ScoreContext {
		ScoreContext {
			first_name: Some(first.to_string()),
			last_name: Some(last.to_string()),
			..Default::default()
		}
	}

	#[test]
	fn person_store_hit_with_matching_name_upgrades() {
		let mut ctx = named("Jane", "Smith");
		ctx.person_store_match = true;
		let score = score_catch_all("jane.smith@catch.example", &ctx);
		assert!(
			score.confidence >= UPGRADE_THRESHOLD,
			"got {}",
			score.confidence
		);
		assert!(score.is_likely_real);
		assert!(score
			.reasons
			.iter()
			.any(|r| r == "person_store_match"));
	}

	#[test]
	fn exact_name_pattern_contributes() {
		let score = score_catch_all("jane.smith@company.com", &named("Jane", "Smith"));
		// 0.5 base + 0.95 * 0.3 + (0.9 - 0.5) * 0.2 = 0.865
		assert!(score.confidence > 0.80, "got {}", score.confidence);
	}

	#[test]
	fn name_mismatch_subtracts() {
		let score = score_catch_all("bob.jones@company.com", &named("Jane", "Smith"));
		let neutral = score_catch_all("bob.jones@company.com", &ScoreContext::default());
		assert!(score.confidence < neutral.confidence);
		assert!(score
			.reasons
			.iter()
			.any(|r| r == "name_pattern_mismatch"));
	}

	#[test]
	fn red_flags_cap_confidence() {
		let mut ctx = named("Test", "User");
		ctx.person_store_match = true;
		let score = score_catch_all("test@company.com", &ctx);
		assert!(score.confidence <= 0.05, "got {}", score.confidence);
		assert!(!score.is_likely_real);

		let score = score_catch_all("noreply@company.com", &ScoreContext::default());
		assert!(score.confidence <= DOWNGRADE_THRESHOLD);

		let score = score_catch_all("xkqzpflrmwvtyab@company.com", &ScoreContext::default());
		assert!(score.confidence <= 0.20, "got {}", score.confidence);
	}

	#[test]
	fn digit_heavy_locals_are_capped() {
		let score = score_catch_all("123456@company.com", &ScoreContext::default());
		assert!(score.confidence <= 0.10);

		let score = score_catch_all("name12345@company.com", &ScoreContext::default());
		assert!(score.confidence <= 0.15);
	}

	#[test]
	fn concatenated_locals_score_as_firstlast() {
		// All-alpha concatenations hit the 0.85 firstlast shape, not the
		// weaker flast entry further down the table.
		assert!((email_pattern_confidence("johnsmith") - 0.85).abs() < 1e-9);
		assert!((email_pattern_confidence("jane.smith") - 0.90).abs() < 1e-9);
		// Single letters fall through to the lone-first shape.
		assert!((email_pattern_confidence("j") - 0.75).abs() < 1e-9);
	}

	#[test]
	fn domain_class_adjustments_apply() {
		let base = score_catch_all("jane.smith@company.com", &named("Jane", "Smith"));
		let edu = score_catch_all("jane.smith@school.edu", &named("Jane", "Smith"));
		let gov = score_catch_all("jane.smith@agency.gov", &named("Jane", "Smith"));
		assert!(edu.confidence > base.confidence);
		assert!(gov.confidence < base.confidence);
	}

	#[test]
	fn company_size_adjustments_apply() {
		let mut big = named("Jane", "Smith");
		big.company_size = Some(5000);
		let mut small = named("Jane", "Smith");
		small.company_size = Some(3);
		let big_score = score_catch_all("jane.smith@company.com", &big);
		let small_score = score_catch_all("jane.smith@company.com", &small);
		assert!(big_score.confidence > small_score.confidence);
	}

	#[test]
	fn confidence_is_always_clamped() {
		let mut ctx = named("Jane", "Smith");
		ctx.person_store_match = true;
		ctx.profile_match = true;
		ctx.company_size = Some(10000);
		let score = score_catch_all("jane.smith@school.edu", &ctx);
		assert!(score.confidence <= 1.0);
		assert!(score.confidence >= 0.0);
	}
}
