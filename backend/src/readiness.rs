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

//! Readiness probes: cache backend reachability, outbound DNS, and an
//! outbound SMTP TCP connect, all run concurrently. Ready only when all
//! three pass.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use kadenverify::mx::MxResolver;

use crate::storage::{StoreFilter, VerificationStore};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct CheckDetail {
	pub ok: bool,
	pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessChecks {
	pub cache: CheckDetail,
	pub dns: CheckDetail,
	pub smtp_outbound: CheckDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
	pub status: String,
	pub checks: ReadinessChecks,
}

async fn check_cache(store: &Arc<dyn VerificationStore>) -> CheckDetail {
	match timeout(CHECK_TIMEOUT, store.count(&StoreFilter::default())).await {
		Ok(Ok(total)) => CheckDetail {
			ok: true,
			detail: format!("cache reachable, {} rows", total),
		},
		Ok(Err(e)) => CheckDetail {
			ok: false,
			detail: format!("cache error: {}", e),
		},
		Err(_) => CheckDetail {
			ok: false,
			detail: "cache check timed out".to_string(),
		},
	}
}

async fn check_dns(resolver: &Arc<MxResolver>, target: &str) -> CheckDetail {
	match timeout(CHECK_TIMEOUT, resolver.check_mx(target)).await {
		Ok(Ok(info)) if info.has_mx => CheckDetail {
			ok: true,
			detail: format!("resolved {}", target),
		},
		Ok(Ok(_)) => CheckDetail {
			ok: false,
			detail: format!("no records for {}", target),
		},
		Ok(Err(e)) => CheckDetail {
			ok: false,
			detail: format!("dns error: {}", e),
		},
		Err(_) => CheckDetail {
			ok: false,
			detail: "dns check timed out".to_string(),
		},
	}
}

async fn check_smtp_outbound(target: &str) -> CheckDetail {
	let target = if target.contains(':') {
		target.to_string()
	} else {
		format!("{}:25", target)
	};
	match timeout(CHECK_TIMEOUT, TcpStream::connect(&target)).await {
		Ok(Ok(_)) => CheckDetail {
			ok: true,
			detail: format!("connected to {}", target),
		},
		Ok(Err(e)) => CheckDetail {
			ok: false,
			detail: format!("connect error: {}", e),
		},
		Err(_) => CheckDetail {
			ok: false,
			detail: format!("connect to {} timed out", target),
		},
	}
}

/// Run all three checks concurrently. `status` is "ready" iff every
/// check passed, "degraded" otherwise.
pub async fn readiness(
	store: &Arc<dyn VerificationStore>,
	resolver: &Arc<MxResolver>,
	dns_target: &str,
	smtp_target: &str,
) -> ReadinessReport {
	let (cache, dns, smtp_outbound) = tokio::join!(
		check_cache(store),
		check_dns(resolver, dns_target),
		check_smtp_outbound(smtp_target),
	);

	let all_ok = cache.ok && dns.ok && smtp_outbound.ok;
	ReadinessReport {
		status: if all_ok { "ready" } else { "degraded" }.to_string(),
		checks: ReadinessChecks {
			cache,
			dns,
			smtp_outbound,
		},
	}
}
