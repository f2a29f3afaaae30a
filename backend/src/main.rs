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

//! The kadenverify backend: HTTP API over the tiered verification engine
//! with a persistent verification store.

mod config;
mod http;
mod metrics;
mod rate_limit;
mod readiness;
mod storage;

use std::net::IpAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use kadenverify::domain_cache::DomainCache;
use kadenverify::enrichment::{
	EmptyDirectory, EnrichPersonAdapter, EnrichmentAdapter, EnrichmentChain,
	PersonMatchAdapter, PersonStoreAdapter, WebSearchAdapter,
};
use kadenverify::mx::MxResolver;
use kadenverify::tiered::{BackfillScheduler, TieredConfig, TieredVerifier};
use kadenverify::{CheckEmailInputBuilder, Verifier};

use config::BackendConfig;
use http::AppState;
use metrics::MetricsRegistry;
use rate_limit::RateLimiter;
use storage::StoreCache;

/// Assemble the enrichment chain in ascending unit-cost order from the
/// configured credentials.
fn build_chain(config: &BackendConfig) -> EnrichmentChain {
	let mut adapters: Vec<Arc<dyn EnrichmentAdapter>> =
		vec![Arc::new(PersonStoreAdapter::new(Arc::new(EmptyDirectory)))];
	if let Some(key) = &config.exa_api_key {
		adapters.push(Arc::new(WebSearchAdapter::new(key.clone())));
	}
	if let Some(key) = &config.prospeo_api_key {
		adapters.push(Arc::new(EnrichPersonAdapter::new(key.clone())));
	}
	if let Some(key) = &config.apollo_api_key {
		adapters.push(Arc::new(PersonMatchAdapter::new(key.clone())));
	}
	EnrichmentChain::new(adapters)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let _ = dotenv::dotenv();
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let config = BackendConfig::from_env()?;
	kadenverify::initialize_crypto_provider();

	let resolver = Arc::new(MxResolver::new());
	let domain_cache = Arc::new(DomainCache::default());
	let verifier = Arc::new(Verifier::with_parts(
		Arc::clone(&resolver),
		Arc::clone(&domain_cache),
	));

	let store = storage::make_store(&config).await?;
	let metrics = Arc::new(MetricsRegistry::new());

	let template = CheckEmailInputBuilder::default()
		.hello_name(config.helo_domain.clone())
		.from_email(config.from_address.clone())
		.build()
		.map_err(|e| anyhow::anyhow!("invalid SMTP input template: {}", e))?;

	let cache = Arc::new(StoreCache::new(Arc::clone(&store)));
	let backfill = BackfillScheduler::start(
		Arc::clone(&verifier),
		cache.clone(),
		template.clone(),
		config.backfill_queue_size,
		config.backfill_workers,
	);

	let tiered_config = TieredConfig {
		fast_tier_threshold: config.fast_tier_threshold,
		role_filter: config.role_filter(),
		enrichment_enabled: config.enrichment_enabled,
		..Default::default()
	};

	let tiered = TieredVerifier::new(
		Arc::clone(&verifier),
		cache,
		metrics.clone(),
		build_chain(&config),
		Arc::new(EmptyDirectory),
		tiered_config,
		template.clone(),
		Some(backfill),
	);

	let rate_limiter = RateLimiter::from_config(&config);

	let host: IpAddr = config.http_host.parse()?;
	let port = config.http_port;

	tracing::info!(
		target: kadenverify::LOG_TARGET,
		host = %host,
		port = port,
		backend = ?config.cache_backend,
		"Starting kadenverify backend"
	);

	let state = Arc::new(AppState {
		config,
		verifier,
		tiered,
		store,
		metrics,
		rate_limiter,
		template,
	});

	warp::serve(http::routes(state)).run((host, port)).await;
	Ok(())
}
