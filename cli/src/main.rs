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

//! CLI for kadenverify: verify one email, verify a file of emails, or
//! find an email for a person at a domain. Results are printed as JSON.
//! Exits 0 on success, 1 on input or validation errors.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use kadenverify::enrichment::{
	EnrichPersonAdapter, EnrichmentAdapter, EnrichmentChain, PersonMatchAdapter,
	WebSearchAdapter,
};
use kadenverify::finder::{EmailFinder, FinderInput};
use kadenverify::{CheckEmailInput, CheckEmailInputBuilder, Reachability, Verifier};

#[derive(Parser)]
#[clap(name = "kadenverify", version, about = "Verify email deliverability and find emails without sending any email.")]
struct Cli {
	/// Name used in the SMTP EHLO command.
	#[clap(long, env = "KADENVERIFY_HELO_DOMAIN", default_value = "verify.kadenwood.com")]
	helo_domain: String,

	/// Address used in the SMTP MAIL FROM command.
	#[clap(long, env = "KADENVERIFY_FROM_ADDRESS", default_value = "verify@kadenwood.com")]
	from_address: String,

	#[clap(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Verify a single email address.
	Verify { email: String },
	/// Verify every email in a file (one address per line), preserving
	/// input order in the output.
	Batch {
		file: PathBuf,
		#[clap(long, default_value_t = 5)]
		concurrency: usize,
	},
	/// Find the most likely email for a person at a domain.
	Find {
		first_name: String,
		last_name: String,
		domain: String,
		#[clap(long)]
		company_name: Option<String>,
	},
}

#[derive(Serialize)]
struct BatchSummary {
	total: usize,
	safe: usize,
	risky: usize,
	invalid: usize,
	unknown: usize,
}

fn template(cli: &Cli) -> anyhow::Result<CheckEmailInput> {
	CheckEmailInputBuilder::default()
		.hello_name(cli.helo_domain.clone())
		.from_email(cli.from_address.clone())
		.build()
		.map_err(|e| anyhow::anyhow!("invalid SMTP parameters: {}", e))
}

fn chain_from_env() -> EnrichmentChain {
	let mut adapters: Vec<Arc<dyn EnrichmentAdapter>> = Vec::new();
	if let Ok(key) = std::env::var("KADENVERIFY_EXA_API_KEY") {
		adapters.push(Arc::new(WebSearchAdapter::new(key)));
	}
	if let Ok(key) = std::env::var("KADENVERIFY_PROSPEO_API_KEY") {
		adapters.push(Arc::new(EnrichPersonAdapter::new(key)));
	}
	if let Ok(key) = std::env::var("KADENVERIFY_APOLLO_API_KEY") {
		adapters.push(Arc::new(PersonMatchAdapter::new(key)));
	}
	EnrichmentChain::new(adapters)
}

async fn run() -> anyhow::Result<i32> {
	let cli = Cli::parse();
	let input = template(&cli)?;
	let verifier = Arc::new(Verifier::new());

	match cli.command {
		Command::Verify { email } => {
			if email.trim().is_empty() {
				eprintln!("error: email must not be empty");
				return Ok(1);
			}
			let mut input = input;
			input.to_email = email;
			let result = verifier.check_email(&input).await;
			println!("{}", serde_json::to_string_pretty(&result)?);
			Ok(0)
		}
		Command::Batch { file, concurrency } => {
			let content = std::fs::read_to_string(&file).map_err(|e| {
				anyhow::anyhow!("cannot read {}: {}", file.display(), e)
			})?;
			let emails: Vec<String> = content
				.lines()
				.map(|l| l.trim().to_string())
				.filter(|l| !l.is_empty() && !l.starts_with('#'))
				.collect();
			if emails.is_empty() {
				eprintln!("error: {} contains no email addresses", file.display());
				return Ok(1);
			}

			let results = verifier
				.check_email_batch(&emails, &input, concurrency)
				.await;

			let mut summary = BatchSummary {
				total: results.len(),
				safe: 0,
				risky: 0,
				invalid: 0,
				unknown: 0,
			};
			for result in &results {
				match result.reachability {
					Reachability::Safe => summary.safe += 1,
					Reachability::Risky => summary.risky += 1,
					Reachability::Invalid => summary.invalid += 1,
					Reachability::Unknown => summary.unknown += 1,
				}
				println!("{}", serde_json::to_string(result)?);
			}
			eprintln!("{}", serde_json::to_string(&summary)?);
			Ok(0)
		}
		Command::Find {
			first_name,
			last_name,
			domain,
			company_name,
		} => {
			if first_name.trim().is_empty() || last_name.trim().is_empty() {
				eprintln!("error: first and last name must not be empty");
				return Ok(1);
			}
			if domain.trim().is_empty() || !domain.contains('.') {
				eprintln!("error: domain must be a dotted hostname");
				return Ok(1);
			}

			let finder = EmailFinder::new(
				Arc::clone(verifier.resolver()),
				Arc::clone(verifier.domain_cache()),
				chain_from_env(),
				input,
			);
			let result = finder
				.find_email(&FinderInput {
					first_name,
					last_name,
					domain,
					company_name,
				})
				.await;
			println!("{}", serde_json::to_string_pretty(&result)?);
			Ok(0)
		}
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.init();
	kadenverify::initialize_crypto_provider();

	match run().await {
		Ok(code) => std::process::exit(code),
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	}
}
