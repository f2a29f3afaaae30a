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

//! Async SMTP dialogue for mailbox verification, on async-smtp.
//!
//! One connection performs `EHLO` (with opportunistic `STARTTLS` handled
//! by the transport's `ClientSecurity`), `MAIL FROM`, then one or many
//! `RCPT TO` commands, and `QUIT`. `DATA` is never sent. Negative replies
//! are classified by the response parser; greylisting (a 4xx parsed as
//! such) is retried with a bounded delay.

mod error;
pub mod parser;

pub use error::SmtpError;
pub use parser::{parse_smtp_response, SmtpResponse};

use async_native_tls::TlsConnector;
use async_smtp::smtp::commands::{MailCommand, QuitCommand, RcptCommand};
use async_smtp::smtp::error::Error as AsyncSmtpError;
use async_smtp::smtp::extension::ClientId;
use async_smtp::smtp::response::Response;
use async_smtp::{ClientTlsParameters, EmailAddress, SmtpClient, SmtpTransport};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::io;
use tokio::time::timeout;

use crate::util::input_output::CheckEmailInput;
use crate::LOG_TARGET;

/// Length of the random local part used by the catch-all probe.
const CATCH_ALL_LOCAL_LEN: usize = 15;

/// Generate a random lowercase-alphanumeric local part for catch-all
/// probing.
fn random_local_part(len: usize) -> String {
	const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
	let mut rng = SmallRng::from_entropy();
	(0..len)
		.map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
		.collect()
}

/// The EHLO name: the configured hello_name, falling back to this
/// machine's hostname when left empty.
fn hello_name(input: &CheckEmailInput) -> String {
	if !input.hello_name.is_empty() {
		return input.hello_name.clone();
	}
	hostname::get()
		.map(|h| h.to_string_lossy().into_owned())
		.unwrap_or_else(|_| "localhost".to_string())
}

fn response_code(response: &Response) -> u16 {
	response.code.to_string().parse::<u16>().unwrap_or(0)
}

fn response_message(response: &Response) -> String {
	response.message.join("\n")
}

/// Connect to an MX host and drive the connection phase: banner, EHLO
/// (HELO fallback and STARTTLS negotiation are handled by the transport
/// per the configured security).
async fn connect_to_host(
	mx_host: &str,
	input: &CheckEmailInput,
) -> Result<SmtpTransport, SmtpError> {
	// Hostname verification fails on a trailing '.'.
	let host = mx_host.trim_end_matches('.').to_string();

	let security = {
		// MX hosts routinely present certificates that don't match the
		// exchanged hostname; we only want transport encryption here.
		let tls_params = ClientTlsParameters::new(
			host.clone(),
			TlsConnector::new()
				.use_sni(true)
				.danger_accept_invalid_certs(true)
				.danger_accept_invalid_hostnames(true),
		);
		input.smtp_security.to_client_security(tls_params)
	};

	let client = timeout(
		input.connect_timeout,
		SmtpClient::with_security((host.as_str(), input.smtp_port), security),
	)
	.await
	.map_err(|_| SmtpError::Timeout(input.connect_timeout))?
	.map_err(SmtpError::AsyncSmtpError)?;

	let mut smtp_transport = client
		.hello_name(ClientId::Domain(hello_name(input)))
		.timeout(Some(input.command_timeout))
		.into_transport();

	match timeout(input.connect_timeout, smtp_transport.connect()).await {
		Ok(Ok(_)) => {}
		Ok(Err(e)) => {
			let _ = smtp_transport.close().await;
			return Err(SmtpError::AsyncSmtpError(e));
		}
		Err(_) => {
			let _ = smtp_transport.close().await;
			return Err(SmtpError::Timeout(input.connect_timeout));
		}
	}

	Ok(smtp_transport)
}

/// Connect and open the envelope with `MAIL FROM`. One envelope serves
/// any number of subsequent RCPT commands.
async fn open_envelope(
	mx_host: &str,
	input: &CheckEmailInput,
) -> Result<SmtpTransport, SmtpError> {
	let mut smtp_transport = connect_to_host(mx_host, input).await?;

	// "MAIL FROM: user@example.org"
	let from_email = EmailAddress::new(input.from_email.clone()).unwrap_or_else(|_| {
		tracing::warn!(
			target: LOG_TARGET,
			"Inputted from_email \"{}\" is not a valid email, using \"user@example.org\" instead",
			input.from_email
		);
		EmailAddress::new("user@example.org".to_string()).expect("This is a valid email. qed.")
	});

	if let Err(e) = smtp_transport
		.command(MailCommand::new(Some(from_email), vec![]))
		.await
	{
		let _ = smtp_transport.close().await;
		return Err(SmtpError::AsyncSmtpError(e));
	}

	Ok(smtp_transport)
}

/// Probe one recipient on an open envelope. The reply, whatever its
/// code, is classified by the response parser; only transport failures
/// are errors.
async fn rcpt(
	smtp_transport: &mut SmtpTransport,
	email: &str,
) -> Result<SmtpResponse, SmtpError> {
	let address = match EmailAddress::new(email.to_string()) {
		Ok(address) => address,
		Err(e) => {
			return Ok(SmtpResponse::no_response(format!(
				"invalid recipient address: {}",
				e
			)));
		}
	};

	match smtp_transport.command(RcptCommand::new(address, vec![])).await {
		Ok(response) => Ok(parse_smtp_response(
			response_code(&response),
			&response_message(&response),
		)),
		Err(AsyncSmtpError::Transient(response))
		| Err(AsyncSmtpError::Permanent(response)) => Ok(parse_smtp_response(
			response_code(&response),
			&response_message(&response),
		)),
		Err(e) => Err(SmtpError::AsyncSmtpError(e)),
	}
}

/// Politely end the dialogue. Errors are ignored; the connection is
/// closed either way.
async fn quit(smtp_transport: &mut SmtpTransport) {
	let _ = smtp_transport.command(QuitCommand).await;
	let _ = smtp_transport.close().await;
}

/// Convert a transport-level failure into the code-0 response shape the
/// scorer expects. Dialogue-phase rejections carry their real code and
/// are classified like any other reply.
fn failure_response(error: SmtpError) -> SmtpResponse {
	match error {
		SmtpError::Timeout(_) => SmtpResponse::no_response("connection timeout"),
		SmtpError::AsyncSmtpError(e) => match e {
			AsyncSmtpError::Transient(response) | AsyncSmtpError::Permanent(response) => {
				parse_smtp_response(response_code(&response), &response_message(&response))
			}
			AsyncSmtpError::Timeout(_) => SmtpResponse::no_response("connection timeout"),
			AsyncSmtpError::Io(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
				SmtpResponse::no_response("connection refused")
			}
			AsyncSmtpError::Io(e) => {
				SmtpResponse::no_response(format!("connection error: {}", e))
			}
			other => SmtpResponse::no_response(format!("smtp error: {}", other)),
		},
	}
}

async fn attempt_once(email: &str, mx_host: &str, input: &CheckEmailInput) -> SmtpResponse {
	let mut smtp_transport = match open_envelope(mx_host, input).await {
		Ok(t) => t,
		Err(e) => return failure_response(e),
	};

	let response = match rcpt(&mut smtp_transport, email).await {
		Ok(r) => r,
		Err(e) => {
			let _ = smtp_transport.close().await;
			return failure_response(e);
		}
	};

	quit(&mut smtp_transport).await;
	response
}

/// Verify one email against one MX host.
///
/// Applies the total dialogue timeout and the greylist retry loop: only a
/// reply parsed as greylisted is retried (never a code 0 or a 5xx), at most
/// `greylist_retries` times with `greylist_delay` between attempts.
pub async fn check_smtp(email: &str, mx_host: &str, input: &CheckEmailInput) -> SmtpResponse {
	for attempt in 0..=input.greylist_retries {
		let result = match input.smtp_timeout {
			Some(total) => match timeout(total, attempt_once(email, mx_host, input)).await {
				Ok(r) => r,
				Err(_) => return SmtpResponse::no_response("total timeout exceeded"),
			},
			None => attempt_once(email, mx_host, input).await,
		};

		if result.is_greylisted && attempt < input.greylist_retries {
			tracing::info!(
				target: LOG_TARGET,
				email = %email,
				attempt = attempt + 1,
				delay_secs = input.greylist_delay.as_secs(),
				"Greylisted, retrying after delay"
			);
			tokio::time::sleep(input.greylist_delay).await;
			continue;
		}

		return result;
	}

	SmtpResponse::no_response("max retries exceeded")
}

async fn batch_attempt(
	emails: &[String],
	mx_host: &str,
	input: &CheckEmailInput,
) -> Result<Vec<SmtpResponse>, SmtpError> {
	let mut smtp_transport = open_envelope(mx_host, input).await?;
	let mut responses = Vec::with_capacity(emails.len());

	for email in emails {
		match rcpt(&mut smtp_transport, email).await {
			Ok(r) => responses.push(r),
			Err(e) => {
				let _ = smtp_transport.close().await;
				return Err(e);
			}
		}
	}

	quit(&mut smtp_transport).await;
	Ok(responses)
}

/// Verify many emails of the same domain over a single connection.
///
/// One envelope, N RCPT commands. If anything in the shared dialogue fails,
/// degrades to per-email verification so that one bad exchange cannot sink
/// the whole batch. The output preserves input order.
pub async fn check_smtp_batch(
	emails: &[String],
	mx_host: &str,
	input: &CheckEmailInput,
) -> Vec<SmtpResponse> {
	match batch_attempt(emails, mx_host, input).await {
		Ok(responses) => responses,
		Err(e) => {
			tracing::debug!(
				target: LOG_TARGET,
				mx_host = %mx_host,
				error = %e,
				"Batch connection failed, falling back to per-email checks"
			);
			let mut responses = Vec::with_capacity(emails.len());
			for email in emails {
				responses.push(check_smtp(email, mx_host, input).await);
			}
			responses
		}
	}
}

/// Probe whether a domain is catch-all by RCPTing a random local part.
///
/// 250 means catch-all, a 5xx means the server rejects unknown mailboxes,
/// anything else is indeterminate.
pub async fn check_catch_all(
	domain: &str,
	mx_host: &str,
	input: &CheckEmailInput,
) -> Option<bool> {
	let random_email = format!("{}@{}", random_local_part(CATCH_ALL_LOCAL_LEN), domain);
	let result = check_smtp(&random_email, mx_host, input).await;

	if result.code == 250 {
		return Some(true);
	}
	if (500..600).contains(&result.code) {
		return Some(false);
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::util::input_output::{CheckEmailInputBuilder, SmtpSecurity};
	use std::time::Duration;
	use tokio::io::AsyncReadExt;
	use tokio::net::TcpListener;

	fn input_for_port(port: u16) -> CheckEmailInput {
		CheckEmailInputBuilder::default()
			.to_email("someone@example.com".to_string())
			.smtp_port(port)
			.smtp_security(SmtpSecurity::None)
			.connect_timeout(Duration::from_millis(500))
			.command_timeout(Duration::from_millis(500))
			.smtp_timeout(Some(Duration::from_secs(2)))
			.greylist_retries(0usize)
			.build()
			.unwrap()
	}

	#[test]
	fn random_local_part_has_requested_length() {
		let local = random_local_part(15);
		assert_eq!(local.len(), 15);
		assert!(local
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
	}

	#[tokio::test]
	async fn refused_connection_yields_code_zero() {
		// Port 1 on localhost should refuse immediately.
		let input = input_for_port(1);
		let result = check_smtp("someone@example.com", "127.0.0.1", &input).await;
		assert_eq!(result.code, 0);
		assert!(!result.is_greylisted);
	}

	async fn spawn_scripted_server(script: Vec<&'static str>) -> u16 {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			let (mut reader, mut writer) = socket.split();
			let mut buf = [0u8; 1024];
			for (i, reply) in script.iter().enumerate() {
				if i > 0 {
					// Wait for the client's next command.
					let _ = reader.read(&mut buf).await.unwrap();
				}
				tokio::io::AsyncWriteExt::write_all(&mut writer, reply.as_bytes())
					.await
					.unwrap();
				tokio::io::AsyncWriteExt::flush(&mut writer).await.unwrap();
			}
		});
		port
	}

	#[tokio::test]
	async fn full_dialogue_parses_rcpt_reply() {
		let port = spawn_scripted_server(vec![
			"220 mx.test ESMTP\r\n",
			"250-mx.test\r\n250 SIZE 10485760\r\n",
			"250 2.1.0 Ok\r\n",
			"250 2.1.5 Ok\r\n",
			"221 2.0.0 Bye\r\n",
		])
		.await;

		let input = input_for_port(port);
		let result = check_smtp("someone@example.com", "127.0.0.1", &input).await;
		assert_eq!(result.code, 250);
		assert!(!result.is_invalid);
	}

	#[tokio::test]
	async fn rejected_rcpt_is_classified_invalid() {
		let port = spawn_scripted_server(vec![
			"220 mx.test ESMTP\r\n",
			"250 mx.test\r\n",
			"250 2.1.0 Ok\r\n",
			"550 5.1.1 User unknown\r\n",
			"221 2.0.0 Bye\r\n",
		])
		.await;

		let input = input_for_port(port);
		let result = check_smtp("ghost@example.com", "127.0.0.1", &input).await;
		assert_eq!(result.code, 550);
		assert!(result.is_invalid);
	}

	#[tokio::test]
	async fn batch_reuses_one_connection_and_preserves_order() {
		let port = spawn_scripted_server(vec![
			"220 mx.test ESMTP\r\n",
			"250 mx.test\r\n",
			"250 2.1.0 Ok\r\n",
			"250 2.1.5 Ok\r\n",
			"550 5.1.1 User unknown\r\n",
			"250 2.1.5 Ok\r\n",
			"221 2.0.0 Bye\r\n",
		])
		.await;

		let input = input_for_port(port);
		let emails = vec![
			"a@example.com".to_string(),
			"b@example.com".to_string(),
			"c@example.com".to_string(),
		];
		let results = check_smtp_batch(&emails, "127.0.0.1", &input).await;
		assert_eq!(results.len(), 3);
		assert_eq!(results[0].code, 250);
		assert_eq!(results[1].code, 550);
		assert!(results[1].is_invalid);
		assert_eq!(results[2].code, 250);
	}

	#[tokio::test]
	async fn banner_rejection_flows_through_parser() {
		let port = spawn_scripted_server(vec![
			"554 5.7.1 Client host blocked by Spamhaus\r\n",
		])
		.await;

		let input = input_for_port(port);
		let result = check_smtp("someone@example.com", "127.0.0.1", &input).await;
		assert_eq!(result.code, 554);
		assert!(result.is_blacklisted);
	}
}
