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

use crate::util::ser_with_display::ser_with_display;
use async_smtp::smtp::error::Error as AsyncSmtpError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Error occurred connecting to this email server via SMTP.
///
/// SMTP replies are never errors here; whatever their code, they come back
/// as a classified [crate::smtp::parser::SmtpResponse]. This type covers
/// the transport layer and the dialogue phase that prevented the RCPT
/// stage from being reached.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum SmtpError {
	/// Error from the async-smtp crate.
	#[error("SMTP error: {0}")]
	#[serde(serialize_with = "ser_with_display")]
	AsyncSmtpError(AsyncSmtpError),
	/// The whole dialogue attempt exceeded its deadline.
	#[error("Timeout error: {0:?}")]
	Timeout(Duration),
}

impl From<AsyncSmtpError> for SmtpError {
	fn from(e: AsyncSmtpError) -> Self {
		SmtpError::AsyncSmtpError(e)
	}
}
