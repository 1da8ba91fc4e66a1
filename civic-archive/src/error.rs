// Copyright 2024-2026 civic-archive contributors.
// This file is part of civic-archive.

// civic-archive is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// civic-archive is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with civic-archive.  If not, see <http://www.gnu.org/licenses/>.

use std::{env, fmt, io, num};
use thiserror::Error;

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

/// Civic Archive Error Enum
#[derive(Debug, Error)]
pub enum ArchiveError {
	// Rust std io error
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Env(#[from] env::VarError),
	#[error(transparent)]
	Conversion(#[from] num::TryFromIntError),

	// encoding error
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),

	// database error
	#[error(transparent)]
	Fmt(#[from] fmt::Error),
	#[error("sqlx error: {0}")]
	Sql(#[from] sqlx::Error),
	#[error("migration error: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),

	// outbound http error
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),

	// actor and channel error
	#[error("Trying to send to disconnected actor")]
	Disconnected,
	#[error("Sending on a disconnected channel")]
	Channel,

	/// City slug failed the `^[a-z0-9]+[A-Z]{2}$` shape check.
	#[error("invalid city slug `{0}`")]
	InvalidBanana(String),

	#[error("no adapter registered for vendor `{0}`")]
	UnknownVendor(String),

	/// The summarizer cannot run without credentials. Jobs failing on this
	/// are never retried.
	#[error("analyzer unavailable: LLM_API_KEY is not set")]
	MissingCredentials,

	#[error("vendor fetch failed: {0}")]
	Vendor(String),

	#[error("document extraction failed: {0}")]
	Extraction(String),

	#[error("summarizer failed: {0}")]
	Summarizer(String),

	/// A row violated an invariant; surfaced for manual review.
	#[error("validation failed: {0}")]
	Validation(String),

	#[error("{0}")]
	Shutdown(String),
}

impl ArchiveError {
	/// Whether a job failing with this error should be retried by the queue.
	/// Configuration and validation problems will not get better on their
	/// own; everything else is assumed transient.
	pub fn is_retryable(&self) -> bool {
		!matches!(
			self,
			ArchiveError::MissingCredentials
				| ArchiveError::Validation(_)
				| ArchiveError::InvalidBanana(_)
				| ArchiveError::UnknownVendor(_)
		)
	}
}

impl From<xtra::Disconnected> for ArchiveError {
	fn from(_: xtra::Disconnected) -> Self {
		Self::Disconnected
	}
}

impl<T> From<flume::SendError<T>> for ArchiveError {
	fn from(_: flume::SendError<T>) -> Self {
		Self::Channel
	}
}
