// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the telemetry client.
//!
//! None of these ever reach a tracking call; they travel between the flush
//! worker, the transport and the snapshot store, where they are logged and
//! recovered from.

use std::time::Duration;

use tally_core::CoreError;
use thiserror::Error;

/// Telemetry client errors.
#[derive(Debug, Error)]
pub enum TallyError {
	/// Project token is missing or empty.
	#[error("project token is required")]
	MissingToken,

	/// Server URL is missing or invalid.
	#[error("invalid server URL: {0}")]
	InvalidServerUrl(String),

	/// Configuration could not be loaded.
	#[error("configuration error: {0}")]
	Config(String),

	/// HTTP request failed.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Server returned an error response.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// Rate limited by the server.
	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },

	/// The transport did not answer within the configured timeout.
	#[error("request timed out after {0:?}")]
	Timeout(Duration),

	/// Client has been shut down.
	#[error("client has been shut down")]
	ClientShutdown,

	/// Snapshot file I/O failed.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Record or snapshot encoding failed.
	#[error("record error: {0}")]
	Record(#[from] CoreError),

	/// Serialization error.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl TallyError {
	/// Whether a later attempt with the same payload may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			TallyError::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
			TallyError::ServerError { status, .. } => {
				matches!(*status, 429 | 408 | 500 | 502 | 503 | 504)
			}
			TallyError::RateLimited { .. } => true,
			TallyError::Timeout(_) => true,
			_ => false,
		}
	}

	/// Minimum delay the server asked for before the next attempt.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			TallyError::RateLimited {
				retry_after_secs: Some(secs),
			} => Some(Duration::from_secs(*secs)),
			_ => None,
		}
	}
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, TallyError>;
