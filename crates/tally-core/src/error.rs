// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the record model.

use thiserror::Error;

/// Errors raised while validating records or decoding snapshots.
#[derive(Debug, Error)]
pub enum CoreError {
	/// A value falls outside the property value domain.
	#[error("invalid property value: {0}")]
	InvalidProperty(String),

	/// A snapshot was written by an incompatible schema version.
	#[error("unsupported snapshot version {found} (expected {expected})")]
	UnsupportedSnapshotVersion { found: u32, expected: u32 },

	/// Snapshot encoding or decoding failed.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Result type alias for record operations.
pub type Result<T> = std::result::Result<T, CoreError>;
