// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! `TALLY_*` environment variables, then the client builder's setters.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::ValidationMode;
use tracing::debug;

use crate::error::{Result, TallyError};

/// Default collector endpoint.
pub const DEFAULT_SERVER_URL: &str = "https://api.mixpanel.com";

/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of records per delivery attempt.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Default bound of each queue.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 5000;

/// Default number of consecutive rejections before a batch is discarded.
pub const DEFAULT_MAX_REJECTED_ATTEMPTS: u32 = 3;

/// Tuning for a [`TallyClient`](crate::TallyClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Period of the flush timer. Zero disables timed flushes.
	#[serde(with = "duration_secs")]
	pub flush_interval: Duration,
	/// Whether entering the background requests a flush.
	pub flush_on_background: bool,
	/// Whether the activity indicator is toggled around deliveries.
	pub show_network_activity_indicator: bool,
	pub server_url: String,
	pub max_batch_size: usize,
	pub max_queue_size: usize,
	#[serde(with = "duration_secs")]
	pub request_timeout: Duration,
	#[serde(with = "duration_secs")]
	pub base_backoff: Duration,
	#[serde(with = "duration_secs")]
	pub max_backoff: Duration,
	/// Consecutive rejections of the same head batch after which it is dropped.
	pub max_rejected_attempts: u32,
	pub validation_mode: ValidationMode,
	/// Directory holding snapshot files. `None` means the platform data dir.
	pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			flush_interval: DEFAULT_FLUSH_INTERVAL,
			flush_on_background: true,
			show_network_activity_indicator: true,
			server_url: DEFAULT_SERVER_URL.to_string(),
			max_batch_size: DEFAULT_MAX_BATCH_SIZE,
			max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
			request_timeout: Duration::from_secs(30),
			base_backoff: Duration::from_secs(5),
			max_backoff: Duration::from_secs(600),
			max_rejected_attempts: DEFAULT_MAX_REJECTED_ATTEMPTS,
			validation_mode: ValidationMode::default(),
			data_dir: None,
		}
	}
}

impl ClientConfig {
	/// Parses a TOML document; missing keys keep their defaults.
	pub fn from_toml_str(content: &str) -> Result<Self> {
		toml::from_str(content).map_err(|e| TallyError::Config(e.to_string()))
	}

	/// Loads defaults, then `path` if it exists, then the environment.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let mut config = match path {
			Some(path) if path.exists() => {
				let content = std::fs::read_to_string(path)?;
				debug!(path = %path.display(), "loaded client config file");
				Self::from_toml_str(&content)?
			}
			_ => Self::default(),
		};
		config.apply_env();
		config.validate()?;
		Ok(config)
	}

	/// Applies `TALLY_*` overrides from the process environment.
	pub fn apply_env(&mut self) {
		self.apply_env_from(|key| std::env::var(key).ok());
	}

	/// Applies overrides from `lookup`. Unparseable values are ignored.
	pub fn apply_env_from<F>(&mut self, lookup: F)
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(secs) = lookup("TALLY_FLUSH_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
			self.flush_interval = Duration::from_secs(secs);
		}
		if let Some(url) = lookup("TALLY_SERVER_URL") {
			self.server_url = url;
		}
		if let Some(size) = lookup("TALLY_MAX_QUEUE_SIZE").and_then(|s| s.parse().ok()) {
			self.max_queue_size = size;
		}
		if let Some(size) = lookup("TALLY_MAX_BATCH_SIZE").and_then(|s| s.parse().ok()) {
			self.max_batch_size = size;
		}
		if let Some(attempts) = lookup("TALLY_MAX_REJECTED_ATTEMPTS").and_then(|s| s.parse().ok()) {
			self.max_rejected_attempts = attempts;
		}
		if let Some(flag) = lookup("TALLY_FLUSH_ON_BACKGROUND") {
			self.flush_on_background = flag != "0" && flag.to_lowercase() != "false";
		}
		if let Some(dir) = lookup("TALLY_DATA_DIR") {
			self.data_dir = Some(PathBuf::from(dir));
		}
	}

	/// Rejects settings the client cannot run with.
	pub fn validate(&self) -> Result<()> {
		if self.max_batch_size == 0 {
			return Err(TallyError::Config("max_batch_size must be at least 1".to_string()));
		}
		if self.max_queue_size == 0 {
			return Err(TallyError::Config("max_queue_size must be at least 1".to_string()));
		}
		if self.max_rejected_attempts == 0 {
			return Err(TallyError::Config(
				"max_rejected_attempts must be at least 1".to_string(),
			));
		}
		if self.request_timeout.is_zero() {
			return Err(TallyError::Config("request_timeout must be non-zero".to_string()));
		}
		if self.base_backoff > self.max_backoff {
			return Err(TallyError::Config(
				"base_backoff must not exceed max_backoff".to_string(),
			));
		}
		Ok(())
	}

	/// The directory snapshot files live in.
	pub fn resolved_data_dir(&self) -> Result<PathBuf> {
		match &self.data_dir {
			Some(dir) => Ok(dir.clone()),
			None => dirs::data_dir().map(|dir| dir.join("tally")).ok_or_else(|| {
				TallyError::Config("could not determine platform data directory".to_string())
			}),
		}
	}
}

mod duration_secs {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		duration.as_secs().serialize(serializer)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let secs = u64::deserialize(deserializer)?;
		Ok(Duration::from_secs(secs))
	}
}
