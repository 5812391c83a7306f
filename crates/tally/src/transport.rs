// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Collaborators the flush controller calls into.
//!
//! The controller never talks to the network itself. It hands batches to a
//! [`Transport`], asks an optional [`FlushGate`] whether it may send now, and
//! toggles an optional [`ActivityIndicator`] around each attempt.

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{Event, ProfileUpdate};

use crate::error::Result;

/// One delivery attempt's worth of records.
#[derive(Debug, Clone)]
pub struct FlushBatch {
	pub token: String,
	pub events: Vec<Event>,
	pub profile_updates: Vec<ProfileUpdate>,
}

impl FlushBatch {
	pub fn is_empty(&self) -> bool {
		self.events.is_empty() && self.profile_updates.is_empty()
	}

	pub fn len(&self) -> usize {
		self.events.len() + self.profile_updates.len()
	}
}

/// Delivers batches to the collector.
///
/// `Ok(())` means every record in the batch was accepted. The flush controller
/// hands over one queue's records per call, so an error only holds back the
/// queue the batch came from.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn send(&self, batch: &FlushBatch) -> Result<()>;
}

/// Answer of a [`FlushGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
	Proceed,
	Defer,
}

/// Lets the application veto a flush, e.g. while on a metered connection.
#[async_trait]
pub trait FlushGate: Send + Sync {
	async fn should_flush_now(&self) -> FlushDecision;
}

/// The default gate: always proceed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFlush;

#[async_trait]
impl FlushGate for AlwaysFlush {
	async fn should_flush_now(&self) -> FlushDecision {
		FlushDecision::Proceed
	}
}

/// A purely cosmetic "network busy" indicator.
pub trait ActivityIndicator: Send + Sync {
	fn start(&self);
	fn stop(&self);
}

/// Indicator that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpActivityIndicator;

impl ActivityIndicator for NoOpActivityIndicator {
	fn start(&self) {}

	fn stop(&self) {}
}

/// Type alias for a shared transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Type alias for a shared flush gate.
pub type SharedFlushGate = Arc<dyn FlushGate>;

/// Type alias for a shared activity indicator.
pub type SharedActivityIndicator = Arc<dyn ActivityIndicator>;

#[cfg(test)]
mod tests {
	use super::*;
	use tally_core::Properties;

	#[test]
	fn always_flush_proceeds() {
		let decision = tokio_test::block_on(AlwaysFlush.should_flush_now());
		assert_eq!(decision, FlushDecision::Proceed);
	}

	#[test]
	fn batch_len_counts_both_queues() {
		let batch = FlushBatch {
			token: "t".to_string(),
			events: vec![Event::new("a", Properties::new(), "d")],
			profile_updates: Vec::new(),
		};
		assert_eq!(batch.len(), 1);
		assert!(!batch.is_empty());
	}
}
