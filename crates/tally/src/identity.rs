// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Events and people identities.

use uuid::Uuid;

/// The two identities a client stamps onto its records.
///
/// The events identity always exists; it starts as a generated device id. The
/// people identity is unset until `identify_people`, and profile updates
/// issued before then are held back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityState {
	events_distinct_id: String,
	people_distinct_id: Option<String>,
}

impl IdentityState {
	/// Creates a state with a freshly generated device id.
	pub fn new() -> Self {
		Self {
			events_distinct_id: generate_device_id(),
			people_distinct_id: None,
		}
	}

	/// Restores persisted identities.
	pub fn restore(events_distinct_id: String, people_distinct_id: Option<String>) -> Self {
		Self {
			events_distinct_id,
			people_distinct_id,
		}
	}

	pub fn events_distinct_id(&self) -> &str {
		&self.events_distinct_id
	}

	pub fn people_distinct_id(&self) -> Option<&str> {
		self.people_distinct_id.as_deref()
	}

	pub fn set_events_distinct_id(&mut self, id: impl Into<String>) {
		self.events_distinct_id = id.into();
	}

	pub fn set_people_distinct_id(&mut self, id: impl Into<String>) {
		self.people_distinct_id = Some(id.into());
	}

	/// Forgets both identities; the events identity becomes a new device id.
	pub fn reset(&mut self) {
		self.events_distinct_id = generate_device_id();
		self.people_distinct_id = None;
	}
}

impl Default for IdentityState {
	fn default() -> Self {
		Self::new()
	}
}

fn generate_device_id() -> String {
	Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_state_has_device_id_and_no_people_id() {
		let state = IdentityState::new();
		assert!(Uuid::parse_str(state.events_distinct_id()).is_ok());
		assert!(state.people_distinct_id().is_none());
	}

	#[test]
	fn reset_generates_new_device_id() {
		let mut state = IdentityState::new();
		state.set_people_distinct_id("u1");
		let before = state.events_distinct_id().to_string();

		state.reset();

		assert_ne!(state.events_distinct_id(), before);
		assert!(state.people_distinct_id().is_none());
	}

	#[test]
	fn identities_are_independent() {
		let mut state = IdentityState::new();
		state.set_events_distinct_id("e");
		state.set_people_distinct_id("p");
		assert_eq!(state.events_distinct_id(), "e");
		assert_eq!(state.people_distinct_id(), Some("p"));
	}
}
