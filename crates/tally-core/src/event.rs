// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracked events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::properties::Properties;

/// A tracked event waiting for delivery.
///
/// The properties already contain the merged super properties and the
/// distinct id is the events identity at the moment `track` was called;
/// neither changes once the event is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub name: String,
	pub properties: Properties,
	pub distinct_id: String,
	pub timestamp: DateTime<Utc>,
}

impl Event {
	/// Creates an event stamped with the current time.
	pub fn new(name: impl Into<String>, properties: Properties, distinct_id: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			properties,
			distinct_id: distinct_id.into(),
			timestamp: Utc::now(),
		}
	}

	/// Renders the event for the collector.
	///
	/// `token`, `distinct_id` and `time` are reserved and always reflect the
	/// record itself, whatever the caller put in the properties.
	pub fn to_wire(&self, token: &str) -> serde_json::Value {
		let mut properties = self.properties.to_wire();
		properties.insert("token".to_string(), token.into());
		properties.insert("distinct_id".to_string(), self.distinct_id.clone().into());
		properties.insert("time".to_string(), self.timestamp.timestamp().into());

		serde_json::json!({
			"event": self.name,
			"properties": properties,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn event_wire_form_carries_reserved_fields() {
		let mut event = Event::new("Signed Up", Properties::new().insert("plan", "pro"), "device-1");
		event.timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

		let wire = event.to_wire("tok_123");
		assert_eq!(wire["event"], "Signed Up");
		assert_eq!(wire["properties"]["plan"], "pro");
		assert_eq!(wire["properties"]["token"], "tok_123");
		assert_eq!(wire["properties"]["distinct_id"], "device-1");
		assert_eq!(wire["properties"]["time"], 1_714_564_800);
	}

	#[test]
	fn reserved_fields_override_caller_properties() {
		let event = Event::new(
			"x",
			Properties::new().insert("distinct_id", "spoofed"),
			"real",
		);
		assert_eq!(event.to_wire("t")["properties"]["distinct_id"], "real");
	}

	#[test]
	fn event_serde_roundtrip() {
		let event = Event::new("Opened", Properties::new().insert("n", 1), "d");
		let json = serde_json::to_string(&event).unwrap();
		let parsed: Event = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed, event);
	}
}
