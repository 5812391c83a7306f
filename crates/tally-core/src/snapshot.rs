// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The persisted archive of a client's state.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::event::Event;
use crate::profile::ProfileUpdate;
use crate::properties::Properties;

/// Schema version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything a client needs to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
	pub version: u32,
	pub events_distinct_id: String,
	#[serde(default)]
	pub people_distinct_id: Option<String>,
	#[serde(default)]
	pub name_tag: Option<String>,
	#[serde(default)]
	pub super_properties: Properties,
	#[serde(default)]
	pub events: Vec<Event>,
	/// Profile updates waiting for a people identity, oldest first.
	#[serde(default)]
	pub people_pending: Vec<ProfileUpdate>,
	/// Profile updates ready for delivery, oldest first.
	#[serde(default)]
	pub people_ready: Vec<ProfileUpdate>,
}

impl Snapshot {
	/// Creates an empty snapshot for the given events identity.
	pub fn empty(events_distinct_id: impl Into<String>) -> Self {
		Self {
			version: SNAPSHOT_VERSION,
			events_distinct_id: events_distinct_id.into(),
			people_distinct_id: None,
			name_tag: None,
			super_properties: Properties::new(),
			events: Vec::new(),
			people_pending: Vec::new(),
			people_ready: Vec::new(),
		}
	}

	/// Encodes the snapshot. Encoding is deterministic for equal snapshots.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(self)?)
	}

	/// Decodes a snapshot, refusing versions this build does not understand.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let snapshot: Snapshot = serde_json::from_slice(bytes)?;
		if snapshot.version != SNAPSHOT_VERSION {
			return Err(CoreError::UnsupportedSnapshotVersion {
				found: snapshot.version,
				expected: SNAPSHOT_VERSION,
			});
		}
		Ok(snapshot)
	}

	/// Number of records still awaiting delivery or identification.
	pub fn pending_records(&self) -> usize {
		self.events.len() + self.people_pending.len() + self.people_ready.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::profile::ProfileOp;

	fn sample() -> Snapshot {
		let mut snapshot = Snapshot::empty("device-1");
		snapshot.people_distinct_id = Some("user-1".to_string());
		snapshot.super_properties = Properties::new().insert("app", "demo");
		snapshot.events.push(Event::new("Opened", Properties::new(), "device-1"));
		snapshot
			.people_pending
			.push(ProfileUpdate::new(ProfileOp::ClearCharges, None));
		snapshot.people_ready.push(ProfileUpdate::new(
			ProfileOp::DeleteUser,
			Some("user-1".to_string()),
		));
		snapshot
	}

	#[test]
	fn snapshot_roundtrip_preserves_everything() {
		let snapshot = sample();
		let bytes = snapshot.to_bytes().unwrap();
		let parsed = Snapshot::from_bytes(&bytes).unwrap();
		assert_eq!(parsed, snapshot);
		assert_eq!(parsed.pending_records(), 3);
	}

	#[test]
	fn reencoding_is_byte_identical() {
		let bytes = sample().to_bytes().unwrap();
		let again = Snapshot::from_bytes(&bytes).unwrap().to_bytes().unwrap();
		assert_eq!(bytes, again);
	}

	#[test]
	fn unknown_version_is_rejected() {
		let mut snapshot = sample();
		snapshot.version = SNAPSHOT_VERSION + 1;
		let bytes = serde_json::to_vec(&snapshot).unwrap();
		assert!(matches!(
			Snapshot::from_bytes(&bytes),
			Err(CoreError::UnsupportedSnapshotVersion { .. })
		));
	}

	#[test]
	fn garbage_is_a_serialization_error() {
		assert!(matches!(
			Snapshot::from_bytes(b"{not json"),
			Err(CoreError::Serialization(_))
		));
	}

	#[test]
	fn missing_collections_default_to_empty() {
		let parsed =
			Snapshot::from_bytes(br#"{"version":1,"events_distinct_id":"d"}"#).unwrap();
		assert_eq!(parsed, Snapshot::empty("d"));
	}
}
