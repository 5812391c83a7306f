// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The mutable state shared by call sites and the flush worker.

use tally_core::{Event, ProfileOp, ProfileUpdate, Properties, Snapshot, SNAPSHOT_VERSION};
use tracing::debug;

use crate::identity::IdentityState;
use crate::queue::{EventQueue, ProfileUpdateQueue};
use crate::super_props::SuperPropertyStore;

/// Library name reported with every event.
const LIB_NAME: &str = "rust";
/// Library version reported with every event.
const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a client persists, behind one lock.
#[derive(Debug)]
pub struct ClientState {
	pub(crate) identity: IdentityState,
	pub(crate) super_props: SuperPropertyStore,
	pub(crate) events: EventQueue,
	pub(crate) people: ProfileUpdateQueue,
	pub(crate) name_tag: Option<String>,
	dirty: bool,
}

impl ClientState {
	/// Creates empty state with a new device id.
	pub fn new(queue_capacity: usize) -> Self {
		Self {
			identity: IdentityState::new(),
			super_props: SuperPropertyStore::new(),
			events: EventQueue::new(queue_capacity),
			people: ProfileUpdateQueue::new(queue_capacity),
			name_tag: None,
			dirty: false,
		}
	}

	/// Rebuilds state from a persisted snapshot.
	pub fn restore(snapshot: Snapshot, queue_capacity: usize) -> Self {
		Self {
			identity: IdentityState::restore(snapshot.events_distinct_id, snapshot.people_distinct_id),
			super_props: SuperPropertyStore::from_properties(snapshot.super_properties),
			events: EventQueue::from_events(snapshot.events, queue_capacity),
			people: ProfileUpdateQueue::from_parts(
				snapshot.people_pending,
				snapshot.people_ready,
				queue_capacity,
			),
			name_tag: snapshot.name_tag,
			dirty: false,
		}
	}

	/// Captures the state as a snapshot.
	pub fn snapshot(&self) -> Snapshot {
		Snapshot {
			version: SNAPSHOT_VERSION,
			events_distinct_id: self.identity.events_distinct_id().to_string(),
			people_distinct_id: self.identity.people_distinct_id().map(str::to_string),
			name_tag: self.name_tag.clone(),
			super_properties: self.super_props.current(),
			events: self.events.to_vec(),
			people_pending: self.people.pending_to_vec(),
			people_ready: self.people.ready_to_vec(),
		}
	}

	/// Builds an event from the current super properties and identity.
	///
	/// Precedence, lowest first: library properties, name tag, super
	/// properties, the caller's properties.
	pub fn build_event(&self, name: &str, properties: Properties) -> Event {
		let mut merged = Properties::new()
			.insert("mp_lib", LIB_NAME)
			.insert("$lib_version", LIB_VERSION)
			.insert("$os", std::env::consts::OS);
		if let Some(tag) = &self.name_tag {
			merged.set("mp_name_tag", tag.clone());
		}
		merged.extend(self.super_props.current());
		merged.extend(properties);

		Event::new(name, merged, self.identity.events_distinct_id())
	}

	/// Builds and queues an event.
	pub fn track(&mut self, name: &str, properties: Properties) {
		let event = self.build_event(name, properties);
		self.events.enqueue(event);
		self.mark_dirty();
	}

	/// Queues a profile operation for the people identity, or holds it back
	/// when none is set.
	pub fn enqueue_profile_op(&mut self, op: ProfileOp) {
		let distinct_id = self.identity.people_distinct_id().map(str::to_string);
		self.people.enqueue(ProfileUpdate::new(op, distinct_id));
		self.mark_dirty();
	}

	/// Changes the events identity for events tracked from now on.
	pub fn identify_events(&mut self, distinct_id: &str) {
		self.identity.set_events_distinct_id(distinct_id);
		self.mark_dirty();
	}

	/// Sets the people identity and releases held-back profile updates.
	///
	/// Returns how many held-back updates were released.
	pub fn identify_people(&mut self, distinct_id: &str) -> usize {
		self.identity.set_people_distinct_id(distinct_id);
		let released = self.people.drain_pending(distinct_id);
		if released > 0 {
			debug!(released, "released profile updates waiting for identity");
		}
		self.mark_dirty();
		released
	}

	/// Forgets identities, super properties, name tag and every queued record.
	pub fn reset(&mut self) {
		self.identity.reset();
		self.super_props.clear();
		self.events.clear();
		self.people.clear();
		self.name_tag = None;
		self.mark_dirty();
	}

	pub fn mark_dirty(&mut self) {
		self.dirty = true;
	}

	/// Clears the dirty flag, returning whether it was set.
	pub fn take_dirty(&mut self) -> bool {
		std::mem::take(&mut self.dirty)
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	/// Whether nothing is waiting for delivery.
	pub fn is_drained(&self) -> bool {
		self.events.is_empty() && self.people.ready_len() == 0
	}
}
