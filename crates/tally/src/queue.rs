// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded FIFO queues for events and profile updates.
//!
//! Queues are plain data; the client guards them with its state lock. A flush
//! takes a [`Peeked`] batch, sends it without holding the lock and then hands
//! the batch's [`AckTicket`] back. The ticket removes exactly the entries that
//! were sent and are still present, however many records were appended,
//! evicted or cleared in the meantime.

use std::collections::VecDeque;

use tally_core::{Event, ProfileUpdate};
use tracing::warn;

/// Proof of which entries a flush sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckTicket {
	epoch: u64,
	evicted_at_peek: u64,
	len: usize,
}

impl AckTicket {
	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Whether both tickets were peeked from the same head entry, i.e. nothing
	/// was acknowledged, evicted or cleared in between.
	pub fn same_head(&self, other: &AckTicket) -> bool {
		self.epoch == other.epoch && self.evicted_at_peek == other.evicted_at_peek
	}
}

/// A batch taken from the head of a queue.
#[derive(Debug, Clone)]
pub struct Peeked<T> {
	pub items: Vec<T>,
	pub ticket: AckTicket,
}

/// An ordered queue that drops its oldest entry when full.
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
	items: VecDeque<T>,
	capacity: usize,
	/// Bumped whenever the queue is emptied wholesale; stale tickets become no-ops.
	epoch: u64,
	/// Total entries ever evicted from the head by the bound.
	evicted: u64,
}

impl<T: Clone> BoundedQueue<T> {
	/// Creates an empty queue holding at most `capacity` entries.
	pub fn new(capacity: usize) -> Self {
		Self {
			items: VecDeque::new(),
			capacity: capacity.max(1),
			epoch: 0,
			evicted: 0,
		}
	}

	/// Creates a queue pre-filled from a snapshot, keeping the newest entries.
	pub fn from_items(items: Vec<T>, capacity: usize) -> Self {
		let mut queue = Self::new(capacity);
		for item in items {
			queue.enqueue(item);
		}
		queue.evicted = 0;
		queue
	}

	/// Appends an entry, returning the entry evicted to respect the bound.
	pub fn enqueue(&mut self, item: T) -> Option<T> {
		let dropped = if self.items.len() >= self.capacity {
			self.evicted += 1;
			self.items.pop_front()
		} else {
			None
		};
		self.items.push_back(item);
		dropped
	}

	/// Clones up to `max` of the oldest entries.
	pub fn peek_batch(&self, max: usize) -> Peeked<T> {
		let items: Vec<T> = self.items.iter().take(max).cloned().collect();
		Peeked {
			ticket: AckTicket {
				epoch: self.epoch,
				evicted_at_peek: self.evicted,
				len: items.len(),
			},
			items,
		}
	}

	/// Removes the entries covered by `ticket` that are still queued.
	///
	/// Returns how many entries were removed.
	pub fn acknowledge(&mut self, ticket: AckTicket) -> usize {
		if ticket.epoch != self.epoch {
			return 0;
		}
		let evicted_since = (self.evicted - ticket.evicted_at_peek) as usize;
		let remove = ticket.len.saturating_sub(evicted_since).min(self.items.len());
		self.items.drain(..remove);
		remove
	}

	/// Removes and returns every entry, invalidating outstanding tickets.
	pub fn take_all(&mut self) -> Vec<T> {
		self.epoch += 1;
		self.items.drain(..).collect()
	}

	/// Empties the queue, invalidating outstanding tickets.
	pub fn clear(&mut self) {
		self.epoch += 1;
		self.items.clear();
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Clones every entry, oldest first.
	pub fn to_vec(&self) -> Vec<T> {
		self.items.iter().cloned().collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.items.iter()
	}
}

/// Pending events.
#[derive(Debug, Clone)]
pub struct EventQueue {
	inner: BoundedQueue<Event>,
}

impl EventQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: BoundedQueue::new(capacity),
		}
	}

	pub fn from_events(events: Vec<Event>, capacity: usize) -> Self {
		Self {
			inner: BoundedQueue::from_items(events, capacity),
		}
	}

	/// Appends an event, dropping the oldest one when the queue is full.
	pub fn enqueue(&mut self, event: Event) {
		if let Some(dropped) = self.inner.enqueue(event) {
			warn!(
				event_name = %dropped.name,
				distinct_id = %dropped.distinct_id,
				"dropped event due to queue overflow"
			);
		}
	}

	pub fn peek_batch(&self, max: usize) -> Peeked<Event> {
		self.inner.peek_batch(max)
	}

	pub fn acknowledge(&mut self, ticket: AckTicket) -> usize {
		self.inner.acknowledge(ticket)
	}

	pub fn clear(&mut self) {
		self.inner.clear();
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn to_vec(&self) -> Vec<Event> {
		self.inner.to_vec()
	}
}

/// Pending profile updates.
///
/// Updates without a people identity wait in the pending buffer; everything
/// in the ready queue is addressed and deliverable.
#[derive(Debug, Clone)]
pub struct ProfileUpdateQueue {
	pending: BoundedQueue<ProfileUpdate>,
	ready: BoundedQueue<ProfileUpdate>,
}

impl ProfileUpdateQueue {
	pub fn new(capacity: usize) -> Self {
		Self {
			pending: BoundedQueue::new(capacity),
			ready: BoundedQueue::new(capacity),
		}
	}

	pub fn from_parts(pending: Vec<ProfileUpdate>, ready: Vec<ProfileUpdate>, capacity: usize) -> Self {
		Self {
			pending: BoundedQueue::from_items(pending, capacity),
			ready: BoundedQueue::from_items(ready, capacity),
		}
	}

	/// Routes an update by whether it carries a people identity.
	pub fn enqueue(&mut self, update: ProfileUpdate) {
		let (queue, buffer) = if update.distinct_id.is_some() {
			(&mut self.ready, "ready")
		} else {
			(&mut self.pending, "pending")
		};
		if let Some(dropped) = queue.enqueue(update) {
			warn!(
				op = dropped.op.kind(),
				buffer,
				"dropped profile update due to queue overflow"
			);
		}
	}

	/// Moves every pending update, in order, to the ready queue addressed to
	/// `distinct_id`. Returns how many updates moved.
	pub fn drain_pending(&mut self, distinct_id: &str) -> usize {
		let pending = self.pending.take_all();
		let moved = pending.len();
		for update in pending {
			self.enqueue(update.restamped(distinct_id));
		}
		moved
	}

	pub fn peek_ready(&self, max: usize) -> Peeked<ProfileUpdate> {
		self.ready.peek_batch(max)
	}

	pub fn acknowledge_ready(&mut self, ticket: AckTicket) -> usize {
		self.ready.acknowledge(ticket)
	}

	/// Empties both the pending buffer and the ready queue.
	pub fn clear(&mut self) {
		self.pending.clear();
		self.ready.clear();
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	pub fn ready_len(&self) -> usize {
		self.ready.len()
	}

	pub fn pending_to_vec(&self) -> Vec<ProfileUpdate> {
		self.pending.to_vec()
	}

	pub fn ready_to_vec(&self) -> Vec<ProfileUpdate> {
		self.ready.to_vec()
	}
}
