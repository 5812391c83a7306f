// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flush scheduling and delivery.
//!
//! A single background task per client owns the flush loop. It wakes on the
//! interval timer, on flush requests and on persistence requests. A delivery
//! attempt ("cycle") consults the [`FlushGate`](crate::FlushGate), then sends
//! batches peeked from the queues until they are drained or a send fails.
//! Events and profile updates travel in separate batches and are acknowledged
//! independently, so a failure on one queue never removes entries from the
//! other. After a failure the worker waits out an exponential backoff, during
//! which further triggers are coalesced.
//!
//! A batch the collector rejects outright stays queued like any other failed
//! batch. Only after `max_rejected_attempts` consecutive rejections of the
//! same head batch is it dropped, logged at `error`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, TallyError};
use crate::queue::AckTicket;
use crate::state::ClientState;
use crate::store::Persister;
use crate::transport::{
	FlushBatch, FlushDecision, SharedActivityIndicator, SharedFlushGate, SharedTransport,
};

/// Where the flush state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPhase {
	Idle,
	FlushInFlight,
	BackoffWait,
}

/// What started a flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
	Timer,
	Requested,
	Background,
	Explicit,
}

/// Result of one flush cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
	/// Records left the queues: delivered, or dropped after repeated rejection.
	Sent {
		events: usize,
		profile_updates: usize,
		discarded: usize,
	},
	/// The queues were empty.
	NothingToSend,
	/// The flush gate vetoed the attempt.
	Deferred,
	/// A send failed; every undelivered record is still queued.
	Failed { error: String, retryable: bool },
}

/// The queue a batch was peeked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
	Events,
	ProfileUpdates,
}

impl Stream {
	const ALL: [Stream; 2] = [Stream::Events, Stream::ProfileUpdates];

	fn as_str(self) -> &'static str {
		match self {
			Stream::Events => "events",
			Stream::ProfileUpdates => "profile_updates",
		}
	}
}

/// Consecutive rejections of one queue's head batch.
#[derive(Debug, Default)]
struct RejectionStreak {
	head: Option<AckTicket>,
	count: u32,
}

impl RejectionStreak {
	/// Records a rejection of the batch peeked under `ticket` and returns the
	/// streak length.
	fn record(&mut self, ticket: AckTicket) -> u32 {
		match self.head {
			Some(head) if head.same_head(&ticket) => self.count += 1,
			_ => {
				self.head = Some(ticket);
				self.count = 1;
			}
		}
		self.count
	}

	fn clear(&mut self) {
		self.head = None;
		self.count = 0;
	}
}

#[derive(Debug, Default)]
struct CycleCounts {
	events: usize,
	profile_updates: usize,
	discarded: usize,
}

impl CycleCounts {
	fn delivered(&mut self, stream: Stream, n: usize) {
		match stream {
			Stream::Events => self.events += n,
			Stream::ProfileUpdates => self.profile_updates += n,
		}
	}

	fn is_empty(&self) -> bool {
		self.events + self.profile_updates + self.discarded == 0
	}
}

/// Drives delivery of the queued records.
pub struct FlushController {
	state: Arc<Mutex<ClientState>>,
	persister: Arc<Persister>,
	transport: SharedTransport,
	gate: SharedFlushGate,
	indicator: Option<SharedActivityIndicator>,
	token: String,
	config: ClientConfig,
	phase: Mutex<FlushPhase>,
	failures: AtomicU32,
	retry_after: Mutex<Option<Duration>>,
	event_rejections: Mutex<RejectionStreak>,
	update_rejections: Mutex<RejectionStreak>,
	last_trigger: Mutex<Option<FlushTrigger>>,
	cycle_lock: tokio::sync::Mutex<()>,
	timer_paused: AtomicBool,
	flush_notify: Notify,
	background_notify: Notify,
	persist_notify: Notify,
	wake: Notify,
	cancel: CancellationToken,
}

impl FlushController {
	pub fn new(
		state: Arc<Mutex<ClientState>>,
		persister: Arc<Persister>,
		transport: SharedTransport,
		gate: SharedFlushGate,
		indicator: Option<SharedActivityIndicator>,
		token: String,
		config: ClientConfig,
	) -> Self {
		Self {
			state,
			persister,
			transport,
			gate,
			indicator,
			token,
			config,
			phase: Mutex::new(FlushPhase::Idle),
			failures: AtomicU32::new(0),
			retry_after: Mutex::new(None),
			event_rejections: Mutex::new(RejectionStreak::default()),
			update_rejections: Mutex::new(RejectionStreak::default()),
			last_trigger: Mutex::new(None),
			cycle_lock: tokio::sync::Mutex::new(()),
			timer_paused: AtomicBool::new(false),
			flush_notify: Notify::new(),
			background_notify: Notify::new(),
			persist_notify: Notify::new(),
			wake: Notify::new(),
			cancel: CancellationToken::new(),
		}
	}

	pub fn phase(&self) -> FlushPhase {
		*self.phase.lock()
	}

	/// Consecutive failed cycles since the last success.
	pub fn consecutive_failures(&self) -> u32 {
		self.failures.load(Ordering::SeqCst)
	}

	/// The trigger of the most recent cycle that got past the gate.
	pub fn last_trigger(&self) -> Option<FlushTrigger> {
		*self.last_trigger.lock()
	}

	/// Asks the worker to flush. Requests made while one is pending coalesce.
	pub fn request_flush(&self) {
		self.flush_notify.notify_one();
	}

	/// Asks the worker to flush because the application is going to the
	/// background.
	pub fn request_background_flush(&self) {
		self.background_notify.notify_one();
	}

	/// Asks the worker to save the state if it changed.
	pub fn request_persist(&self) {
		self.persist_notify.notify_one();
	}

	/// Stops timer-driven flushes until [`resume_timer`](Self::resume_timer).
	pub fn pause_timer(&self) {
		self.timer_paused.store(true, Ordering::SeqCst);
		self.wake.notify_one();
	}

	pub fn resume_timer(&self) {
		self.timer_paused.store(false, Ordering::SeqCst);
		self.wake.notify_one();
	}

	pub fn is_timer_paused(&self) -> bool {
		self.timer_paused.load(Ordering::SeqCst)
	}

	/// Stops the worker loop after its current step.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	fn set_phase(&self, phase: FlushPhase) {
		*self.phase.lock() = phase;
	}

	fn rejections(&self, stream: Stream) -> &Mutex<RejectionStreak> {
		match stream {
			Stream::Events => &self.event_rejections,
			Stream::ProfileUpdates => &self.update_rejections,
		}
	}

	fn peek(&self, stream: Stream) -> (FlushBatch, AckTicket) {
		let state = self.state.lock();
		let max = self.config.max_batch_size;
		let mut batch = FlushBatch {
			token: self.token.clone(),
			events: Vec::new(),
			profile_updates: Vec::new(),
		};
		let ticket = match stream {
			Stream::Events => {
				let peeked = state.events.peek_batch(max);
				batch.events = peeked.items;
				peeked.ticket
			}
			Stream::ProfileUpdates => {
				let peeked = state.people.peek_ready(max);
				batch.profile_updates = peeked.items;
				peeked.ticket
			}
		};
		(batch, ticket)
	}

	fn acknowledge(&self, stream: Stream, ticket: AckTicket) {
		let mut state = self.state.lock();
		match stream {
			Stream::Events => state.events.acknowledge(ticket),
			Stream::ProfileUpdates => state.people.acknowledge_ready(ticket),
		};
		state.mark_dirty();
	}

	async fn send(&self, batch: &FlushBatch) -> Result<()> {
		match tokio::time::timeout(self.config.request_timeout, self.transport.send(batch)).await {
			Ok(result) => result,
			Err(_) => Err(TallyError::Timeout(self.config.request_timeout)),
		}
	}

	/// Runs one delivery cycle. Concurrent callers queue behind each other.
	pub async fn flush_cycle(&self, trigger: FlushTrigger) -> FlushOutcome {
		let _cycle = self.cycle_lock.lock().await;

		if self.gate.should_flush_now().await == FlushDecision::Defer {
			debug!(?trigger, "flush deferred by gate");
			return FlushOutcome::Deferred;
		}

		*self.last_trigger.lock() = Some(trigger);
		self.set_phase(FlushPhase::FlushInFlight);
		if let Some(indicator) = &self.indicator {
			indicator.start();
		}

		let mut counts = CycleCounts::default();
		let mut held: Vec<Stream> = Vec::new();
		let mut rejected: Option<TallyError> = None;
		let result = 'cycle: loop {
			let mut progressed = false;
			for stream in Stream::ALL {
				if held.contains(&stream) {
					continue;
				}
				let (batch, ticket) = self.peek(stream);
				if batch.is_empty() {
					continue;
				}
				debug!(?trigger, stream = stream.as_str(), records = batch.len(), "sending batch");

				match self.send(&batch).await {
					Ok(()) => {
						self.acknowledge(stream, ticket);
						self.rejections(stream).lock().clear();
						counts.delivered(stream, batch.len());
						progressed = true;
					}
					Err(e) if is_rejection(&e) => {
						let attempts = self.rejections(stream).lock().record(ticket);
						if attempts >= self.config.max_rejected_attempts {
							error!(
								error = %e,
								stream = stream.as_str(),
								records = batch.len(),
								attempts,
								"collector keeps rejecting batch, discarding"
							);
							self.acknowledge(stream, ticket);
							self.rejections(stream).lock().clear();
							counts.discarded += batch.len();
							progressed = true;
						} else {
							warn!(
								error = %e,
								stream = stream.as_str(),
								records = batch.len(),
								attempts,
								"collector rejected batch, keeping it queued"
							);
							held.push(stream);
							rejected = Some(e);
						}
					}
					Err(e) => break 'cycle Err(e),
				}
			}
			if !progressed {
				break match rejected.take() {
					Some(e) => Err(e),
					None => Ok(()),
				};
			}
		};

		if let Some(indicator) = &self.indicator {
			indicator.stop();
		}

		match result {
			Ok(()) => {
				self.failures.store(0, Ordering::SeqCst);
				*self.retry_after.lock() = None;
				self.set_phase(FlushPhase::Idle);
				if counts.is_empty() {
					self.persister.persist_if_dirty(&self.state).await;
					return FlushOutcome::NothingToSend;
				}
				self.persister.persist(&self.state).await;
				debug!(
					events = counts.events,
					profile_updates = counts.profile_updates,
					discarded = counts.discarded,
					"flush complete"
				);
				FlushOutcome::Sent {
					events: counts.events,
					profile_updates: counts.profile_updates,
					discarded: counts.discarded,
				}
			}
			Err(e) => {
				self.persister.persist(&self.state).await;
				let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
				*self.retry_after.lock() = e.retry_after();
				self.set_phase(FlushPhase::BackoffWait);
				warn!(error = %e, failures, retryable = e.is_retryable(), "flush failed");
				FlushOutcome::Failed {
					error: e.to_string(),
					retryable: e.is_retryable(),
				}
			}
		}
	}

	/// Delay before the worker may attempt the next delivery.
	pub fn backoff_delay(&self) -> Duration {
		let failures = self.failures.load(Ordering::SeqCst);
		let delay = calculate_backoff_delay(
			failures,
			self.config.base_backoff,
			self.config.max_backoff,
		);
		match *self.retry_after.lock() {
			Some(floor) => delay.max(floor),
			None => delay,
		}
	}

	/// Runs the background loop until cancelled.
	pub async fn run(self: Arc<Self>) {
		info!(
			flush_interval_secs = self.config.flush_interval.as_secs(),
			max_batch_size = self.config.max_batch_size,
			"starting flush worker"
		);

		let mut timer = new_timer(self.config.flush_interval);

		loop {
			let timer_enabled = timer.is_some() && !self.is_timer_paused();
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => break,
				_ = self.wake.notified() => {
					if let (Some(timer), false) = (timer.as_mut(), self.is_timer_paused()) {
						timer.reset();
					}
				}
				_ = tick(&mut timer), if timer_enabled => {
					self.scheduled_flush(FlushTrigger::Timer).await;
				}
				_ = self.flush_notify.notified() => {
					self.scheduled_flush(FlushTrigger::Requested).await;
				}
				_ = self.background_notify.notified() => {
					self.scheduled_flush(FlushTrigger::Background).await;
				}
				_ = self.persist_notify.notified() => {
					self.persister.persist_if_dirty(&self.state).await;
				}
			}
		}

		self.persister.persist_if_dirty(&self.state).await;
		info!("flush worker stopped");
	}

	async fn scheduled_flush(&self, trigger: FlushTrigger) {
		if let FlushOutcome::Failed { .. } = self.flush_cycle(trigger).await {
			self.wait_backoff().await;
		}
	}

	/// Sleeps out the backoff while still serving persistence requests.
	async fn wait_backoff(&self) {
		let delay = self.backoff_delay();
		debug!(delay_ms = delay.as_millis() as u64, "waiting before next flush");
		let deadline = Instant::now() + delay;

		loop {
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => return,
				_ = tokio::time::sleep_until(deadline) => break,
				_ = self.persist_notify.notified() => {
					self.persister.persist_if_dirty(&self.state).await;
				}
			}
		}

		self.set_phase(FlushPhase::Idle);
	}
}

/// Exponential backoff with up to 25% jitter, capped at `max`.
///
/// `failures` counts consecutive failed cycles; the first failure waits
/// roughly `base`.
pub(crate) fn calculate_backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
	let exponent = failures.saturating_sub(1).min(31);
	let delay = base.saturating_mul(1u32 << exponent).min(max);
	let jitter_ms = fastrand::u64(0..=(delay.as_millis() as u64) / 4);
	(delay + Duration::from_millis(jitter_ms)).min(max)
}

/// The collector refused the batch itself, as opposed to being unreachable.
fn is_rejection(err: &TallyError) -> bool {
	matches!(err, TallyError::ServerError { .. }) && !err.is_retryable()
}

fn new_timer(period: Duration) -> Option<Interval> {
	if period.is_zero() {
		return None;
	}
	let mut timer = tokio::time::interval_at(Instant::now() + period, period);
	timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
	Some(timer)
}

async fn tick(timer: &mut Option<Interval>) {
	match timer {
		Some(timer) => {
			timer.tick().await;
		}
		None => std::future::pending().await,
	}
}
