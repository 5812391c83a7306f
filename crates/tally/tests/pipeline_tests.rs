// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end tests of the buffering pipeline.
//!
//! This test suite covers:
//! - Snapshot reload after partial delivery
//! - Super property merge and registration rules
//! - Profile updates issued before a people identity exists
//! - Reset
//! - Failed delivery and retry
//! - Queue bound
//! - Lifecycle-driven flushing and the HTTP transport

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tally::{
	FileSnapshotStore, FlushBatch, FlushOutcome, LifecycleSignal, MemorySnapshotStore,
	Properties, PropertyValue, Result, SnapshotStore, TallyClient, TallyError, Transport,
	ValidationMode,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

struct MockTransport {
	sent_batches: tokio::sync::Mutex<Vec<FlushBatch>>,
	should_fail: AtomicBool,
	successes_left: AtomicUsize,
}

impl MockTransport {
	fn new() -> Self {
		Self {
			sent_batches: tokio::sync::Mutex::new(Vec::new()),
			should_fail: AtomicBool::new(false),
			successes_left: AtomicUsize::new(usize::MAX),
		}
	}

	fn set_should_fail(&self, fail: bool) {
		self.should_fail.store(fail, Ordering::SeqCst);
	}

	/// Accept `n` more batches, then fail.
	fn fail_after(&self, n: usize) {
		self.successes_left.store(n, Ordering::SeqCst);
	}

	async fn sent_event_names(&self) -> Vec<String> {
		self.sent_batches
			.lock()
			.await
			.iter()
			.flat_map(|b| b.events.iter().map(|e| e.name.clone()))
			.collect()
	}
}

#[async_trait::async_trait]
impl Transport for MockTransport {
	async fn send(&self, batch: &FlushBatch) -> Result<()> {
		let allowed = self
			.successes_left
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if self.should_fail.load(Ordering::SeqCst) || !allowed {
			return Err(TallyError::ServerError {
				status: 503,
				message: "mock failure".to_string(),
			});
		}
		self.sent_batches.lock().await.push(batch.clone());
		Ok(())
	}
}

async fn client_with(
	transport: Arc<MockTransport>,
	store: Arc<dyn SnapshotStore>,
	max_batch_size: usize,
	max_queue_size: usize,
) -> TallyClient {
	init_tracing();
	TallyClient::builder()
		.token("tok_test")
		.flush_interval(Duration::ZERO)
		.max_batch_size(max_batch_size)
		.max_queue_size(max_queue_size)
		.transport(transport)
		.snapshot_store(store)
		.build()
		.await
		.unwrap()
}

/// Tests that a restart resumes with exactly the unacknowledged events.
///
/// Purpose: Verify that reloading the snapshot reproduces the ordered event
/// list minus the batches the collector acknowledged.
#[tokio::test]
async fn test_reload_keeps_unacknowledged_events_in_order() {
	let tmp = TempDir::new().unwrap();
	let store = Arc::new(FileSnapshotStore::for_token(tmp.path(), "tok_test"));
	let transport = Arc::new(MockTransport::new());
	let client = client_with(transport.clone(), store.clone(), 2, 100).await;

	for name in ["a", "b", "c", "d", "e"] {
		client.track(name);
	}
	transport.fail_after(1);
	let outcome = client.flush_now().await.unwrap();
	assert!(matches!(outcome, FlushOutcome::Failed { .. }));
	assert_eq!(transport.sent_event_names().await, vec!["a", "b"]);
	let device_id = client.distinct_id();
	client.shutdown().await.unwrap();

	let transport = Arc::new(MockTransport::new());
	let reloaded = client_with(transport.clone(), store, 50, 100).await;
	assert_eq!(reloaded.queued_events(), 3);
	assert_eq!(reloaded.distinct_id(), device_id);

	reloaded.flush_now().await.unwrap();
	assert_eq!(transport.sent_event_names().await, vec!["c", "d", "e"]);
	reloaded.shutdown().await.unwrap();
}

/// Tests super property merge semantics.
///
/// Purpose: Verify that an event keeps the super properties registered when
/// it was tracked, even after they change.
#[tokio::test]
async fn test_super_properties_are_copied_into_events() {
	let transport = Arc::new(MockTransport::new());
	let client = client_with(transport.clone(), Arc::new(MemorySnapshotStore::new()), 50, 100).await;

	client.register_super_properties(Properties::new().insert("plan", "free"));
	client.track("first");
	client.register_super_properties(Properties::new().insert("plan", "pro"));
	client.remove_super_property("plan");
	client.track("second");

	client.flush_now().await.unwrap();
	let batches = transport.sent_batches.lock().await;
	let events = &batches[0].events;
	assert_eq!(
		events[0].properties.get("plan"),
		Some(&PropertyValue::from("free"))
	);
	assert!(!events[1].properties.contains_key("plan"));
}

/// Tests register-once semantics with and without a default value.
///
/// Purpose: Verify that `register_super_properties_once` keeps an existing
/// value unless it equals the given default.
#[tokio::test]
async fn test_register_once_respects_default_value() {
	let client = client_with(
		Arc::new(MockTransport::new()),
		Arc::new(MemorySnapshotStore::new()),
		50,
		100,
	)
	.await;

	client.register_super_properties(Properties::new().insert("x", 1));
	client.register_super_properties_once(Properties::new().insert("x", 2));
	assert_eq!(
		client.current_super_properties().get("x"),
		Some(&PropertyValue::from(1))
	);

	client.register_super_properties_once_with_default(Properties::new().insert("x", 2), 1);
	assert_eq!(
		client.current_super_properties().get("x"),
		Some(&PropertyValue::from(2))
	);

	let mut copy = client.current_super_properties();
	copy.set("x", 99);
	assert_eq!(
		client.current_super_properties().get("x"),
		Some(&PropertyValue::from(2))
	);
}

/// Tests buffering of profile updates issued before identification.
///
/// Purpose: Verify that updates made before `identify_people` are held back
/// and then delivered in order, addressed to the new identity.
#[tokio::test]
async fn test_profile_updates_wait_for_people_identity() {
	let transport = Arc::new(MockTransport::new());
	let client = client_with(transport.clone(), Arc::new(MemorySnapshotStore::new()), 50, 100).await;

	client.people().set_one("name", "Ada");
	client.people().set_once(Properties::new().insert("first_seen", "today"));
	client.people().track_charge(9.99);
	assert_eq!(client.flush_now().await.unwrap(), FlushOutcome::NothingToSend);

	client.identify_people("u1");
	client.people().delete_user();
	client.flush_now().await.unwrap();

	let batches = transport.sent_batches.lock().await;
	let updates = &batches[0].profile_updates;
	let kinds: Vec<&str> = updates.iter().map(|u| u.op.kind()).collect();
	assert_eq!(kinds, vec!["set", "set_once", "track_charge", "delete_user"]);
	for update in updates {
		let wire = update.to_wire("tok_test").unwrap();
		assert_eq!(wire["$distinct_id"], "u1");
		assert_eq!(wire["$token"], "tok_test");
	}
}

/// Tests reset.
///
/// Purpose: Verify that reset empties every queue and buffer, forgets super
/// properties and generates a new events identity.
#[tokio::test]
async fn test_reset_clears_state_and_regenerates_identity() {
	let store = Arc::new(MemorySnapshotStore::new());
	let transport = Arc::new(MockTransport::new());
	let client = client_with(transport.clone(), store.clone(), 50, 100).await;

	client.identify_events("custom");
	client.register_super_properties(Properties::new().insert("a", 1));
	client.track("a");
	client.people().set_one("k", "v");
	client.identify_people("u1");
	client.people().set_one("k", "w");
	client.people().clear_charges();

	client.reset();
	client.archive().await;

	assert_ne!(client.distinct_id(), "custom");
	assert!(client.people_distinct_id().is_none());
	assert_eq!(client.queued_events(), 0);
	assert_eq!(client.queued_profile_updates(), 0);
	assert!(client.current_super_properties().is_empty());

	let snapshot = store.load().await.unwrap().unwrap();
	assert_eq!(snapshot.pending_records(), 0);
	assert!(snapshot.super_properties.is_empty());
	assert_eq!(snapshot.events_distinct_id, client.distinct_id());

	assert_eq!(client.flush_now().await.unwrap(), FlushOutcome::NothingToSend);
	assert!(transport.sent_batches.lock().await.is_empty());
}

/// Tests that a failed delivery changes nothing.
///
/// Purpose: Verify that after a failed flush the persisted queue is
/// byte-identical, and the next successful flush delivers exactly the
/// failed batch plus records tracked since.
#[tokio::test]
async fn test_failed_flush_retains_batch_until_success() {
	let store = Arc::new(MemorySnapshotStore::new());
	let transport = Arc::new(MockTransport::new());
	let client = client_with(transport.clone(), store.clone(), 50, 100).await;

	client.track("a");
	client.track("b");
	client.archive().await;
	let before = store.raw().unwrap();

	transport.set_should_fail(true);
	let outcome = client.flush_now().await.unwrap();
	assert!(matches!(
		outcome,
		FlushOutcome::Failed {
			retryable: true,
			..
		}
	));
	assert_eq!(store.raw().unwrap(), before);

	client.track("c");
	transport.set_should_fail(false);
	let outcome = client.flush_now().await.unwrap();

	assert_eq!(
		outcome,
		FlushOutcome::Sent {
			events: 3,
			profile_updates: 0,
			discarded: 0
		}
	);
	assert_eq!(transport.sent_event_names().await, vec!["a", "b", "c"]);
	assert_eq!(client.queued_events(), 0);
	assert!(store.load().await.unwrap().unwrap().events.is_empty());
}

/// Tests the queue bound.
///
/// Purpose: Verify that `N + 5` events against a bound of `N` keep the most
/// recent `N`, in order.
#[tokio::test]
async fn test_queue_bound_keeps_most_recent() {
	const BOUND: usize = 10;
	let transport = Arc::new(MockTransport::new());
	let client = client_with(transport.clone(), Arc::new(MemorySnapshotStore::new()), 100, BOUND).await;

	for i in 0..BOUND + 5 {
		client.track(&format!("event{i}"));
	}
	assert_eq!(client.queued_events(), BOUND);

	client.flush_now().await.unwrap();
	let expected: Vec<String> = (5..BOUND + 5).map(|i| format!("event{i}")).collect();
	assert_eq!(transport.sent_event_names().await, expected);
}

/// Tests lifecycle-driven delivery.
///
/// Purpose: Verify that entering the background saves the state and
/// requests a flush when `flush_on_background` is set.
#[tokio::test]
async fn test_entering_background_flushes() {
	let store = Arc::new(MemorySnapshotStore::new());
	let transport = Arc::new(MockTransport::new());
	let client = client_with(transport.clone(), store.clone(), 50, 100).await;

	client.track("a");
	client
		.on_lifecycle_signal(LifecycleSignal::EnteringBackground)
		.await;
	assert!(store.raw().is_some());

	for _ in 0..100 {
		if client.queued_events() == 0 {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert_eq!(transport.sent_event_names().await, vec!["a"]);
}

/// Tests strict validation.
///
/// Purpose: Verify that strict mode stops at an out-of-domain value.
#[tokio::test]
#[should_panic(expected = "Clicked")]
async fn test_strict_mode_rejects_out_of_domain_values() {
	let client = TallyClient::builder()
		.token("tok")
		.validation_mode(ValidationMode::Strict)
		.transport(Arc::new(MockTransport::new()))
		.snapshot_store(Arc::new(MemorySnapshotStore::new()))
		.build()
		.await
		.unwrap();

	client.track_serialized("Clicked", &serde_json::json!({ "ok": true }));
	client.track_serialized("Clicked", &f64::NAN);
}

/// Tests lenient validation.
///
/// Purpose: Verify that lenient mode records out-of-domain values as strings.
#[tokio::test]
async fn test_lenient_mode_coerces_out_of_domain_values() {
	let transport = Arc::new(MockTransport::new());
	let client = TallyClient::builder()
		.token("tok")
		.validation_mode(ValidationMode::Lenient)
		.transport(transport.clone())
		.snapshot_store(Arc::new(MemorySnapshotStore::new()))
		.build()
		.await
		.unwrap();

	client.track_serialized("Measured", &f64::INFINITY);
	client.flush_now().await.unwrap();

	let batches = transport.sent_batches.lock().await;
	assert_eq!(
		batches[0].events[0].properties.get("value"),
		Some(&PropertyValue::from("inf"))
	);
}
