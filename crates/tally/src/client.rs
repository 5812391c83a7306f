// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The telemetry client.
//!
//! Recording calls (`track`, super properties, identity, profile updates) are
//! synchronous: they take the state lock, apply the change, mark the state
//! dirty and return. Delivery and persistence happen on the client's
//! background worker.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Number;
use tally_core::{ProfileOp, Properties, PropertyValue, ValidationMode};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, TallyError};
use crate::flush::{FlushController, FlushOutcome, FlushTrigger};
use crate::http::HttpTransport;
use crate::lifecycle::LifecycleSignal;
use crate::state::ClientState;
use crate::store::{FileSnapshotStore, Persister, SnapshotStore};
use crate::transport::{
	AlwaysFlush, NoOpActivityIndicator, SharedActivityIndicator, SharedFlushGate, SharedTransport,
};

/// Builder for constructing a [`TallyClient`].
pub struct TallyClientBuilder {
	token: Option<String>,
	config: ClientConfig,
	transport: Option<SharedTransport>,
	gate: Option<SharedFlushGate>,
	indicator: Option<SharedActivityIndicator>,
	store: Option<Arc<dyn SnapshotStore>>,
}

impl TallyClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			token: None,
			config: ClientConfig::default(),
			transport: None,
			gate: None,
			indicator: None,
			store: None,
		}
	}

	/// Sets the project token records are delivered under.
	pub fn token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	/// Replaces the whole configuration, e.g. one from [`ClientConfig::load`].
	pub fn config(mut self, config: ClientConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets the flush timer period. Zero disables timed flushes.
	pub fn flush_interval(mut self, interval: Duration) -> Self {
		self.config.flush_interval = interval;
		self
	}

	pub fn flush_on_background(mut self, enabled: bool) -> Self {
		self.config.flush_on_background = enabled;
		self
	}

	pub fn show_network_activity_indicator(mut self, enabled: bool) -> Self {
		self.config.show_network_activity_indicator = enabled;
		self
	}

	/// Sets the collector base URL used by the default HTTP transport.
	///
	/// Example: `https://api.mixpanel.com`
	pub fn server_url(mut self, url: impl Into<String>) -> Self {
		self.config.server_url = url.into();
		self
	}

	pub fn max_batch_size(mut self, size: usize) -> Self {
		self.config.max_batch_size = size;
		self
	}

	pub fn max_queue_size(mut self, size: usize) -> Self {
		self.config.max_queue_size = size;
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn validation_mode(mut self, mode: ValidationMode) -> Self {
		self.config.validation_mode = mode;
		self
	}

	/// Sets the directory snapshot files are written to.
	pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config.data_dir = Some(dir.into());
		self
	}

	/// Replaces the default HTTP transport.
	pub fn transport(mut self, transport: SharedTransport) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Installs a gate consulted before every flush.
	pub fn flush_gate(mut self, gate: SharedFlushGate) -> Self {
		self.gate = Some(gate);
		self
	}

	pub fn activity_indicator(mut self, indicator: SharedActivityIndicator) -> Self {
		self.indicator = Some(indicator);
		self
	}

	/// Replaces the default file snapshot store.
	pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Builds the client, restores its last snapshot and starts the flush worker.
	///
	/// Must be called from within a tokio runtime.
	pub async fn build(self) -> Result<TallyClient> {
		let token = self
			.token
			.filter(|t| !t.trim().is_empty())
			.ok_or(TallyError::MissingToken)?;
		let config = self.config;
		config.validate()?;

		let transport: SharedTransport = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new(
				&config.server_url,
				config.request_timeout,
			)?),
		};
		let store: Arc<dyn SnapshotStore> = match self.store {
			Some(store) => store,
			None => Arc::new(FileSnapshotStore::for_token(
				&config.resolved_data_dir()?,
				&token,
			)),
		};
		let persister = Arc::new(Persister::new(store));

		let state = match persister.load().await {
			Some(snapshot) => ClientState::restore(snapshot, config.max_queue_size),
			None => ClientState::new(config.max_queue_size),
		};
		info!(
			events = state.events.len(),
			profile_updates = state.people.ready_len() + state.people.pending_len(),
			"restored client state"
		);
		let state = Arc::new(Mutex::new(state));

		let indicator = if config.show_network_activity_indicator {
			Some(
				self.indicator
					.unwrap_or_else(|| Arc::new(NoOpActivityIndicator) as SharedActivityIndicator),
			)
		} else {
			None
		};

		let controller = Arc::new(FlushController::new(
			state.clone(),
			persister.clone(),
			transport,
			self.gate
				.unwrap_or_else(|| Arc::new(AlwaysFlush) as SharedFlushGate),
			indicator,
			token.clone(),
			config.clone(),
		));
		let worker = tokio::spawn(controller.clone().run());

		Ok(TallyClient {
			inner: Arc::new(ClientInner {
				token,
				config,
				state,
				persister,
				controller,
				worker: Mutex::new(Some(worker)),
				closed: AtomicBool::new(false),
			}),
		})
	}
}

impl Default for TallyClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct ClientInner {
	token: String,
	config: ClientConfig,
	state: Arc<Mutex<ClientState>>,
	persister: Arc<Persister>,
	controller: Arc<FlushController>,
	worker: Mutex<Option<JoinHandle<()>>>,
	closed: AtomicBool,
}

/// Handle to a telemetry client. Clones share the same queues and worker.
///
/// # Example
///
/// ```ignore
/// let client = TallyClient::builder()
///     .token("project_token")
///     .build()
///     .await?;
///
/// client.register_super_properties(Properties::new().insert("plan", "free"));
/// client.track_with("Signed Up", Properties::new().insert("source", "ad"));
/// client.identify_people("user_42");
/// client.people().set_one("name", "Ada");
///
/// client.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct TallyClient {
	inner: Arc<ClientInner>,
}

impl fmt::Debug for TallyClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TallyClient")
			.field("token", &self.inner.token)
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl TallyClient {
	/// Creates a new builder for constructing a TallyClient.
	pub fn builder() -> TallyClientBuilder {
		TallyClientBuilder::new()
	}

	pub fn token(&self) -> &str {
		&self.inner.token
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	pub fn validation_mode(&self) -> ValidationMode {
		self.inner.config.validation_mode
	}

	/// Applies `f` to the state and schedules a background save.
	///
	/// Returns `None` once the client has been shut down.
	fn mutate<R>(&self, op: &'static str, f: impl FnOnce(&mut ClientState) -> R) -> Option<R> {
		if self.is_closed() {
			warn!(op, "client is shut down, ignoring call");
			return None;
		}
		let result = f(&mut *self.inner.state.lock());
		self.inner.controller.request_persist();
		Some(result)
	}

	/// Tracks an event with no properties of its own.
	pub fn track(&self, name: &str) {
		self.track_with(name, Properties::new());
	}

	/// Tracks an event. Super properties and identity are captured now.
	pub fn track_with(&self, name: &str, properties: Properties) {
		self.mutate("track", |state| state.track(name, properties));
	}

	/// Tracks an event whose properties come from any serializable value.
	///
	/// A value that does not serialize to a map is recorded under `value`.
	///
	/// # Panics
	///
	/// Panics in [`ValidationMode::Strict`] when `properties` holds a value
	/// outside the property domain.
	pub fn track_serialized<V>(&self, name: &str, properties: &V)
	where
		V: Serialize + fmt::Debug + ?Sized,
	{
		let converted = PropertyValue::convert(properties, self.validation_mode()).into_value(name);
		let properties = match converted {
			PropertyValue::Map(map) => Properties::from(map),
			other => Properties::new().insert("value", other),
		};
		self.track_with(name, properties);
	}

	/// Registers super properties, overwriting existing keys.
	pub fn register_super_properties(&self, properties: Properties) {
		self.mutate("register_super_properties", |state| {
			state.super_props.register(properties);
			state.mark_dirty();
		});
	}

	/// Registers super properties whose key is not registered yet.
	pub fn register_super_properties_once(&self, properties: Properties) {
		self.mutate("register_super_properties_once", |state| {
			state.super_props.register_once(properties, None);
			state.mark_dirty();
		});
	}

	/// Like [`register_super_properties_once`](Self::register_super_properties_once),
	/// but also overwrites keys whose current value equals `default_value`.
	pub fn register_super_properties_once_with_default(
		&self,
		properties: Properties,
		default_value: impl Into<PropertyValue>,
	) {
		let default_value = default_value.into();
		self.mutate("register_super_properties_once", |state| {
			state.super_props.register_once(properties, Some(&default_value));
			state.mark_dirty();
		});
	}

	pub fn remove_super_property(&self, name: &str) {
		self.mutate("remove_super_property", |state| {
			if state.super_props.remove(name) {
				state.mark_dirty();
			}
		});
	}

	pub fn remove_super_properties<I, S>(&self, names: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.mutate("remove_super_properties", |state| {
			if state.super_props.remove_all(names) > 0 {
				state.mark_dirty();
			}
		});
	}

	/// Returns a copy of the registered super properties.
	pub fn current_super_properties(&self) -> Properties {
		self.inner.state.lock().super_props.current()
	}

	pub fn clear_super_properties(&self) {
		self.mutate("clear_super_properties", |state| {
			state.super_props.clear();
			state.mark_dirty();
		});
	}

	/// Sets the identity stamped on events tracked from now on.
	pub fn identify_events(&self, distinct_id: &str) {
		self.mutate("identify_events", |state| state.identify_events(distinct_id));
	}

	/// Alias of [`identify_events`](Self::identify_events).
	pub fn identify(&self, distinct_id: &str) {
		self.identify_events(distinct_id);
	}

	/// Sets the people identity and releases profile updates made before it.
	pub fn identify_people(&self, distinct_id: &str) {
		self.mutate("identify_people", |state| state.identify_people(distinct_id));
	}

	/// The events identity.
	pub fn distinct_id(&self) -> String {
		self.inner
			.state
			.lock()
			.identity
			.events_distinct_id()
			.to_string()
	}

	pub fn people_distinct_id(&self) -> Option<String> {
		self.inner
			.state
			.lock()
			.identity
			.people_distinct_id()
			.map(str::to_string)
	}

	/// Sets or clears the display name attached to events as `mp_name_tag`.
	pub fn set_name_tag(&self, name_tag: Option<String>) {
		self.mutate("set_name_tag", |state| {
			state.name_tag = name_tag;
			state.mark_dirty();
		});
	}

	pub fn name_tag(&self) -> Option<String> {
		self.inner.state.lock().name_tag.clone()
	}

	/// Profile operations for the people identity.
	pub fn people(&self) -> People<'_> {
		People { client: self }
	}

	/// Forgets identities, super properties, the name tag and every queued
	/// record. Nothing is flushed.
	pub fn reset(&self) {
		self.mutate("reset", ClientState::reset);
		debug!("client state reset");
	}

	/// Events waiting for delivery.
	pub fn queued_events(&self) -> usize {
		self.inner.state.lock().events.len()
	}

	/// Profile updates waiting for delivery or for a people identity.
	pub fn queued_profile_updates(&self) -> usize {
		let state = self.inner.state.lock();
		state.people.ready_len() + state.people.pending_len()
	}

	/// Asks the worker to flush soon; returns immediately.
	pub fn flush(&self) {
		if !self.is_closed() {
			self.inner.controller.request_flush();
		}
	}

	/// Runs a flush cycle now, ignoring any backoff in progress.
	pub async fn flush_now(&self) -> Result<FlushOutcome> {
		self.check_closed()?;
		Ok(self
			.inner
			.controller
			.flush_cycle(FlushTrigger::Explicit)
			.await)
	}

	/// Saves the current state. Failures are logged.
	pub async fn archive(&self) {
		self.inner.persister.persist(&self.inner.state).await;
	}

	/// Reacts to an application lifecycle transition.
	pub async fn on_lifecycle_signal(&self, signal: LifecycleSignal) {
		debug!(%signal, "lifecycle signal");
		match signal {
			LifecycleSignal::EnteringBackground => {
				self.archive().await;
				if self.inner.config.flush_on_background && !self.is_closed() {
					self.inner.controller.request_background_flush();
				}
				self.inner.controller.pause_timer();
			}
			LifecycleSignal::BecomingActive => self.inner.controller.resume_timer(),
			LifecycleSignal::Terminating => self.archive().await,
		}
	}

	/// Stops the worker and saves the state one last time.
	pub async fn shutdown(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		self.inner.controller.cancel();
		let worker = self.inner.worker.lock().take();
		if let Some(worker) = worker {
			if let Err(e) = worker.await {
				warn!(error = %e, "flush worker ended abnormally");
			}
		}
		self.archive().await;

		info!("tally client shutdown");
		Ok(())
	}

	/// Returns true if the client has been shut down.
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	fn check_closed(&self) -> Result<()> {
		if self.is_closed() {
			return Err(TallyError::ClientShutdown);
		}
		Ok(())
	}

	fn profile_op(&self, op: ProfileOp) {
		self.mutate("profile_update", |state| state.enqueue_profile_op(op));
	}
}

/// Profile operations, obtained from [`TallyClient::people`].
///
/// Operations issued before [`TallyClient::identify_people`] are held back
/// and sent, in order, once an identity is set.
pub struct People<'a> {
	client: &'a TallyClient,
}

impl People<'_> {
	/// Sets profile properties, overwriting existing values.
	pub fn set(&self, properties: Properties) {
		self.client.profile_op(ProfileOp::Set { properties });
	}

	pub fn set_one(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
		self.set(Properties::new().insert(key, value));
	}

	/// Sets profile properties that have no value yet.
	pub fn set_once(&self, properties: Properties) {
		self.client.profile_op(ProfileOp::SetOnce { properties });
	}

	/// Adds numeric amounts to profile properties.
	///
	/// # Panics
	///
	/// Panics in [`ValidationMode::Strict`] when an amount is not a number.
	/// Lenient mode skips such entries.
	pub fn increment(&self, properties: Properties) {
		let mode = self.client.validation_mode();
		let mut amounts = BTreeMap::new();
		for (key, value) in properties {
			match value {
				PropertyValue::Number(number) => {
					amounts.insert(key, number);
				}
				other => match mode {
					ValidationMode::Strict => {
						panic!("property {key:?}: increment amount must be a number, got {other:?}")
					}
					ValidationMode::Lenient => {
						warn!(key = %key, "skipping non-numeric increment amount");
					}
				},
			}
		}
		if !amounts.is_empty() {
			self.client.profile_op(ProfileOp::Increment { properties: amounts });
		}
	}

	pub fn increment_by(&self, key: impl Into<String>, amount: impl Into<Number>) {
		let mut amounts = BTreeMap::new();
		amounts.insert(key.into(), amount.into());
		self.client.profile_op(ProfileOp::Increment { properties: amounts });
	}

	/// Appends values to list properties.
	pub fn append(&self, properties: Properties) {
		self.client.profile_op(ProfileOp::Append { properties });
	}

	/// Records a revenue transaction.
	pub fn track_charge(&self, amount: impl Into<PropertyValue>) {
		self.track_charge_with(amount, Properties::new());
	}

	pub fn track_charge_with(&self, amount: impl Into<PropertyValue>, properties: Properties) {
		self.client.profile_op(ProfileOp::TrackCharge {
			amount: amount.into(),
			properties,
		});
	}

	/// Erases the profile's revenue history.
	pub fn clear_charges(&self) {
		self.client.profile_op(ProfileOp::ClearCharges);
	}

	pub fn delete_user(&self) {
		self.client.profile_op(ProfileOp::DeleteUser);
	}

	/// Registers a push notification device token.
	pub fn add_push_device_token(&self, token: &[u8]) {
		self.client.profile_op(ProfileOp::AddPushToken {
			token: token.to_vec(),
		});
	}
}
