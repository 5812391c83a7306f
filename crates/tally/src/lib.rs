// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side telemetry buffering, persistence and delivery.
//!
//! A [`TallyClient`] accepts events and profile updates from any thread,
//! keeps them in bounded in-memory queues, saves them to a durable snapshot
//! and delivers them to a collector in the background. Records leave the
//! queues only after the collector acknowledged them, so a crash or a failed
//! delivery never loses data that was already saved.
//!
//! # Example
//!
//! ```ignore
//! use tally::{LifecycleSignal, Properties, TallyClient};
//!
//! let client = TallyClient::builder()
//!     .token("project_token")
//!     .build()
//!     .await?;
//!
//! client.track_with("Opened", Properties::new().insert("screen", "home"));
//! client.on_lifecycle_signal(LifecycleSignal::EnteringBackground).await;
//! client.shutdown().await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod flush;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod state;
pub mod store;
pub mod super_props;
pub mod transport;

pub use client::{People, TallyClient, TallyClientBuilder};
pub use config::ClientConfig;
pub use error::{Result, TallyError};
pub use flush::{FlushOutcome, FlushPhase, FlushTrigger};
pub use http::HttpTransport;
pub use lifecycle::LifecycleSignal;
pub use registry::ClientRegistry;
pub use store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use transport::{
	ActivityIndicator, AlwaysFlush, FlushBatch, FlushDecision, FlushGate, NoOpActivityIndicator,
	SharedActivityIndicator, SharedFlushGate, SharedTransport, Transport,
};

pub use tally_core::{
	Conversion, Event, ProfileOp, ProfileUpdate, Properties, PropertyValue, Snapshot,
	ValidationMode,
};
