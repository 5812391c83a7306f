// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Record types for the Tally telemetry pipeline.
//!
//! This crate holds the data that flows through the client: property values
//! and their conversion rule, tracked events, profile updates and the
//! persisted snapshot. It performs no I/O.

pub mod error;
pub mod event;
pub mod profile;
pub mod properties;
pub mod property;
mod ser;
pub mod snapshot;

pub use error::{CoreError, Result};
pub use event::Event;
pub use profile::{ProfileOp, ProfileUpdate};
pub use properties::Properties;
pub use property::{format_wire_timestamp, Conversion, PropertyValue, ValidationMode};
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};
