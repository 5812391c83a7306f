// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The property value domain and its conversion rule.
//!
//! Every property attached to an event, a super property registration or a
//! profile update is a [`PropertyValue`]. Typed Rust values convert through
//! the `From` impls below; arbitrary serializable values go through
//! [`PropertyValue::convert`], which applies the active [`ValidationMode`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use url::Url;

use crate::error::CoreError;
use crate::ser::ValueSerializer;

/// Format used when rendering timestamps on the wire.
const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A value that may appear in any property mapping.
///
/// The persisted form is adjacently tagged so that timestamps and URIs survive
/// a snapshot round trip as themselves rather than as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
	String(String),
	Number(Number),
	Bool(bool),
	Null,
	List(Vec<PropertyValue>),
	Map(BTreeMap<String, PropertyValue>),
	Timestamp(DateTime<Utc>),
	Uri(Url),
}

impl PropertyValue {
	/// Converts an arbitrary serializable value into the property domain.
	///
	/// Values that serialize to strings, finite numbers, booleans, unit,
	/// sequences and string-keyed maps are accepted as-is. Anything else
	/// (non-finite floats, raw byte buffers, maps with composite keys,
	/// integers wider than 64 bits) is out of domain: in
	/// [`ValidationMode::Lenient`] it is coerced to its `Debug` rendering, in
	/// [`ValidationMode::Strict`] it is rejected.
	pub fn convert<T>(value: &T, mode: ValidationMode) -> Conversion
	where
		T: Serialize + fmt::Debug + ?Sized,
	{
		match value.serialize(ValueSerializer) {
			Ok(converted) => Conversion::Valid(converted),
			Err(reason) => match mode {
				ValidationMode::Strict => Conversion::Rejected(CoreError::InvalidProperty(reason.0)),
				ValidationMode::Lenient => {
					Conversion::Coerced(PropertyValue::String(format!("{value:?}")))
				}
			},
		}
	}

	/// Renders this value in the collector's JSON representation.
	pub fn to_wire(&self) -> serde_json::Value {
		use serde_json::Value;

		match self {
			Self::String(s) => Value::String(s.clone()),
			Self::Number(n) => Value::Number(n.clone()),
			Self::Bool(b) => Value::Bool(*b),
			Self::Null => Value::Null,
			Self::List(items) => Value::Array(items.iter().map(Self::to_wire).collect()),
			Self::Map(map) => Value::Object(
				map
					.iter()
					.map(|(k, v)| (k.clone(), v.to_wire()))
					.collect(),
			),
			Self::Timestamp(ts) => Value::String(format_wire_timestamp(ts)),
			Self::Uri(url) => Value::String(url.to_string()),
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}
}

/// Renders a timestamp the way the collector expects it (UTC, second precision).
pub fn format_wire_timestamp(ts: &DateTime<Utc>) -> String {
	ts.format(WIRE_TIMESTAMP_FORMAT).to_string()
}

/// How out-of-domain values are handled at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
	/// Reject out-of-domain values; catches integration bugs during development.
	Strict,
	/// Coerce out-of-domain values to their string form; telemetry is never dropped.
	Lenient,
}

impl Default for ValidationMode {
	fn default() -> Self {
		if cfg!(debug_assertions) {
			ValidationMode::Strict
		} else {
			ValidationMode::Lenient
		}
	}
}

/// Outcome of [`PropertyValue::convert`].
#[derive(Debug)]
pub enum Conversion {
	/// The value was inside the domain.
	Valid(PropertyValue),
	/// The value was outside the domain and replaced by its string form.
	Coerced(PropertyValue),
	/// The value was outside the domain and strict mode is active.
	Rejected(CoreError),
}

impl Conversion {
	/// Resolves the conversion into a storable value.
	///
	/// # Panics
	///
	/// Panics when the conversion was rejected. Rejection only happens in
	/// [`ValidationMode::Strict`], whose purpose is to stop the program at the
	/// offending call site.
	pub fn into_value(self, key: &str) -> PropertyValue {
		match self {
			Conversion::Valid(value) => value,
			Conversion::Coerced(value) => {
				tracing::warn!(key = %key, "coerced out-of-domain property value to string");
				value
			}
			Conversion::Rejected(err) => panic!("property {key:?}: {err}"),
		}
	}

	pub fn is_valid(&self) -> bool {
		matches!(self, Conversion::Valid(_))
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		Self::String(value.to_owned())
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<i32> for PropertyValue {
	fn from(value: i32) -> Self {
		Self::Number(value.into())
	}
}

impl From<i64> for PropertyValue {
	fn from(value: i64) -> Self {
		Self::Number(value.into())
	}
}

impl From<u32> for PropertyValue {
	fn from(value: u32) -> Self {
		Self::Number(value.into())
	}
}

impl From<u64> for PropertyValue {
	fn from(value: u64) -> Self {
		Self::Number(value.into())
	}
}

impl From<usize> for PropertyValue {
	fn from(value: usize) -> Self {
		Self::Number(value.into())
	}
}

/// Non-finite floats have no numeric representation on the wire and are
/// coerced to their string form.
impl From<f64> for PropertyValue {
	fn from(value: f64) -> Self {
		Number::from_f64(value)
			.map(Self::Number)
			.unwrap_or_else(|| Self::String(value.to_string()))
	}
}

impl From<Number> for PropertyValue {
	fn from(value: Number) -> Self {
		Self::Number(value)
	}
}

impl From<DateTime<Utc>> for PropertyValue {
	fn from(value: DateTime<Utc>) -> Self {
		Self::Timestamp(value)
	}
}

impl From<Url> for PropertyValue {
	fn from(value: Url) -> Self {
		Self::Uri(value)
	}
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
	fn from(value: Vec<T>) -> Self {
		Self::List(value.into_iter().map(Into::into).collect())
	}
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or(Self::Null)
	}
}

impl From<BTreeMap<String, PropertyValue>> for PropertyValue {
	fn from(value: BTreeMap<String, PropertyValue>) -> Self {
		Self::Map(value)
	}
}

impl From<serde_json::Value> for PropertyValue {
	fn from(value: serde_json::Value) -> Self {
		use serde_json::Value;

		match value {
			Value::Null => Self::Null,
			Value::Bool(b) => Self::Bool(b),
			Value::Number(n) => Self::Number(n),
			Value::String(s) => Self::String(s),
			Value::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
			Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
		}
	}
}
