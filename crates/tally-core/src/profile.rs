// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Profile update operations.
//!
//! A profile update targets the people identity rather than the events
//! identity. Updates created before that identity is known carry no distinct
//! id and are held back until one is assigned.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::properties::Properties;
use crate::property::{format_wire_timestamp, PropertyValue};

/// The operation carried by a profile update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProfileOp {
	/// Overwrite the given properties.
	Set { properties: Properties },
	/// Set the given properties only where the profile has no value yet.
	SetOnce { properties: Properties },
	/// Add the given amounts to numeric properties.
	Increment { properties: BTreeMap<String, Number> },
	/// Append values to list properties.
	Append { properties: Properties },
	/// Record a revenue transaction.
	TrackCharge {
		amount: PropertyValue,
		#[serde(default)]
		properties: Properties,
	},
	/// Erase the revenue history.
	ClearCharges,
	/// Delete the profile.
	DeleteUser,
	/// Register a push notification device token.
	AddPushToken { token: Vec<u8> },
}

impl ProfileOp {
	/// Short name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			ProfileOp::Set { .. } => "set",
			ProfileOp::SetOnce { .. } => "set_once",
			ProfileOp::Increment { .. } => "increment",
			ProfileOp::Append { .. } => "append",
			ProfileOp::TrackCharge { .. } => "track_charge",
			ProfileOp::ClearCharges => "clear_charges",
			ProfileOp::DeleteUser => "delete_user",
			ProfileOp::AddPushToken { .. } => "add_push_token",
		}
	}
}

/// A queued profile update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
	/// People identity; `None` while the update waits for one.
	pub distinct_id: Option<String>,
	pub op: ProfileOp,
	pub timestamp: DateTime<Utc>,
}

impl ProfileUpdate {
	/// Creates an update stamped with the current time.
	pub fn new(op: ProfileOp, distinct_id: Option<String>) -> Self {
		Self {
			distinct_id,
			op,
			timestamp: Utc::now(),
		}
	}

	/// Returns a copy addressed to `distinct_id`.
	pub fn restamped(mut self, distinct_id: impl Into<String>) -> Self {
		self.distinct_id = Some(distinct_id.into());
		self
	}

	/// Renders the update for the collector.
	///
	/// Returns `None` for updates that have no people identity yet; those
	/// never leave the pending buffer.
	pub fn to_wire(&self, token: &str) -> Option<Value> {
		let distinct_id = self.distinct_id.as_ref()?;

		let mut record = serde_json::Map::new();
		record.insert("$token".to_string(), token.into());
		record.insert("$distinct_id".to_string(), distinct_id.clone().into());
		record.insert(
			"$time".to_string(),
			self.timestamp.timestamp_millis().into(),
		);

		let (key, payload) = match &self.op {
			ProfileOp::Set { properties } => ("$set", Value::Object(properties.to_wire())),
			ProfileOp::SetOnce { properties } => ("$set_once", Value::Object(properties.to_wire())),
			ProfileOp::Increment { properties } => (
				"$add",
				Value::Object(
					properties
						.iter()
						.map(|(k, v)| (k.clone(), Value::Number(v.clone())))
						.collect(),
				),
			),
			ProfileOp::Append { properties } => ("$append", Value::Object(properties.to_wire())),
			ProfileOp::TrackCharge { amount, properties } => {
				let mut transaction = properties.to_wire();
				transaction.insert("$amount".to_string(), amount.to_wire());
				transaction.insert(
					"$time".to_string(),
					format_wire_timestamp(&self.timestamp).into(),
				);
				(
					"$append",
					serde_json::json!({ "$transactions": Value::Object(transaction) }),
				)
			}
			ProfileOp::ClearCharges => ("$set", serde_json::json!({ "$transactions": [] })),
			ProfileOp::DeleteUser => ("$delete", Value::String(String::new())),
			ProfileOp::AddPushToken { token } => (
				"$union",
				serde_json::json!({ "$ios_devices": [hex::encode(token)] }),
			),
		};
		record.insert(key.to_string(), payload);

		Some(Value::Object(record))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn identified(op: ProfileOp) -> ProfileUpdate {
		ProfileUpdate::new(op, Some("user-1".to_string()))
	}

	#[test]
	fn unidentified_update_has_no_wire_form() {
		let update = ProfileUpdate::new(ProfileOp::DeleteUser, None);
		assert!(update.to_wire("tok").is_none());
	}

	#[test]
	fn set_renders_under_set_key() {
		let update = identified(ProfileOp::Set {
			properties: Properties::new().insert("plan", "pro"),
		});
		let wire = update.to_wire("tok").unwrap();
		assert_eq!(wire["$token"], "tok");
		assert_eq!(wire["$distinct_id"], "user-1");
		assert_eq!(wire["$set"]["plan"], "pro");
	}

	#[test]
	fn increment_renders_under_add_key() {
		let mut amounts = BTreeMap::new();
		amounts.insert("logins".to_string(), Number::from(2));
		let wire = identified(ProfileOp::Increment { properties: amounts })
			.to_wire("tok")
			.unwrap();
		assert_eq!(wire["$add"]["logins"], 2);
	}

	#[test]
	fn track_charge_appends_transaction() {
		let update = identified(ProfileOp::TrackCharge {
			amount: PropertyValue::from(9.99),
			properties: Properties::new().insert("sku", "A-1"),
		});
		let wire = update.to_wire("tok").unwrap();
		let transaction = &wire["$append"]["$transactions"];
		assert_eq!(transaction["$amount"], 9.99);
		assert_eq!(transaction["sku"], "A-1");
		assert!(transaction["$time"].is_string());
	}

	#[test]
	fn clear_charges_sets_empty_transactions() {
		let wire = identified(ProfileOp::ClearCharges).to_wire("tok").unwrap();
		assert_eq!(wire["$set"]["$transactions"], serde_json::json!([]));
	}

	#[test]
	fn delete_user_renders_delete_key() {
		let wire = identified(ProfileOp::DeleteUser).to_wire("tok").unwrap();
		assert_eq!(wire["$delete"], "");
	}

	#[test]
	fn push_token_is_hex_encoded() {
		let wire = identified(ProfileOp::AddPushToken {
			token: vec![0xde, 0xad, 0xbe, 0xef],
		})
		.to_wire("tok")
		.unwrap();
		assert_eq!(wire["$union"]["$ios_devices"][0], "deadbeef");
	}

	#[test]
	fn restamp_sets_identity() {
		let update = ProfileUpdate::new(ProfileOp::ClearCharges, None).restamped("u9");
		assert_eq!(update.distinct_id.as_deref(), Some("u9"));
	}

	#[test]
	fn op_serde_roundtrip() {
		let update = identified(ProfileOp::AddPushToken { token: vec![1, 2, 3] });
		let json = serde_json::to_string(&update).unwrap();
		let parsed: ProfileUpdate = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed, update);
		assert_eq!(parsed.op.kind(), "add_push_token");
	}
}
