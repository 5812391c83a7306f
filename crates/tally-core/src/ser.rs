// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A serde serializer that produces [`PropertyValue`]s and refuses anything
//! outside the property domain.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{self, Serialize};
use serde_json::Number;

use crate::property::PropertyValue;

#[derive(Debug)]
pub(crate) struct OutOfDomain(pub(crate) String);

impl fmt::Display for OutOfDomain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::error::Error for OutOfDomain {}

impl ser::Error for OutOfDomain {
	fn custom<T: fmt::Display>(msg: T) -> Self {
		Self(msg.to_string())
	}
}

type Result<T> = std::result::Result<T, OutOfDomain>;

pub(crate) struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;
	type SerializeSeq = SeqSerializer;
	type SerializeTuple = SeqSerializer;
	type SerializeTupleStruct = SeqSerializer;
	type SerializeTupleVariant = VariantSeqSerializer;
	type SerializeMap = MapSerializer;
	type SerializeStruct = MapSerializer;
	type SerializeStructVariant = VariantMapSerializer;

	fn serialize_bool(self, v: bool) -> Result<PropertyValue> {
		Ok(PropertyValue::Bool(v))
	}

	fn serialize_i8(self, v: i8) -> Result<PropertyValue> {
		self.serialize_i64(i64::from(v))
	}

	fn serialize_i16(self, v: i16) -> Result<PropertyValue> {
		self.serialize_i64(i64::from(v))
	}

	fn serialize_i32(self, v: i32) -> Result<PropertyValue> {
		self.serialize_i64(i64::from(v))
	}

	fn serialize_i64(self, v: i64) -> Result<PropertyValue> {
		Ok(PropertyValue::Number(v.into()))
	}

	fn serialize_i128(self, v: i128) -> Result<PropertyValue> {
		if let Ok(v) = i64::try_from(v) {
			return self.serialize_i64(v);
		}
		if let Ok(v) = u64::try_from(v) {
			return self.serialize_u64(v);
		}
		Err(OutOfDomain(format!("integer {v} does not fit in 64 bits")))
	}

	fn serialize_u8(self, v: u8) -> Result<PropertyValue> {
		self.serialize_u64(u64::from(v))
	}

	fn serialize_u16(self, v: u16) -> Result<PropertyValue> {
		self.serialize_u64(u64::from(v))
	}

	fn serialize_u32(self, v: u32) -> Result<PropertyValue> {
		self.serialize_u64(u64::from(v))
	}

	fn serialize_u64(self, v: u64) -> Result<PropertyValue> {
		Ok(PropertyValue::Number(v.into()))
	}

	fn serialize_u128(self, v: u128) -> Result<PropertyValue> {
		u64::try_from(v)
			.map(|v| PropertyValue::Number(v.into()))
			.map_err(|_| OutOfDomain(format!("integer {v} does not fit in 64 bits")))
	}

	fn serialize_f32(self, v: f32) -> Result<PropertyValue> {
		self.serialize_f64(f64::from(v))
	}

	fn serialize_f64(self, v: f64) -> Result<PropertyValue> {
		Number::from_f64(v)
			.map(PropertyValue::Number)
			.ok_or_else(|| OutOfDomain(format!("non-finite number {v}")))
	}

	fn serialize_char(self, v: char) -> Result<PropertyValue> {
		Ok(PropertyValue::String(v.to_string()))
	}

	fn serialize_str(self, v: &str) -> Result<PropertyValue> {
		Ok(PropertyValue::String(v.to_owned()))
	}

	fn serialize_bytes(self, _v: &[u8]) -> Result<PropertyValue> {
		Err(OutOfDomain("raw bytes are not a property value".to_string()))
	}

	fn serialize_none(self) -> Result<PropertyValue> {
		Ok(PropertyValue::Null)
	}

	fn serialize_some<T>(self, value: &T) -> Result<PropertyValue>
	where
		T: ?Sized + Serialize,
	{
		value.serialize(self)
	}

	fn serialize_unit(self) -> Result<PropertyValue> {
		Ok(PropertyValue::Null)
	}

	fn serialize_unit_struct(self, _name: &'static str) -> Result<PropertyValue> {
		Ok(PropertyValue::Null)
	}

	fn serialize_unit_variant(
		self,
		_name: &'static str,
		_variant_index: u32,
		variant: &'static str,
	) -> Result<PropertyValue> {
		Ok(PropertyValue::String(variant.to_owned()))
	}

	fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<PropertyValue>
	where
		T: ?Sized + Serialize,
	{
		value.serialize(self)
	}

	fn serialize_newtype_variant<T>(
		self,
		_name: &'static str,
		_variant_index: u32,
		variant: &'static str,
		value: &T,
	) -> Result<PropertyValue>
	where
		T: ?Sized + Serialize,
	{
		let mut map = BTreeMap::new();
		map.insert(variant.to_owned(), value.serialize(ValueSerializer)?);
		Ok(PropertyValue::Map(map))
	}

	fn serialize_seq(self, len: Option<usize>) -> Result<SeqSerializer> {
		Ok(SeqSerializer {
			items: Vec::with_capacity(len.unwrap_or(0)),
		})
	}

	fn serialize_tuple(self, len: usize) -> Result<SeqSerializer> {
		self.serialize_seq(Some(len))
	}

	fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqSerializer> {
		self.serialize_seq(Some(len))
	}

	fn serialize_tuple_variant(
		self,
		_name: &'static str,
		_variant_index: u32,
		variant: &'static str,
		len: usize,
	) -> Result<VariantSeqSerializer> {
		Ok(VariantSeqSerializer {
			variant,
			items: Vec::with_capacity(len),
		})
	}

	fn serialize_map(self, _len: Option<usize>) -> Result<MapSerializer> {
		Ok(MapSerializer {
			map: BTreeMap::new(),
			next_key: None,
		})
	}

	fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapSerializer> {
		self.serialize_map(Some(len))
	}

	fn serialize_struct_variant(
		self,
		_name: &'static str,
		_variant_index: u32,
		variant: &'static str,
		_len: usize,
	) -> Result<VariantMapSerializer> {
		Ok(VariantMapSerializer {
			variant,
			map: BTreeMap::new(),
		})
	}
}

pub(crate) struct SeqSerializer {
	items: Vec<PropertyValue>,
}

impl ser::SerializeSeq for SeqSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;

	fn serialize_element<T>(&mut self, value: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		self.items.push(value.serialize(ValueSerializer)?);
		Ok(())
	}

	fn end(self) -> Result<PropertyValue> {
		Ok(PropertyValue::List(self.items))
	}
}

impl ser::SerializeTuple for SeqSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;

	fn serialize_element<T>(&mut self, value: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		ser::SerializeSeq::serialize_element(self, value)
	}

	fn end(self) -> Result<PropertyValue> {
		ser::SerializeSeq::end(self)
	}
}

impl ser::SerializeTupleStruct for SeqSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;

	fn serialize_field<T>(&mut self, value: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		ser::SerializeSeq::serialize_element(self, value)
	}

	fn end(self) -> Result<PropertyValue> {
		ser::SerializeSeq::end(self)
	}
}

pub(crate) struct VariantSeqSerializer {
	variant: &'static str,
	items: Vec<PropertyValue>,
}

impl ser::SerializeTupleVariant for VariantSeqSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;

	fn serialize_field<T>(&mut self, value: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		self.items.push(value.serialize(ValueSerializer)?);
		Ok(())
	}

	fn end(self) -> Result<PropertyValue> {
		let mut map = BTreeMap::new();
		map.insert(self.variant.to_owned(), PropertyValue::List(self.items));
		Ok(PropertyValue::Map(map))
	}
}

pub(crate) struct MapSerializer {
	map: BTreeMap<String, PropertyValue>,
	next_key: Option<String>,
}

/// Map keys must render as strings; numbers and booleans are stringified.
fn key_to_string(key: PropertyValue) -> Result<String> {
	match key {
		PropertyValue::String(s) => Ok(s),
		PropertyValue::Number(n) => Ok(n.to_string()),
		PropertyValue::Bool(b) => Ok(b.to_string()),
		other => Err(OutOfDomain(format!(
			"map keys must be strings, got {other:?}"
		))),
	}
}

impl ser::SerializeMap for MapSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;

	fn serialize_key<T>(&mut self, key: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		self.next_key = Some(key_to_string(key.serialize(ValueSerializer)?)?);
		Ok(())
	}

	fn serialize_value<T>(&mut self, value: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		let key = self
			.next_key
			.take()
			.ok_or_else(|| OutOfDomain("map value without a key".to_string()))?;
		self.map.insert(key, value.serialize(ValueSerializer)?);
		Ok(())
	}

	fn end(self) -> Result<PropertyValue> {
		Ok(PropertyValue::Map(self.map))
	}
}

impl ser::SerializeStruct for MapSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;

	fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		self.map.insert(key.to_owned(), value.serialize(ValueSerializer)?);
		Ok(())
	}

	fn end(self) -> Result<PropertyValue> {
		Ok(PropertyValue::Map(self.map))
	}
}

pub(crate) struct VariantMapSerializer {
	variant: &'static str,
	map: BTreeMap<String, PropertyValue>,
}

impl ser::SerializeStructVariant for VariantMapSerializer {
	type Ok = PropertyValue;
	type Error = OutOfDomain;

	fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
	where
		T: ?Sized + Serialize,
	{
		self.map.insert(key.to_owned(), value.serialize(ValueSerializer)?);
		Ok(())
	}

	fn end(self) -> Result<PropertyValue> {
		let mut outer = BTreeMap::new();
		outer.insert(self.variant.to_owned(), PropertyValue::Map(self.map));
		Ok(PropertyValue::Map(outer))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bytes_are_out_of_domain() {
		struct Blob;
		impl Serialize for Blob {
			fn serialize<S: ser::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
				s.serialize_bytes(&[1, 2, 3])
			}
		}
		assert!(Blob.serialize(ValueSerializer).is_err());
	}

	#[test]
	fn wide_integers_fit_when_small() {
		assert_eq!(
			42i128.serialize(ValueSerializer).unwrap(),
			PropertyValue::Number(42.into())
		);
		assert!(u128::MAX.serialize(ValueSerializer).is_err());
	}

	#[test]
	fn tuple_variants_nest_under_variant_name() {
		#[derive(serde::Serialize)]
		enum Shape {
			Point(i32, i32),
		}
		let value = Shape::Point(1, 2).serialize(ValueSerializer).unwrap();
		let PropertyValue::Map(map) = value else {
			panic!("expected a map");
		};
		assert_eq!(
			map["Point"],
			PropertyValue::List(vec![
				PropertyValue::Number(1.into()),
				PropertyValue::Number(2.into())
			])
		);
	}
}
