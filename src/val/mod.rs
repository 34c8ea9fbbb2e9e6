//! The document value model.
//!
//! A document is an ordered collection of fields with typed leaves. Values
//! sort across types in a fixed order (null < bool < number < text < blob <
//! array < document) which the key builder mirrors byte-for-byte, so index
//! iteration order can always be checked against [`Value::compare`].

pub mod codec;
pub mod path;

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::err::Error;
use crate::val::path::Path;

/// The type of a value, or of a declared field constraint.
///
/// `Any` (the zero value) marks an untyped constraint or index position.
#[derive(
	Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
#[non_exhaustive]
pub enum Type {
	#[default]
	Any = 0,
	Null = 1,
	Bool = 2,
	Integer = 3,
	Double = 4,
	Text = 5,
	Blob = 6,
	Array = 7,
	Document = 8,
}

impl Type {
	/// Decode a type from its stable wire code.
	pub fn from_u8(code: u8) -> Option<Type> {
		match code {
			0 => Some(Type::Any),
			1 => Some(Type::Null),
			2 => Some(Type::Bool),
			3 => Some(Type::Integer),
			4 => Some(Type::Double),
			5 => Some(Type::Text),
			6 => Some(Type::Blob),
			7 => Some(Type::Array),
			8 => Some(Type::Document),
			_ => None,
		}
	}

	pub fn is_number(self) -> bool {
		matches!(self, Type::Integer | Type::Double)
	}

	/// Whether a value of type `other` can stand for this type.
	///
	/// Numeric types are interchangeable with each other; everything else
	/// must match exactly.
	pub fn is_compatible_with(self, other: Type) -> bool {
		self == other || (self.is_number() && other.is_number())
	}

	/// The tag byte used when this type heads an untyped key encoding.
	///
	/// Integers are promoted to double on untyped positions, so the integer
	/// tag never appears in a key.
	pub(crate) fn order_tag(self) -> u8 {
		match self {
			Type::Integer => Type::Double as u8,
			t => t as u8,
		}
	}
}

impl Display for Type {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		let s = match self {
			Type::Any => "any",
			Type::Null => "null",
			Type::Bool => "bool",
			Type::Integer => "integer",
			Type::Double => "double",
			Type::Text => "text",
			Type::Blob => "blob",
			Type::Array => "array",
			Type::Document => "document",
		};
		f.write_str(s)
	}
}

/// A single document value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Integer(i64),
	Double(f64),
	Text(String),
	Blob(Vec<u8>),
	Array(Vec<Value>),
	Document(Document),
}

impl Value {
	pub fn typ(&self) -> Type {
		match self {
			Value::Null => Type::Null,
			Value::Bool(_) => Type::Bool,
			Value::Integer(_) => Type::Integer,
			Value::Double(_) => Type::Double,
			Value::Text(_) => Type::Text,
			Value::Blob(_) => Type::Blob,
			Value::Array(_) => Type::Array,
			Value::Document(_) => Type::Document,
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Whether this value is document-shaped rather than scalar.
	pub fn is_container(&self) -> bool {
		matches!(self, Value::Array(_) | Value::Document(_))
	}

	/// Convert this value to the given type, applying the implicit
	/// conversions allowed during constraint validation.
	///
	/// Integers and doubles convert freely as long as no fraction is lost,
	/// booleans and integers convert to each other, and text parses into
	/// either numeric type. Everything else is incompatible.
	pub fn cast_as(&self, typ: Type) -> Result<Value, Error> {
		if typ == Type::Any || self.typ() == typ {
			return Ok(self.clone());
		}
		let incompatible = || Error::CastIncompatible {
			from: self.typ(),
			to: typ,
		};
		match (self, typ) {
			(Value::Integer(i), Type::Double) => Ok(Value::Double(*i as f64)),
			(Value::Double(d), Type::Integer) => {
				if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
					Ok(Value::Integer(*d as i64))
				} else {
					Err(incompatible())
				}
			}
			(Value::Bool(b), Type::Integer) => Ok(Value::Integer(*b as i64)),
			(Value::Integer(i), Type::Bool) => Ok(Value::Bool(*i != 0)),
			(Value::Text(s), Type::Integer) => {
				s.trim().parse::<i64>().map(Value::Integer).map_err(|_| incompatible())
			}
			(Value::Text(s), Type::Double) => {
				s.trim().parse::<f64>().map(Value::Double).map_err(|_| incompatible())
			}
			_ => Err(incompatible()),
		}
	}

	/// Total order across all value types, matching the key encoding.
	pub fn compare(&self, other: &Value) -> Ordering {
		let (ta, tb) = (self.typ().order_tag(), other.typ().order_tag());
		if ta != tb {
			return ta.cmp(&tb);
		}
		match (self, other) {
			(Value::Null, Value::Null) => Ordering::Equal,
			(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
			(Value::Integer(a), Value::Integer(b)) => a.cmp(b),
			(Value::Text(a), Value::Text(b)) => a.cmp(b),
			(Value::Blob(a), Value::Blob(b)) => a.cmp(b),
			(Value::Array(a), Value::Array(b)) => {
				for (x, y) in a.iter().zip(b.iter()) {
					match x.compare(y) {
						Ordering::Equal => continue,
						ord => return ord,
					}
				}
				a.len().cmp(&b.len())
			}
			(Value::Document(a), Value::Document(b)) => {
				for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
					match ka.cmp(kb).then_with(|| va.compare(vb)) {
						Ordering::Equal => continue,
						ord => return ord,
					}
				}
				a.len().cmp(&b.len())
			}
			// Both sides are numbers but at least one is a double.
			(a, b) => {
				let (x, y) = (a.as_f64(), b.as_f64());
				x.total_cmp(&y)
			}
		}
	}

	fn as_f64(&self) -> f64 {
		match self {
			Value::Integer(i) => *i as f64,
			Value::Double(d) => *d,
			_ => f64::NAN,
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match self {
			Value::Null => f.write_str("null"),
			Value::Bool(b) => write!(f, "{b}"),
			Value::Integer(i) => write!(f, "{i}"),
			Value::Double(d) => write!(f, "{d}"),
			Value::Text(s) => write!(f, "{s:?}"),
			Value::Blob(b) => {
				f.write_str("\\x")?;
				for byte in b {
					write!(f, "{byte:02X}")?;
				}
				Ok(())
			}
			Value::Array(a) => {
				f.write_str("[")?;
				for (i, v) in a.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{v}")?;
				}
				f.write_str("]")
			}
			Value::Document(d) => write!(f, "{d}"),
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Integer(v as i64)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Integer(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::Double(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Text(v.to_owned())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Text(v)
	}
}

impl From<Vec<Value>> for Value {
	fn from(v: Vec<Value>) -> Self {
		Value::Array(v)
	}
}

impl From<Document> for Value {
	fn from(v: Document) -> Self {
		Value::Document(v)
	}
}

/// An ordered field buffer.
///
/// Field order is preserved on round-trips through the codec; lookups are by
/// name, mutation replaces in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
	fields: Vec<(String, Value)>,
}

impl Document {
	pub fn new() -> Document {
		Document::default()
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.fields.iter().map(|(k, v)| (k.as_str(), v))
	}

	/// Set a top-level field, replacing any previous value under that name.
	pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Document {
		let name = name.into();
		let value = value.into();
		match self.fields.iter_mut().find(|(k, _)| *k == name) {
			Some((_, v)) => *v = value,
			None => self.fields.push((name, value)),
		}
		self
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
	}

	fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
		self.fields.iter_mut().find(|(k, _)| k == name).map(|(_, v)| v)
	}

	/// Resolve a path to the value it points at, if any.
	pub fn get_path(&self, path: &Path) -> Option<&Value> {
		let mut current = self.get(path.first_field()?)?;
		for part in path.iter().skip(1) {
			current = match (current, part) {
				(Value::Document(d), path::PathPart::Field(name)) => d.get(name)?,
				(Value::Array(a), path::PathPart::Index(i)) => a.get(*i)?,
				_ => return None,
			};
		}
		Some(current)
	}

	/// Write a value at a path, creating intermediate documents for missing
	/// field fragments. Array fragments must resolve to an existing slot.
	pub fn set_path(&mut self, path: &Path, value: Value) -> Result<(), Error> {
		let parts: Vec<_> = path.iter().collect();
		let invalid = || Error::InvalidPath(path.to_string());
		let Some((path::PathPart::Field(first), rest)) = parts.split_first() else {
			return Err(invalid());
		};
		if rest.is_empty() {
			self.set(first.clone(), value);
			return Ok(());
		}
		if self.get(first).is_none() {
			// Only a field fragment can be materialized out of nothing.
			if !matches!(rest[0], path::PathPart::Field(_)) {
				return Err(invalid());
			}
			self.set(first.clone(), Value::Document(Document::new()));
		}
		let mut current = self.get_mut(first).ok_or_else(invalid)?;
		for (i, part) in rest.iter().enumerate() {
			let next = rest.get(i + 1);
			match (current, part) {
				(Value::Document(d), path::PathPart::Field(name)) => {
					match next {
						None => {
							d.set(name.clone(), value);
							return Ok(());
						}
						Some(path::PathPart::Field(_)) => {
							if d.get(name).is_none() {
								d.set(name.clone(), Value::Document(Document::new()));
							}
						}
						Some(path::PathPart::Index(_)) => {
							if d.get(name).is_none() {
								return Err(invalid());
							}
						}
					}
					current = d.get_mut(name).ok_or_else(invalid)?;
				}
				(Value::Array(a), path::PathPart::Index(idx)) => {
					let slot = a.get_mut(*idx).ok_or_else(invalid)?;
					match next {
						None => {
							*slot = value;
							return Ok(());
						}
						Some(_) => current = slot,
					}
				}
				_ => return Err(invalid()),
			}
		}
		Err(invalid())
	}
}

impl Display for Document {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str("{")?;
		for (i, (k, v)) in self.fields.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{k:?}: {v}")?;
		}
		f.write_str("}")
	}
}

impl FromIterator<(String, Value)> for Document {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		Document {
			fields: iter.into_iter().collect(),
		}
	}
}

/// Build a [`Document`] from `"field" => value` pairs.
#[macro_export]
macro_rules! doc {
	() => {
		$crate::val::Document::new()
	};
	($($k:expr => $v:expr),+ $(,)?) => {{
		let mut d = $crate::val::Document::new();
		$(d.set($k, $v);)+
		d
	}};
}
