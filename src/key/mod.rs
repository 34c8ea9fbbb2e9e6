//! How keys are laid out in the key-value store.
//!
//! ```text
//! table row      {store_name}/{encoded primary key}            -> document
//! table row      {store_name}/{doc-id as uvarint}              -> document
//! index entry    i{index_name}/{encoded tuple}[{seq}{len}]     -> raw doc key
//! table catalog  __genji_tables/{table name}                   -> descriptor document
//! index catalog  __genji_indexes/{index name}                  -> descriptor document
//! store names    `t` followed by a uvarint sequence number
//! ```
//!
//! Every tuple component is terminated by a `0x00` delimiter, and `0x00`
//! bytes inside variable-length bodies are escaped as `0x00 0xFF`, so the
//! delimiter sorts below every body and a prefix of a tuple encodes to a
//! byte-prefix of the full tuple. A clean entry therefore always ends in
//! `0x00`, which is what lets readers recognise the optional non-unique
//! disambiguator: its final byte, the uvarint length, is never zero.

use crate::err::Error;
use crate::val::{Type, Value};

/// Delimiter appended after every encoded tuple component.
const DELIMITER: u8 = 0x00;
/// Replacement for a delimiter byte occurring inside a body.
const ESCAPE: u8 = 0xFF;

const SIGN_BIT: u64 = 1 << 63;

/// Serialize one value for use as (part of) a key.
///
/// With a declared type the value is marshaled in its type-specific form,
/// without a tag. On an untyped position a single leading byte carries the
/// type, and integers are promoted to double so that all numbers share one
/// sort key space.
pub fn encode_value(buf: &mut Vec<u8>, v: &Value, typ: Type) -> Result<(), Error> {
	if typ == Type::Any {
		buf.push(v.typ().order_tag());
		return match v {
			Value::Integer(i) => {
				encode_body(buf, &Value::Double(*i as f64), Type::Double);
				Ok(())
			}
			v => {
				encode_body(buf, v, v.typ());
				Ok(())
			}
		};
	}
	if v.typ() == typ {
		encode_body(buf, v, typ);
	} else {
		let cast = v.cast_as(typ)?;
		encode_body(buf, &cast, typ);
	}
	Ok(())
}

fn encode_body(buf: &mut Vec<u8>, v: &Value, typ: Type) {
	match (v, typ) {
		(Value::Null, _) => {}
		(Value::Bool(b), _) => buf.push(*b as u8),
		(Value::Integer(i), _) => {
			buf.extend_from_slice(&((*i as u64) ^ SIGN_BIT).to_be_bytes());
		}
		(Value::Double(d), _) => {
			let bits = d.to_bits();
			let ordered = if bits & SIGN_BIT != 0 {
				!bits
			} else {
				bits ^ SIGN_BIT
			};
			buf.extend_from_slice(&ordered.to_be_bytes());
		}
		(Value::Text(s), _) => escape_into(buf, s.as_bytes()),
		(Value::Blob(b), _) => escape_into(buf, b),
		// Containers are never ordered against each other in a meaningful
		// way; they round-trip through the document codec.
		(v, _) => {
			let bytes = bincode::serialize(v).unwrap_or_default();
			escape_into(buf, &bytes);
		}
	}
}

fn escape_into(buf: &mut Vec<u8>, bytes: &[u8]) {
	for &b in bytes {
		buf.push(b);
		if b == DELIMITER {
			buf.push(ESCAPE);
		}
	}
}

/// Serialize a tuple of values, one per index position.
///
/// The tuple may be shorter than `types` for prefix iteration, never longer.
pub fn encode_tuple(values: &[Value], types: &[Type]) -> Result<Vec<u8>, Error> {
	if values.len() > types.len() {
		return Err(Error::IndexWrongArity {
			got: values.len(),
			expected: types.len(),
		});
	}
	let mut buf = Vec::new();
	for (v, typ) in values.iter().zip(types.iter()) {
		encode_value(&mut buf, v, *typ)?;
		buf.push(DELIMITER);
	}
	Ok(buf)
}

/// Decode an encoded tuple back into values.
///
/// Decodes as many components as `types` names and the input holds; untyped
/// positions come back as the promoted type their tag declares.
pub fn decode_tuple(bytes: &[u8], types: &[Type]) -> Result<Vec<Value>, Error> {
	let mut out = Vec::new();
	let mut rest = bytes;
	for typ in types {
		if rest.is_empty() {
			break;
		}
		let (v, n) = decode_component(rest, *typ)?;
		rest = &rest[n..];
		match rest.first() {
			Some(&DELIMITER) => rest = &rest[1..],
			_ => return Err(Error::MalformedKey),
		}
		out.push(v);
	}
	Ok(out)
}

fn decode_component(bytes: &[u8], typ: Type) -> Result<(Value, usize), Error> {
	if typ == Type::Any {
		let tag = *bytes.first().ok_or(Error::MalformedKey)?;
		let typ = Type::from_u8(tag).filter(|t| *t != Type::Any).ok_or(Error::MalformedKey)?;
		let (v, n) = decode_body(&bytes[1..], typ)?;
		return Ok((v, n + 1));
	}
	decode_body(bytes, typ)
}

fn decode_body(bytes: &[u8], typ: Type) -> Result<(Value, usize), Error> {
	match typ {
		Type::Any => Err(Error::MalformedKey),
		Type::Null => Ok((Value::Null, 0)),
		Type::Bool => {
			let b = *bytes.first().ok_or(Error::MalformedKey)?;
			Ok((Value::Bool(b != 0), 1))
		}
		Type::Integer => {
			let raw: [u8; 8] =
				bytes.get(..8).ok_or(Error::MalformedKey)?.try_into().expect("8 bytes");
			Ok((Value::Integer((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64), 8))
		}
		Type::Double => {
			let raw: [u8; 8] =
				bytes.get(..8).ok_or(Error::MalformedKey)?.try_into().expect("8 bytes");
			let ordered = u64::from_be_bytes(raw);
			let bits = if ordered & SIGN_BIT != 0 {
				ordered ^ SIGN_BIT
			} else {
				!ordered
			};
			Ok((Value::Double(f64::from_bits(bits)), 8))
		}
		Type::Text => {
			let (raw, n) = unescape(bytes);
			let s = String::from_utf8(raw).map_err(|_| Error::MalformedKey)?;
			Ok((Value::Text(s), n))
		}
		Type::Blob => {
			let (raw, n) = unescape(bytes);
			Ok((Value::Blob(raw), n))
		}
		Type::Array | Type::Document => {
			let (raw, n) = unescape(bytes);
			let v: Value = bincode::deserialize(&raw)?;
			Ok((v, n))
		}
	}
}

/// Read an escaped body up to (not including) its terminating delimiter.
fn unescape(bytes: &[u8]) -> (Vec<u8>, usize) {
	let mut out = Vec::new();
	let mut i = 0;
	while i < bytes.len() {
		let b = bytes[i];
		if b == DELIMITER {
			if bytes.get(i + 1) == Some(&ESCAPE) {
				out.push(DELIMITER);
				i += 2;
				continue;
			}
			break;
		}
		out.push(b);
		i += 1;
	}
	(out, i)
}

/// Strip the non-unique disambiguator from an index entry key, if present.
///
/// Clean entries end with the component delimiter; decorated entries end
/// with the (never zero) byte length of their uvarint suffix.
pub(crate) fn strip_disambiguator(key: &[u8]) -> &[u8] {
	match key.last() {
		Some(&DELIMITER) | None => key,
		Some(&n) => &key[..key.len().saturating_sub(n as usize + 1)],
	}
}

/// Append the non-unique disambiguator for the given sequence number.
pub(crate) fn append_disambiguator(key: &mut Vec<u8>, seq: u64) {
	let start = key.len();
	append_uvarint(key, seq);
	let n = key.len() - start;
	key.push(n as u8);
}

/// Append `v` in unsigned varint form.
pub fn append_uvarint(buf: &mut Vec<u8>, mut v: u64) {
	while v >= 0x80 {
		buf.push((v & 0x7f) as u8 | 0x80);
		v >>= 7;
	}
	buf.push(v as u8);
}

/// Decode an unsigned varint, returning the value and the bytes consumed.
pub fn uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
	let mut x = 0u64;
	let mut s = 0u32;
	for (i, &b) in bytes.iter().enumerate() {
		if b < 0x80 {
			if i > 9 || (i == 9 && b > 1) {
				return None;
			}
			return Some((x | ((b as u64) << s), i + 1));
		}
		x |= ((b & 0x7f) as u64) << s;
		s += 7;
	}
	None
}

/// The raw key of a document stored under an auto-generated doc-id.
pub fn docid_key(docid: i64) -> Vec<u8> {
	let mut buf = Vec::with_capacity(10);
	append_uvarint(&mut buf, docid as u64);
	buf
}

/// Decode a doc-id key produced by [`docid_key`].
pub fn decode_docid(key: &[u8]) -> Result<i64, Error> {
	match uvarint(key) {
		Some((v, n)) if n == key.len() && v <= i64::MAX as u64 => Ok(v as i64),
		_ => Err(Error::MalformedKey),
	}
}

/// The name allocated to a table's document store.
pub fn table_store_name(seq: u64) -> Vec<u8> {
	let mut buf = vec![b't'];
	append_uvarint(&mut buf, seq);
	buf
}

/// The name of the store backing an index.
pub fn index_store_name(index_name: &str) -> Vec<u8> {
	let mut buf = vec![b'i'];
	buf.extend_from_slice(index_name.as_bytes());
	buf
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn typed_integer_key() {
		let enc = encode_tuple(&[Value::Integer(1)], &[Type::Integer]).unwrap();
		assert_eq!(enc, [0x80, 0, 0, 0, 0, 0, 0, 1, 0x00]);
	}

	#[test]
	fn untyped_integer_promotes_to_double() {
		let enc = encode_tuple(&[Value::Integer(1)], &[Type::Any]).unwrap();
		// double tag, order-flipped bits of 1.0, delimiter
		assert_eq!(enc, [4, 0xBF, 0xF0, 0, 0, 0, 0, 0, 0, 0x00]);
		let dec = decode_tuple(&enc, &[Type::Any]).unwrap();
		assert_eq!(dec, [Value::Double(1.0)]);
	}

	#[test]
	fn tuple_round_trip() {
		let types = [Type::Integer, Type::Text, Type::Any];
		let values =
			[Value::Integer(-42), Value::Text("hello\0world".into()), Value::Bool(true)];
		let enc = encode_tuple(&values, &types).unwrap();
		assert_eq!(decode_tuple(&enc, &types).unwrap(), values);
	}

	#[test]
	fn prefix_is_byte_prefix() {
		let types = [Type::Text, Type::Integer];
		let full =
			encode_tuple(&[Value::Text("ab".into()), Value::Integer(9)], &types).unwrap();
		let prefix = encode_tuple(&[Value::Text("ab".into())], &types).unwrap();
		assert!(full.starts_with(&prefix));
	}

	#[test]
	fn arity_overflow_is_rejected() {
		let res = encode_tuple(&[Value::Integer(1), Value::Integer(2)], &[Type::Integer]);
		assert!(matches!(res, Err(Error::IndexWrongArity { got: 2, expected: 1 })));
	}

	#[test]
	fn byte_order_matches_value_order() {
		let values = [
			Value::Null,
			Value::Bool(false),
			Value::Bool(true),
			Value::Integer(-10),
			Value::Double(-1.5),
			Value::Integer(0),
			Value::Double(3.25),
			Value::Integer(400),
			Value::Text("".into()),
			Value::Text("a".into()),
			Value::Text("a\0".into()),
			Value::Text("ab".into()),
			Value::Blob(vec![0x00]),
			Value::Blob(vec![0x01]),
		];
		let mut encoded: Vec<Vec<u8>> = Vec::new();
		for v in &values {
			encoded.push(encode_tuple(std::slice::from_ref(v), &[Type::Any]).unwrap());
		}
		for w in encoded.windows(2) {
			assert!(w[0] < w[1], "{:?} should sort below {:?}", w[0], w[1]);
		}
	}

	#[test]
	fn uvarint_round_trip() {
		for v in [0u64, 1, 127, 128, 300, 16_383, 16_384, u64::MAX] {
			let mut buf = Vec::new();
			append_uvarint(&mut buf, v);
			assert_eq!(uvarint(&buf), Some((v, buf.len())));
		}
	}

	#[test]
	fn disambiguator_strip() {
		let clean = encode_tuple(&[Value::Integer(7)], &[Type::Integer]).unwrap();
		assert_eq!(strip_disambiguator(&clean), &clean[..]);

		let mut decorated = clean.clone();
		append_disambiguator(&mut decorated, 300);
		assert_eq!(strip_disambiguator(&decorated), &clean[..]);
	}

	#[test]
	fn docid_keys() {
		for id in [1i64, 2, 127, 128, 1 << 40] {
			assert_eq!(decode_docid(&docid_key(id)).unwrap(), id);
		}
		assert!(decode_docid(&[]).is_err());
	}
}
