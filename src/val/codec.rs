//! The binary document codec.
//!
//! Documents are stored as compact binary through the serde model. The codec
//! round-trips field order and nesting exactly; it makes no ordering
//! guarantee, which is the key builder's job.

use crate::err::Error;
use crate::val::Document;

/// Encode a document for storage.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>, Error> {
	Ok(bincode::serialize(doc)?)
}

/// Decode a stored document.
pub fn decode_document(bytes: &[u8]) -> Result<Document, Error> {
	Ok(bincode::deserialize(bytes)?)
}
