//! Paths into documents.
//!
//! A path is a sequence of fragments, each either a field name or an array
//! index, written `a.b[0].c` in text form.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::err::Error;

/// One fragment of a [`Path`].
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum PathPart {
	Field(String),
	Index(usize),
}

/// A location inside a document.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Path(Vec<PathPart>);

impl Path {
	/// A single-fragment path naming a top-level field.
	pub fn field(name: impl Into<String>) -> Path {
		Path(vec![PathPart::Field(name.into())])
	}

	pub fn push_field(mut self, name: impl Into<String>) -> Path {
		self.0.push(PathPart::Field(name.into()));
		self
	}

	pub fn push_index(mut self, index: usize) -> Path {
		self.0.push(PathPart::Index(index));
		self
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, PathPart> {
		self.0.iter()
	}

	pub fn parts(&self) -> &[PathPart] {
		&self.0
	}

	/// The path made of the first `len` fragments.
	pub fn prefix(&self, len: usize) -> Path {
		Path(self.0[..len.min(self.0.len())].to_vec())
	}

	/// The field name of the first fragment, if it is one.
	pub(crate) fn first_field(&self) -> Option<&str> {
		match self.0.first() {
			Some(PathPart::Field(name)) => Some(name),
			_ => None,
		}
	}

	/// The path one fragment shorter, or `None` for a top-level path.
	pub fn parent(&self) -> Option<Path> {
		if self.0.len() <= 1 {
			return None;
		}
		Some(Path(self.0[..self.0.len() - 1].to_vec()))
	}

	pub fn last(&self) -> Option<&PathPart> {
		self.0.last()
	}
}

impl From<Vec<PathPart>> for Path {
	fn from(parts: Vec<PathPart>) -> Path {
		Path(parts)
	}
}

impl Display for Path {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		for (i, part) in self.0.iter().enumerate() {
			match part {
				PathPart::Field(name) => {
					if i > 0 {
						f.write_str(".")?;
					}
					f.write_str(name)?;
				}
				PathPart::Index(idx) => write!(f, "[{idx}]")?,
			}
		}
		Ok(())
	}
}

impl FromStr for Path {
	type Err = Error;

	fn from_str(s: &str) -> Result<Path, Error> {
		let invalid = || Error::InvalidPath(s.to_owned());
		let mut parts = Vec::new();
		let mut chars = s.chars();
		let mut field = String::new();
		let mut expect_field = true;
		while let Some(c) = chars.next() {
			match c {
				'.' => {
					if !field.is_empty() {
						parts.push(PathPart::Field(std::mem::take(&mut field)));
					} else if expect_field || !matches!(parts.last(), Some(PathPart::Index(_))) {
						return Err(invalid());
					}
					expect_field = true;
				}
				'[' => {
					if !field.is_empty() {
						parts.push(PathPart::Field(std::mem::take(&mut field)));
					} else if expect_field {
						// `[0]` may not start a path or follow a dot.
						return Err(invalid());
					}
					let mut digits = String::new();
					for d in chars.by_ref() {
						if d == ']' {
							break;
						}
						digits.push(d);
					}
					let idx: usize = digits.parse().map_err(|_| invalid())?;
					parts.push(PathPart::Index(idx));
					expect_field = false;
				}
				c => {
					field.push(c);
					expect_field = false;
				}
			}
		}
		if !field.is_empty() {
			parts.push(PathPart::Field(field));
		} else if expect_field {
			return Err(invalid());
		}
		if parts.is_empty() {
			return Err(invalid());
		}
		Ok(Path(parts))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_and_display() {
		for s in ["a", "a.b", "a[0]", "a.b[1].c", "foo[10][2]"] {
			let p: Path = s.parse().unwrap();
			assert_eq!(p.to_string(), s);
		}
	}

	#[test]
	fn parse_rejects_malformed() {
		for s in ["", ".", "a..b", "[0]", "a[x]", ".a", "a.", "a.[0]"] {
			assert!(s.parse::<Path>().is_err(), "{s:?} should not parse");
		}
	}

	#[test]
	fn parent_chain() {
		let p: Path = "a.b[0]".parse().unwrap();
		let parent = p.parent().unwrap();
		assert_eq!(parent.to_string(), "a.b");
		assert_eq!(parent.parent().unwrap().to_string(), "a");
		assert_eq!(parent.parent().unwrap().parent(), None);
	}
}
