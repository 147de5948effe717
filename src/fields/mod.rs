//! Fields — a composite value made of named sub-fields.
//!
//! A fields value lets one logical key store a mapping of `name → value`
//! byte strings, encoded into a single opaque value the storage layer never
//! inspects:
//!
//! ```text
//! outer := (varint64 field_size [field_size bytes])*
//! field := varint64 name_size [name_size bytes] [value bytes]
//! ```
//!
//! The mapping is contractually **unordered**: the encoded form happens to
//! be name-sorted because a [`BTreeMap`] backs it, but consumers must not
//! rely on byte-for-byte stability across producers.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::encoding::{get_length_prefixed_slice, get_varint64, put_varint64};

/// Errors returned when decoding a fields value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldsError {
    /// The byte string is not a well-formed fields encoding.
    #[error("corruption: {0}")]
    Corruption(String),
}

/// A mapping of field names to byte-string values under one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    fields: BTreeMap<Vec<u8>, Vec<u8>>,
    size: usize,
}

impl Fields {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a fields value produced by [`encode`](Fields::encode).
    ///
    /// Any underflow or trailing bytes are corruption. Duplicate names keep
    /// the last occurrence.
    pub fn decode(mut input: &[u8]) -> Result<Self, FieldsError> {
        let mut fields = Self::new();
        while !input.is_empty() {
            let field = get_length_prefixed_slice(&mut input)
                .map_err(|e| FieldsError::Corruption(format!("field frame: {e}")))?;

            let mut cursor = field;
            let name_size = get_varint64(&mut cursor)
                .map_err(|e| FieldsError::Corruption(format!("field name size: {e}")))?;
            if name_size > cursor.len() as u64 {
                return Err(FieldsError::Corruption(format!(
                    "field name size {name_size} exceeds field remainder {}",
                    cursor.len()
                )));
            }
            let (name, value) = cursor.split_at(name_size as usize);
            fields.set(name.to_vec(), value.to_vec());
        }
        Ok(fields)
    }

    /// Encode the mapping into a single opaque value.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size + 8 * self.fields.len());
        let mut field = Vec::new();
        for (name, value) in &self.fields {
            field.clear();
            put_varint64(&mut field, name.len() as u64);
            field.extend_from_slice(name);
            field.extend_from_slice(value);

            put_varint64(&mut out, field.len() as u64);
            out.extend_from_slice(&field);
        }
        out
    }

    /// Look up a field. An absent name reads as empty and inserts nothing.
    pub fn get(&self, name: &[u8]) -> &[u8] {
        self.fields.get(name).map_or(&[], Vec::as_slice)
    }

    /// Whether the mapping holds `name`.
    pub fn contains(&self, name: &[u8]) -> bool {
        self.fields.contains_key(name)
    }

    /// Insert or overwrite a field.
    pub fn set(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        let value = value.into();
        let name_len = name.len();
        let value_len = value.len();
        match self.fields.insert(name, value) {
            // Replacement: the name was already counted.
            Some(old) => self.size = self.size + value_len - old.len(),
            None => self.size += name_len + value_len,
        }
    }

    /// Combined byte length of all names and values. Telemetry only.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_slice(), value.as_slice()))
    }
}

impl<N: Into<Vec<u8>>, V: Into<Vec<u8>>> FromIterator<(N, V)> for Fields {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut fields = Self::new();
        for (name, value) in iter {
            fields.set(name, value);
        }
        fields
    }
}
