//! Fields operations on the engine: composite values and reverse lookup.

use tracing::trace;

use crate::fields::Fields;

use super::{Db, DbError};

impl Db {
    /// Store a fields mapping as the value of `key`.
    pub fn put_fields(&self, key: impl Into<Vec<u8>>, fields: &Fields) -> Result<(), DbError> {
        self.put(key, &fields.encode())
    }

    /// Read `key` and decode its value as a fields mapping.
    ///
    /// Returns `None` for an absent key; a present value that is not a
    /// fields encoding is corruption.
    pub fn get_fields(&self, key: &[u8]) -> Result<Option<Fields>, DbError> {
        match self.get(key)? {
            Some(value) => Ok(Some(Fields::decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Every user key whose decoded fields contain `name → value`.
    ///
    /// A linear scan of the full key space; no index is maintained. Keys
    /// whose values are not fields encodings are skipped.
    pub fn find_keys_by_field(
        &self,
        name: &[u8],
        value: &[u8],
    ) -> Result<Vec<Vec<u8>>, DbError> {
        let mut keys = Vec::new();
        for (key, stored) in self.scan()? {
            let Ok(fields) = Fields::decode(&stored) else {
                trace!(?key, "skipping non-fields value in reverse lookup");
                continue;
            };
            if fields.contains(name) && fields.get(name) == value {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
