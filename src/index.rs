//! Hash to chain-position lookup table.
//!
//! Always derived from a chain in one pass; serialized as a JSON object whose
//! keys appear in chain order so repeated exports diff cleanly.

use std::collections::HashMap;
use std::path::Path;

use serde::ser::SerializeMap as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::chain::CertificateRecord;
use crate::error::{Result, ResultExt as _};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashIndex {
    positions: HashMap<String, usize>,
    order: Vec<String>,
}

impl HashIndex {
    pub fn from_records(records: &[CertificateRecord]) -> Self {
        let mut index = Self {
            positions: HashMap::with_capacity(records.len()),
            order: Vec::with_capacity(records.len()),
        };
        for (pos, r) in records.iter().enumerate() {
            index.insert(r.current_hash.clone(), pos);
        }
        index
    }

    fn insert(&mut self, hash: String, pos: usize) {
        if self.positions.insert(hash.clone(), pos).is_none() {
            self.order.push(hash);
        }
    }

    /// Position of `hash`, or `None` when it is not part of the chain.
    /// The query is trimmed and lowercased first.
    pub fn lookup(&self, hash: &str) -> Option<usize> {
        self.positions.get(&hash.trim().to_ascii_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in chain order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.order.iter().map(|h| (h.as_str(), self.positions[h]))
    }

    /// Read a previously exported index file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).ctx_input(&format!("read index {}", path.display()))?;
        serde_json::from_slice(&bytes).ctx_input(&format!("parse index {}", path.display()))
    }
}

impl Serialize for HashIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for (hash, pos) in self.iter() {
            map.serialize_entry(hash, &pos)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HashIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = HashMap::<String, usize>::deserialize(deserializer)?;
        let mut entries: Vec<(String, usize)> = raw.into_iter().collect();
        entries.sort_by_key(|(_, pos)| *pos);
        let mut index = Self::default();
        for (hash, pos) in entries {
            index.insert(hash, pos);
        }
        Ok(index)
    }
}
