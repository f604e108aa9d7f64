//! Ordered multi-value containers for decoded fields and files.
//!
//! Both output collections preserve insertion order and allow a name to
//! appear more than once (repeated form fields, multiple uploads under one
//! field name). The maps returned by a successful parse carry no public
//! mutators; callers that need to build one — for example a custom
//! [`UploadHandler::handle_raw_input`](crate::handlers::UploadHandler::handle_raw_input)
//! implementation — construct it in one shot with [`MultiValueMap::from_pairs`].

use crate::handlers::UploadedFile;

/// An insertion-ordered multi-value map.
#[derive(Debug)]
pub struct MultiValueMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for MultiValueMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MultiValueMap<V> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build a map from `(name, value)` pairs, preserving their order.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, V)>) -> Self {
        Self { entries: pairs }
    }

    pub(crate) fn append(&mut self, name: String, value: V) {
        self.entries.push((name, value));
    }

    /// Get the most recently inserted value for a name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Get every value for a name, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a V> {
        self.entries
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Check whether a name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// Iterate over all `(name, value)` entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    /// Returns the number of entries (counting repeats).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(feature = "serde")]
impl<V: serde::Serialize> serde::Serialize for MultiValueMap<V> {
    /// Serializes as a map of name to list-of-values, names in first-seen
    /// order, values in insertion order.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.entries {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }

        let mut map = serializer.serialize_map(Some(names.len()))?;
        for name in names {
            let values: Vec<&V> = self.get_all(name).collect();
            map.serialize_entry(name, &values)?;
        }
        map.end()
    }
}

/// Ordered multi-value map of field name to decoded field value.
pub type FieldMap = MultiValueMap<String>;

/// Ordered multi-value map of field name to stored upload.
pub type FileMap = MultiValueMap<UploadedFile>;
