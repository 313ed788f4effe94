//! Channel permission table
//!
//! The server answers a validate with a flat object of
//! `"channel":"hash"` pairs, e.g.
//! ```text
//! {"chat:*":"4b8a1c","news":"9f02de"}
//! ```
//! The table is replaced wholesale every time such an object arrives.

use crate::validation::domain_pattern;

/// Ordered list of `(channel or pattern, hash)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    entries: Vec<(String, String)>,
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse the `up` object of an `ortc-validated` frame.
    ///
    /// Keys may contain anything but `"`; values anything but `"` and `,`.
    /// Text between pairs is skipped.
    pub fn parse(input: &str) -> Self {
        let mut entries = Vec::new();
        let mut rest = input;

        while let Some(start) = rest.find('"') {
            let after_open = &rest[start + 1..];
            let Some(key_end) = after_open.find('"') else {
                break;
            };
            let key = &after_open[..key_end];
            let after_key = &after_open[key_end + 1..];

            let Some(value_body) = after_key.strip_prefix(":\"") else {
                rest = after_key;
                continue;
            };
            let Some(value_end) = value_body.find(|c| c == '"' || c == ',') else {
                break;
            };

            if value_body[value_end..].starts_with('"') && !key.is_empty() && value_end > 0 {
                entries.push((key.to_string(), value_body[..value_end].to_string()));
            }
            rest = &value_body[value_end..];
            rest = rest.strip_prefix('"').unwrap_or(rest);
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Hash authorising `channel`, either for the exact name or for its
    /// `domain:*` pattern. The first matching entry wins.
    pub fn hash_for(&self, channel: &str) -> Option<&str> {
        let pattern = domain_pattern(channel);
        self.entries
            .iter()
            .find(|(key, _)| key == channel || *key == pattern)
            .map(|(_, hash)| hash.as_str())
    }

    /// Resolve the hash to put on the wire for `channel`.
    ///
    /// An empty table authorises everything with an empty hash; a loaded
    /// table without a match yields `None`.
    pub fn authorize(&self, channel: &str) -> Option<String> {
        if self.is_empty() {
            return Some(String::new());
        }
        self.hash_for(channel).map(str::to_string)
    }
}
