//! In-memory result store and the merge rule.
//!
//! The store maps trace id to a textual value. An empty value means the trace
//! was attempted but no metric is known yet. Merging never replaces a
//! non-empty value; it only inserts new keys or fills empty ones. The backing
//! `BTreeMap` keeps keys unique and sorted, so `render` is canonical and a
//! repeated merge of the same records renders byte-identical output.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::types::MetricRecord;

/// Whether `key` can be stored and read back unchanged.
///
/// Keys are split from values at the first `:` and trimmed on load, so a key
/// must be non-empty, contain no `:` or line break, and have no surrounding
/// whitespace.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains([':', '\n', '\r']) && key.trim() == key
}

/// A non-blank store line that is not `key: value`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: expected `<trace_id>: <value>`, found {content:?}")]
pub struct StoreParseError {
    /// 1-indexed line number.
    pub line: usize,
    pub content: String,
}

/// What a single merge did to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeEffect {
    /// Key was new and got inserted.
    Inserted,
    /// Key existed with an empty value and got the fresh value.
    Filled,
    /// Key holds a non-empty value that was retained.
    Kept,
    /// Key existed empty and the fresh value was empty too.
    Unchanged,
}

/// Per-pass merge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub filled: usize,
    pub kept: usize,
    pub unchanged: usize,
}

impl MergeSummary {
    fn record(&mut self, effect: MergeEffect) {
        match effect {
            MergeEffect::Inserted => self.inserted += 1,
            MergeEffect::Filled => self.filled += 1,
            MergeEffect::Kept => self.kept += 1,
            MergeEffect::Unchanged => self.unchanged += 1,
        }
    }

    /// Number of keys whose persisted line changes.
    pub fn changed(&self) -> usize {
        self.inserted + self.filled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultStore {
    entries: BTreeMap<String, String>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the persisted line format.
    ///
    /// Blank lines are skipped. Duplicate keys (from hand edits) are folded
    /// through the merge rule, so the first non-empty value wins.
    pub fn parse(contents: &str) -> Result<Self, StoreParseError> {
        let mut store = Self::new();
        for (index, raw) in contents.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = raw.split_once(':') else {
                return Err(StoreParseError {
                    line: index + 1,
                    content: raw.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(StoreParseError {
                    line: index + 1,
                    content: raw.to_string(),
                });
            }
            store.merge_value(key, value);
        }
        Ok(store)
    }

    /// Serialize as sorted `key: value` lines with a trailing newline.
    pub fn render(&self) -> String {
        let mut buf = String::new();
        for (key, value) in &self.entries {
            buf.push_str(key);
            buf.push_str(": ");
            buf.push_str(value);
            buf.push('\n');
        }
        buf
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// True when `key` holds a non-empty value that no merge can change.
    pub fn is_resolved(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Apply one fresh record.
    pub fn merge_record(&mut self, record: &MetricRecord) -> MergeEffect {
        self.merge_value(&record.key, record.value.as_deref().unwrap_or(""))
    }

    /// Apply a batch of fresh records in order.
    pub fn merge<'a, I>(&mut self, records: I) -> MergeSummary
    where
        I: IntoIterator<Item = &'a MetricRecord>,
    {
        let mut summary = MergeSummary::default();
        for record in records {
            summary.record(self.merge_record(record));
        }
        summary
    }

    fn merge_value(&mut self, key: &str, value: &str) -> MergeEffect {
        // Whitespace-only values count as empty.
        let fresh = value.trim();
        match self.entries.get_mut(key) {
            None => {
                self.entries.insert(key.to_string(), fresh.to_string());
                MergeEffect::Inserted
            }
            Some(existing) if !existing.is_empty() => MergeEffect::Kept,
            Some(existing) => {
                if fresh.is_empty() {
                    MergeEffect::Unchanged
                } else {
                    *existing = fresh.to_string();
                    MergeEffect::Filled
                }
            }
        }
    }
}
