//! Name to ordinal lookup shared by every cursor layer.
//!
//! A [`ColumnLookup`] is built once when a cursor is constructed so that
//! resolving a column by name is a hash lookup, never a scan per row. Exact
//! matches win over case-insensitive ones, and when a name repeats the first
//! declared ordinal is the one returned.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ColumnLookup {
    exact: HashMap<String, usize>,
    folded: HashMap<String, usize>,
}

impl ColumnLookup {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lookup = ColumnLookup::default();
        for (ordinal, name) in names.into_iter().enumerate() {
            let name = name.as_ref();
            lookup.exact.entry(name.to_string()).or_insert(ordinal);
            lookup.folded.entry(fold_name(name)).or_insert(ordinal);
        }
        lookup
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&fold_name(name)))
            .copied()
    }

    /// Case-insensitive lookup only.
    pub fn find_folded(&self, name: &str) -> Option<usize> {
        self.folded.get(&fold_name(name)).copied()
    }
}

/// Key used for case-insensitive column comparisons.
pub fn fold_name(name: &str) -> String {
    name.to_lowercase()
}
