//! Archive index
//!
//! The directory of an archive's members, stored under the `"index"` key.
//! Rebuilding an index merges with the previous one: members that are not
//! being rewritten are prepended one at a time (so their previous order comes
//! out reversed), new members follow in sorted order, and ids are renumbered
//! densely from zero.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One archived member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Position in the index, dense and zero-based
    pub id: u64,

    /// Normalized member filename (the store key of its payload)
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Number of entries
    pub size: u64,

    pub entries: Vec<IndexEntry>,
}

impl Index {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index for `filenames`, merged over `previous`
    ///
    /// Entries of `previous` whose filename is not among `filenames` are kept
    /// ahead of the new entries. Each one is prepended in turn, so the kept
    /// block is in reverse of its previous order. Old ids are discarded.
    pub fn build<I, S>(filenames: I, previous: Option<&Index>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh: BTreeSet<String> = filenames.into_iter().map(Into::into).collect();

        let mut names: Vec<String> = Vec::with_capacity(fresh.len());
        if let Some(previous) = previous {
            let mut kept = BTreeSet::new();
            for entry in previous.entries.iter().rev() {
                if !fresh.contains(&entry.filename) && kept.insert(entry.filename.as_str()) {
                    names.push(entry.filename.clone());
                }
            }
        }
        names.extend(fresh);

        let entries: Vec<IndexEntry> = names
            .into_iter()
            .enumerate()
            .map(|(id, filename)| IndexEntry {
                id: id as u64,
                filename,
            })
            .collect();

        Index {
            size: entries.len() as u64,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Member filenames in index order
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.filename.as_str())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(index: &Index) -> Vec<&str> {
        index.filenames().collect()
    }

    #[test]
    fn test_build_sorts_and_numbers() {
        let index = Index::build(["c.js", "a.js", "b.js"], None);

        assert_eq!(index.size, 3);
        assert_eq!(names(&index), vec!["a.js", "b.js", "c.js"]);
        let ids: Vec<u64> = index.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_merge_keeps_previous_members_first() {
        let first = Index::build(["a.js"], None);
        let second = Index::build(["b.js"], Some(&first));

        assert_eq!(second.size, 2);
        assert_eq!(names(&second), vec!["a.js", "b.js"]);
        assert_eq!(second.entries[0].id, 0);
        assert_eq!(second.entries[1].id, 1);
    }

    #[test]
    fn test_merge_rewritten_member_moves_to_new_block() {
        let first = Index::build(["a.js", "b.js", "c.js"], None);
        let second = Index::build(["b.js", "d.js"], Some(&first));

        assert_eq!(names(&second), vec!["c.js", "a.js", "b.js", "d.js"]);
        assert_eq!(second.size, 4);
    }

    #[test]
    fn test_duplicate_filenames_collapse() {
        let index = Index::build(["a.js", "a.js"], None);
        assert_eq!(index.size, 1);
    }

    #[test]
    fn test_empty_index() {
        let index = Index::build(Vec::<String>::new(), None);
        assert!(index.is_empty());
        assert_eq!(index.size, 0);

        let decoded = Index::decode(&index.encode().unwrap()).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn test_empty_rebuild_preserves_previous() {
        let first = Index::build(["x.js", "y.js"], None);
        let second = Index::build(Vec::<String>::new(), Some(&first));
        assert_eq!(names(&second), vec!["y.js", "x.js"]);
    }

    #[test]
    fn test_encoding_uses_fixed_width_integers() {
        let index = Index::build(["a.js"], None);
        let bytes = index.encode().unwrap();

        // size, entry count, id and name length are 8 bytes each
        assert_eq!(bytes.len(), 8 * 4 + "a.js".len());
        assert_eq!(&bytes[..8], &1u64.to_le_bytes());
    }

    #[test]
    fn test_merge_prepends_kept_members_one_by_one() {
        let first = Index::build(["a.js", "b.js"], None);
        let second = Index::build(["c.js"], Some(&first));
        assert_eq!(names(&second), vec!["b.js", "a.js", "c.js"]);

        // Each rebuild flips the kept block again
        let third = Index::build(["d.js"], Some(&second));
        assert_eq!(names(&third), vec!["c.js", "a.js", "b.js", "d.js"]);
    }
}
