//! Keys a transaction's statements checked.
//!
//! Statement checks see committed state plus the transaction's own writes,
//! and other sessions may commit before this transaction does. Every checked
//! key is examined again under the commit lock.

use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::ConstraintId;
use crate::storage::IndexKey;

/// Checked keys, per constraint.
///
/// Key constraints hold the keys written under them. Foreign keys hold the
/// child keys written and the referenced keys removed under them.
#[derive(Debug, Default)]
pub struct WriteSet {
    keys: BTreeMap<ConstraintId, BTreeSet<IndexKey>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, constraint: ConstraintId, key: &IndexKey) {
        let keys = self.keys.entry(constraint).or_default();
        if !keys.contains(key) {
            keys.insert(key.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Total number of recorded keys.
    pub fn len(&self) -> usize {
        self.keys.values().map(BTreeSet::len).sum()
    }

    /// Constraints in ascending id order, each with its keys in key order.
    pub fn iter(&self) -> impl Iterator<Item = (ConstraintId, &BTreeSet<IndexKey>)> {
        self.keys.iter().map(|(id, keys)| (*id, keys))
    }

    pub fn forget(&mut self, constraint: ConstraintId) {
        self.keys.remove(&constraint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn key(i: i64) -> IndexKey {
        IndexKey::encode(&[Value::Int(i)]).unwrap()
    }

    #[test]
    fn test_record_deduplicates_keys() {
        let mut set = WriteSet::new();
        assert!(set.is_empty());

        set.record(2, &key(1));
        set.record(2, &key(1));
        set.record(1, &key(3));
        assert_eq!(set.len(), 2);

        let ids: Vec<ConstraintId> = set.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_forget_drops_constraint_keys() {
        let mut set = WriteSet::new();
        set.record(4, &key(1));
        set.record(5, &key(1));
        set.forget(4);
        assert_eq!(set.len(), 1);
        assert!(set.iter().all(|(id, _)| id == 5));
    }
}
