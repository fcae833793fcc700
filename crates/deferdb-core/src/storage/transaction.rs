//! Transaction overlay with statement savepoints and atomic commit.

use std::collections::BTreeMap;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use super::key::{
    index_entry, index_key_prefix, prefix_successor, row_key, split_index_entry, IndexKey, RowId,
};
use super::{Record, StorageEngine, EMPTY_VALUE};
use crate::catalog::{IndexHandle, TableId};
use crate::error::Error;
use crate::value::Value;

/// Hook run before a transaction's writes are applied.
///
/// Returning an error aborts the commit; the transaction is rolled back.
pub trait PreCommitHook {
    fn before_commit(&mut self, tx: &Transaction<'_>) -> Result<(), Error>;
}

/// Marker for statement-level rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

#[derive(Debug)]
enum Undo {
    Row {
        table: TableId,
        row: RowId,
        previous: Option<Option<Vec<Value>>>,
    },
    Index {
        entry: Vec<u8>,
        previous: Option<bool>,
    },
}

/// Uncommitted writes of one transaction, layered over committed state.
///
/// Reads merge the overlay with the engine, so the owning transaction sees its
/// own writes and nobody else does.
pub struct Transaction<'a> {
    engine: &'a StorageEngine,
    /// Row overlay; `None` marks a deleted row.
    rows: BTreeMap<(TableId, RowId), Option<Vec<Value>>>,
    /// Index overlay; `false` marks a removed entry.
    index: BTreeMap<Vec<u8>, bool>,
    undo: Vec<Undo>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(engine: &'a StorageEngine) -> Self {
        Self {
            engine,
            rows: BTreeMap::new(),
            index: BTreeMap::new(),
            undo: Vec::new(),
        }
    }

    /// The engine this transaction writes to.
    pub fn engine(&self) -> &'a StorageEngine {
        self.engine
    }

    /// Whether the transaction has written anything.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.index.is_empty()
    }

    /// Number of overlaid rows and index entries.
    pub fn write_count(&self) -> usize {
        self.rows.len() + self.index.len()
    }

    /// Read a row, seeing this transaction's writes.
    pub fn get_row(&self, table: TableId, row: RowId) -> Result<Option<Vec<Value>>, Error> {
        match self.rows.get(&(table, row)) {
            Some(cached) => Ok(cached.clone()),
            None => self.engine.get_row(table, row),
        }
    }

    /// All visible rows of a table in row id order.
    pub fn scan_table(&self, table: TableId) -> Result<Vec<(RowId, Vec<Value>)>, Error> {
        let mut merged: BTreeMap<RowId, Vec<Value>> =
            self.engine.scan_table(table)?.into_iter().collect();
        for ((_, row), values) in self.rows.range((table, RowId::MIN)..=(table, RowId::MAX)) {
            match values {
                Some(v) => merged.insert(*row, v.clone()),
                None => merged.remove(row),
            };
        }
        Ok(merged.into_iter().collect())
    }

    /// Insert or replace a row.
    pub fn put_row(&mut self, table: TableId, row: RowId, values: Vec<Value>) {
        let previous = self.rows.insert((table, row), Some(values));
        self.undo.push(Undo::Row {
            table,
            row,
            previous,
        });
    }

    /// Delete a row.
    pub fn delete_row(&mut self, table: TableId, row: RowId) {
        let previous = self.rows.insert((table, row), None);
        self.undo.push(Undo::Row {
            table,
            row,
            previous,
        });
    }

    /// Add an index entry for a row.
    pub fn insert_index_entry(&mut self, handle: IndexHandle, key: &IndexKey, row: RowId) {
        self.set_index_entry(index_entry(handle, key, row), true);
    }

    /// Remove a row's index entry.
    pub fn remove_index_entry(&mut self, handle: IndexHandle, key: &IndexKey, row: RowId) {
        self.set_index_entry(index_entry(handle, key, row), false);
    }

    fn set_index_entry(&mut self, entry: Vec<u8>, present: bool) {
        let previous = self.index.insert(entry.clone(), present);
        self.undo.push(Undo::Index { entry, previous });
    }

    /// Rows currently carrying `key` under `handle`.
    pub fn index_rows(&self, handle: IndexHandle, key: &IndexKey) -> Result<Vec<RowId>, Error> {
        let prefix = index_key_prefix(handle, key);
        let mut rows: BTreeMap<Vec<u8>, RowId> = BTreeMap::new();
        for row in self.engine.index_rows(handle, key)? {
            rows.insert(index_entry(handle, key, row), row);
        }
        for (entry, present) in self.overlay_range(&prefix) {
            if *present {
                let (_, row) = split_index_entry(entry)?;
                rows.insert(entry.clone(), row);
            } else {
                rows.remove(entry);
            }
        }
        Ok(rows.into_values().collect())
    }

    /// Whether any row carries `key` under `handle`.
    pub fn index_contains(&self, handle: IndexHandle, key: &IndexKey) -> Result<bool, Error> {
        Ok(!self.index_rows(handle, key)?.is_empty())
    }

    /// All visible entries under `handle`, in key order.
    pub fn scan_index(&self, handle: IndexHandle) -> Result<Vec<(IndexKey, RowId)>, Error> {
        let mut entries: BTreeMap<Vec<u8>, ()> = self
            .engine
            .index_entries(handle)?
            .into_iter()
            .map(|e| (e, ()))
            .collect();
        for (entry, present) in self.overlay_range(&handle.prefix()) {
            if *present {
                entries.insert(entry.clone(), ());
            } else {
                entries.remove(entry);
            }
        }
        entries
            .into_keys()
            .map(|e| split_index_entry(&e))
            .collect()
    }

    /// Remove every entry under `handle`.
    pub fn drop_index(&mut self, handle: IndexHandle) -> Result<usize, Error> {
        let entries = self.scan_index(handle)?;
        let count = entries.len();
        for (key, row) in entries {
            self.remove_index_entry(handle, &key, row);
        }
        Ok(count)
    }

    fn overlay_range<'s>(
        &'s self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = (&'s Vec<u8>, &'s bool)> + 's> {
        match prefix_successor(prefix) {
            Some(end) => Box::new(self.index.range(prefix.to_vec()..end)),
            None => Box::new(self.index.range(prefix.to_vec()..)),
        }
    }

    /// Mark the current position for statement-level rollback.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.undo.len())
    }

    /// Undo every write made after `savepoint`.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.undo.len() > savepoint.0 {
            match self.undo.pop() {
                Some(Undo::Row {
                    table,
                    row,
                    previous,
                }) => match previous {
                    Some(prev) => {
                        self.rows.insert((table, row), prev);
                    }
                    None => {
                        self.rows.remove(&(table, row));
                    }
                },
                Some(Undo::Index { entry, previous }) => match previous {
                    Some(prev) => {
                        self.index.insert(entry, prev);
                    }
                    None => {
                        self.index.remove(&entry);
                    }
                },
                None => break,
            }
        }
    }

    /// Run `hook`, then commit. A hook error rolls the transaction back.
    pub fn commit_with(self, hook: &mut dyn PreCommitHook) -> Result<(), Error> {
        if let Err(e) = hook.before_commit(&self) {
            self.rollback();
            return Err(e);
        }
        self.commit()
    }

    /// Commit the transaction atomically.
    ///
    /// All writes succeed or none do.
    pub fn commit(self) -> Result<(), Error> {
        if self.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(self.rows.len());
        for ((table, row), values) in &self.rows {
            let bytes = match values {
                Some(v) => Some(Record::new(v.clone()).to_bytes()?),
                None => None,
            };
            encoded.push((row_key(*table, *row), bytes));
        }

        let data_tree = self.engine.data_tree();
        let index_tree = self.engine.index_tree();

        let result: Result<(), TransactionError<Error>> =
            (data_tree, index_tree).transaction(|(data_tx, index_tx)| {
                for (key, bytes) in &encoded {
                    match bytes {
                        Some(b) => {
                            data_tx.insert(&key[..], b.clone())?;
                        }
                        None => {
                            data_tx.remove(&key[..])?;
                        }
                    }
                }
                for (entry, present) in &self.index {
                    if *present {
                        index_tx.insert(entry.clone(), EMPTY_VALUE)?;
                    } else {
                        index_tx.remove(entry.clone())?;
                    }
                }
                Ok::<(), ConflictableTransactionError<Error>>(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    /// Rollback the transaction (discard all pending writes).
    pub fn rollback(self) {
        drop(self);
    }
}

impl StorageEngine {
    /// Begin a new transaction.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn test_engine() -> StorageEngine {
        StorageEngine::open(&EngineConfig::temporary()).unwrap()
    }

    fn key(i: i64) -> IndexKey {
        IndexKey::encode(&[Value::Int(i)]).unwrap()
    }

    struct Reject;

    impl PreCommitHook for Reject {
        fn before_commit(&mut self, _tx: &Transaction<'_>) -> Result<(), Error> {
            Err(Error::Transaction("rejected".into()))
        }
    }

    struct Accept(usize);

    impl PreCommitHook for Accept {
        fn before_commit(&mut self, tx: &Transaction<'_>) -> Result<(), Error> {
            self.0 = tx.write_count();
            Ok(())
        }
    }

    #[test]
    fn test_transaction_commit() {
        let engine = test_engine();
        let mut tx = engine.transaction();
        tx.put_row(1, 10, vec![Value::Int(1)]);
        tx.insert_index_entry(IndexHandle(5), &key(1), 10);
        tx.commit().unwrap();

        assert_eq!(engine.get_row(1, 10).unwrap(), Some(vec![Value::Int(1)]));
        assert_eq!(engine.index_rows(IndexHandle(5), &key(1)).unwrap(), vec![10]);
    }

    #[test]
    fn test_transaction_rollback() {
        let engine = test_engine();
        let mut tx = engine.transaction();
        tx.put_row(1, 10, vec![Value::Int(1)]);
        tx.rollback();
        assert!(engine.get_row(1, 10).unwrap().is_none());
    }

    #[test]
    fn test_reads_see_own_writes() {
        let engine = test_engine();
        let mut tx = engine.transaction();
        tx.put_row(1, 1, vec![Value::Int(1)]);
        tx.insert_index_entry(IndexHandle(5), &key(1), 1);
        tx.commit().unwrap();

        let mut tx = engine.transaction();
        tx.put_row(1, 2, vec![Value::Int(1)]);
        tx.insert_index_entry(IndexHandle(5), &key(1), 2);
        tx.delete_row(1, 1);
        tx.remove_index_entry(IndexHandle(5), &key(1), 1);

        assert_eq!(tx.index_rows(IndexHandle(5), &key(1)).unwrap(), vec![2]);
        assert!(tx.get_row(1, 1).unwrap().is_none());
        assert_eq!(tx.scan_table(1).unwrap().len(), 1);
        // committed state is untouched
        assert_eq!(engine.index_rows(IndexHandle(5), &key(1)).unwrap(), vec![1]);
    }

    #[test]
    fn test_scan_index_merges_in_key_order() {
        let engine = test_engine();
        let mut tx = engine.transaction();
        tx.insert_index_entry(IndexHandle(5), &key(3), 1);
        tx.insert_index_entry(IndexHandle(5), &key(1), 2);
        tx.commit().unwrap();

        let mut tx = engine.transaction();
        tx.insert_index_entry(IndexHandle(5), &key(2), 3);
        tx.insert_index_entry(IndexHandle(6), &key(0), 4);
        tx.remove_index_entry(IndexHandle(5), &key(3), 1);

        let entries = tx.scan_index(IndexHandle(5)).unwrap();
        assert_eq!(entries, vec![(key(1), 2), (key(2), 3)]);
    }

    #[test]
    fn test_savepoint_rollback() {
        let engine = test_engine();
        let mut tx = engine.transaction();
        tx.put_row(1, 1, vec![Value::Int(1)]);
        let sp = tx.savepoint();
        tx.put_row(1, 1, vec![Value::Int(2)]);
        tx.put_row(1, 2, vec![Value::Int(3)]);
        tx.insert_index_entry(IndexHandle(5), &key(3), 2);
        tx.rollback_to(sp);

        assert_eq!(tx.get_row(1, 1).unwrap(), Some(vec![Value::Int(1)]));
        assert!(tx.get_row(1, 2).unwrap().is_none());
        assert!(!tx.index_contains(IndexHandle(5), &key(3)).unwrap());
    }

    #[test]
    fn test_drop_index() {
        let engine = test_engine();
        let mut tx = engine.transaction();
        tx.insert_index_entry(IndexHandle(5), &key(1), 1);
        tx.insert_index_entry(IndexHandle(5), &key(2), 2);
        assert_eq!(tx.drop_index(IndexHandle(5)).unwrap(), 2);
        assert!(tx.scan_index(IndexHandle(5)).unwrap().is_empty());
    }

    #[test]
    fn test_pre_commit_hook() {
        let engine = test_engine();
        let mut tx = engine.transaction();
        tx.put_row(1, 1, vec![Value::Int(1)]);
        assert!(tx.commit_with(&mut Reject).is_err());
        assert!(engine.get_row(1, 1).unwrap().is_none());

        let mut tx = engine.transaction();
        tx.put_row(1, 1, vec![Value::Int(1)]);
        let mut hook = Accept(0);
        tx.commit_with(&mut hook).unwrap();
        assert_eq!(hook.0, 1);
        assert!(engine.get_row(1, 1).unwrap().is_some());
    }

    #[test]
    fn test_empty_transaction() {
        let engine = test_engine();
        engine.transaction().commit().unwrap();
    }
}
