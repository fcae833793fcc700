//! Storage engine implementation.

use sled::{Db, Tree};

use super::key::{
    index_key_prefix, row_key, split_index_entry, split_row_key, IndexKey, RowId, ID_SIZE,
};
use super::Record;
use crate::catalog::{IndexHandle, TableId};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::value::Value;

/// Tree name for row data.
const DATA_TREE: &str = "data";

/// Tree name for constraint index entries.
const INDEX_TREE: &str = "index:constraint";

/// The storage engine wrapping sled. Holds committed state only; uncommitted
/// writes live in a [`super::Transaction`] overlay.
pub struct StorageEngine {
    /// The underlying sled database.
    db: Db,

    /// Tree for rows (table_id + row_id -> record).
    data_tree: Tree,

    /// Tree for index entries (handle + key + row_id -> empty).
    index_tree: Tree,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: &EngineConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let data_tree = db.open_tree(DATA_TREE)?;
        let index_tree = db.open_tree(INDEX_TREE)?;

        Ok(Self {
            db,
            data_tree,
            index_tree,
        })
    }

    /// The underlying sled database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Check if the database was recovered from a previous run.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Allocate a new row id.
    pub fn generate_row_id(&self) -> Result<RowId, Error> {
        Ok(self.db.generate_id()?)
    }

    /// Read a committed row.
    pub fn get_row(&self, table: TableId, row: RowId) -> Result<Option<Vec<Value>>, Error> {
        match self.data_tree.get(row_key(table, row))? {
            Some(bytes) => Ok(Some(Record::from_bytes(&bytes)?.values)),
            None => Ok(None),
        }
    }

    /// All committed rows of a table in row id order.
    pub fn scan_table(&self, table: TableId) -> Result<Vec<(RowId, Vec<Value>)>, Error> {
        let mut rows = Vec::new();
        for item in self.data_tree.scan_prefix(table.to_be_bytes()) {
            let (key, bytes) = item?;
            rows.push((split_row_key(&key)?, Record::from_bytes(&bytes)?.values));
        }
        Ok(rows)
    }

    /// Committed index entries for one key value.
    pub fn index_rows(&self, handle: IndexHandle, key: &IndexKey) -> Result<Vec<RowId>, Error> {
        let prefix = index_key_prefix(handle, key);
        let mut rows = Vec::new();
        for item in self.index_tree.scan_prefix(&prefix) {
            let (entry, _) = item?;
            let (_, row) = split_index_entry(&entry)?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Raw committed entries under a handle, in key order.
    pub(crate) fn index_entries(&self, handle: IndexHandle) -> Result<Vec<Vec<u8>>, Error> {
        let mut entries = Vec::new();
        for item in self.index_tree.scan_prefix(handle.prefix()) {
            let (entry, _) = item?;
            if entry.len() >= ID_SIZE * 2 {
                entries.push(entry.to_vec());
            }
        }
        Ok(entries)
    }

    pub(crate) fn data_tree(&self) -> &Tree {
        &self.data_tree
    }

    pub(crate) fn index_tree(&self) -> &Tree {
        &self.index_tree
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key::index_entry;
    use crate::storage::EMPTY_VALUE;

    fn test_engine() -> StorageEngine {
        StorageEngine::open(&EngineConfig::temporary()).unwrap()
    }

    #[test]
    fn test_scan_table_is_scoped() {
        let engine = test_engine();
        let rec = Record::new(vec![Value::Int(1)]).to_bytes().unwrap();
        engine.data_tree().insert(row_key(1, 10), rec.clone()).unwrap();
        engine.data_tree().insert(row_key(1, 11), rec.clone()).unwrap();
        engine.data_tree().insert(row_key(2, 12), rec).unwrap();

        let rows = engine.scan_table(1).unwrap();
        assert_eq!(rows.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(engine.get_row(2, 12).unwrap(), Some(vec![Value::Int(1)]));
        assert_eq!(engine.get_row(2, 10).unwrap(), None);
    }

    #[test]
    fn test_index_rows_by_key() {
        let engine = test_engine();
        let k1 = IndexKey::encode(&[Value::Int(1)]).unwrap();
        let k2 = IndexKey::encode(&[Value::Int(2)]).unwrap();
        engine.index_tree().insert(index_entry(IndexHandle(1), &k1, 5), EMPTY_VALUE).unwrap();
        engine.index_tree().insert(index_entry(IndexHandle(1), &k1, 6), EMPTY_VALUE).unwrap();
        engine.index_tree().insert(index_entry(IndexHandle(1), &k2, 7), EMPTY_VALUE).unwrap();
        engine.index_tree().insert(index_entry(IndexHandle(2), &k1, 8), EMPTY_VALUE).unwrap();

        assert_eq!(engine.index_rows(IndexHandle(1), &k1).unwrap(), vec![5, 6]);
        assert_eq!(engine.index_rows(IndexHandle(2), &k1).unwrap(), vec![8]);
        assert_eq!(engine.index_entries(IndexHandle(1)).unwrap().len(), 3);
    }

    #[test]
    fn test_row_ids_increase() {
        let engine = test_engine();
        let a = engine.generate_row_id().unwrap();
        let b = engine.generate_row_id().unwrap();
        assert!(b > a);
    }
}
