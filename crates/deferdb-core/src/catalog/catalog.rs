//! Constraint registry: the published schema, persisted in sled.

use parking_lot::RwLock;
use sled::{Db, Tree};
use tracing::debug;

use super::SchemaBundle;
use crate::error::Error;

const REGISTRY_TREE: &str = "catalog:registry";

/// Key of the published bundle in the registry tree.
const PUBLISHED_KEY: &[u8] = b"published";

/// Registry of tables and constraints visible to new transactions.
///
/// Transactions work on a private copy of the published bundle and hand it
/// back through [`Catalog::publish`] when their DDL commits.
pub struct Catalog {
    /// Source of table, constraint and index handle ids.
    db: Db,
    tree: Tree,
    published: RwLock<SchemaBundle>,
}

impl Catalog {
    /// Open the registry stored in `db`, starting empty at version 0.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let tree = db.open_tree(REGISTRY_TREE)?;
        let published = match tree.get(PUBLISHED_KEY)? {
            Some(bytes) => SchemaBundle::from_bytes(&bytes)?,
            None => SchemaBundle::new(0),
        };

        Ok(Self {
            db: db.clone(),
            tree,
            published: RwLock::new(published),
        })
    }

    /// Version of the published bundle.
    pub fn version(&self) -> u64 {
        self.published.read().version
    }

    /// Copy of the published bundle.
    pub fn schema(&self) -> SchemaBundle {
        self.published.read().clone()
    }

    /// Whether nothing was published since `base_version`.
    pub fn is_current(&self, base_version: u64) -> bool {
        self.version() == base_version
    }

    /// Publish a transaction's working bundle.
    ///
    /// `base_version` is the version the transaction started from; if another
    /// bundle was published since, nothing is written.
    pub fn publish(&self, mut bundle: SchemaBundle, base_version: u64) -> Result<u64, Error> {
        let mut published = self.published.write();
        if published.version != base_version {
            return Err(Error::Transaction(format!(
                "schema version moved from {} to {}",
                base_version, published.version
            )));
        }

        bundle.version = base_version + 1;
        self.tree.insert(PUBLISHED_KEY, bundle.to_bytes()?)?;
        let version = bundle.version;
        *published = bundle;

        debug!(version, "schema published");
        Ok(version)
    }

    /// Allocate a fresh id for a table, constraint or index handle.
    ///
    /// Ids are strictly increasing for the lifetime of the database.
    pub fn allocate_id(&self) -> Result<u64, Error> {
        // sled ids start at 0; keep 0 free as a sentinel
        Ok(self.db.generate_id()? + 1)
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, TableDef};

    fn with_table() -> SchemaBundle {
        let mut schema = SchemaBundle::new(0);
        schema
            .add_table(TableDef {
                id: 1,
                schema: "APP".into(),
                name: "T".into(),
                columns: vec![ColumnDef {
                    name: "I".into(),
                    column_type: ColumnType::Integer,
                    nullable: true,
                }],
            })
            .unwrap();
        schema
    }

    #[test]
    fn test_publish_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let catalog = Catalog::open(&db).unwrap();
            assert_eq!(catalog.version(), 0);
            assert!(catalog.schema().tables.is_empty());

            assert_eq!(catalog.publish(with_table(), 0).unwrap(), 1);
            catalog.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let catalog = Catalog::open(&db).unwrap();
        assert_eq!(catalog.version(), 1);
        assert!(catalog.schema().table_by_name("t").is_some());
    }

    #[test]
    fn test_publish_from_stale_version_rejected() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let catalog = Catalog::open(&db).unwrap();
        catalog.publish(with_table(), 0).unwrap();
        assert!(!catalog.is_current(0));

        let err = catalog.publish(SchemaBundle::new(0), 0).unwrap_err();
        assert_eq!(err.sql_state(), "XJ001");
        assert_eq!(catalog.version(), 1);
        assert_eq!(catalog.schema().tables.len(), 1);
    }

    #[test]
    fn test_allocate_id_is_monotonic() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let catalog = Catalog::open(&db).unwrap();
        let a = catalog.allocate_id().unwrap();
        let b = catalog.allocate_id().unwrap();
        assert!(a > 0);
        assert!(b > a);
    }
}
