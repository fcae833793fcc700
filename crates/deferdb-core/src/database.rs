//! Database wrapper combining StorageEngine and Catalog.

use parking_lot::{Mutex, MutexGuard};
use tracing::info;

use crate::catalog::{Catalog, SchemaBundle};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::session::Session;
use crate::storage::StorageEngine;

/// An open database.
pub struct Database {
    engine: StorageEngine,
    catalog: Catalog,
    config: EngineConfig,
    /// Serializes commits.
    commit_lock: Mutex<()>,
}

impl Database {
    /// Open a database with the given configuration.
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        let engine = StorageEngine::open(&config)?;
        let catalog = Catalog::open(engine.db())?;

        info!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = engine.was_recovered(),
            schema_version = catalog.version(),
            "database opened"
        );

        Ok(Self {
            engine,
            catalog,
            config,
            commit_lock: Mutex::new(()),
        })
    }

    /// Open a database that is removed when dropped.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(EngineConfig::temporary())
    }

    /// Start a session. Each session runs at most one transaction at a time.
    pub fn session(&self) -> Session<'_> {
        Session::new(self)
    }

    /// Get a reference to the storage engine.
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    /// Get a reference to the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the committed schema.
    pub fn schema(&self) -> SchemaBundle {
        self.catalog.schema()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.engine.flush()?;
        self.catalog.flush()
    }

    pub(crate) fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }
}
