//! Deferred constraint ledger.
//!
//! Records, per constraint, that deferred work exists and which keys to
//! re-examine. Only hints are kept here: whether a constraint is actually
//! violated is always decided against the indexes and table data at
//! validation time.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::catalog::ConstraintId;
use crate::error::Error;
use crate::storage::IndexKey;

/// Statement kind that produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeferredOperation {
    Insert,
    Update,
    Delete,
    AddConstraint,
    Import,
}

/// One unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredEntry {
    pub constraint: ConstraintId,
    /// Key to re-examine; `None` requests a full scan of the constraint.
    pub key: Option<IndexKey>,
    pub operation: DeferredOperation,
}

impl DeferredEntry {
    pub fn key(constraint: ConstraintId, key: IndexKey, operation: DeferredOperation) -> Self {
        Self {
            constraint,
            key: Some(key),
            operation,
        }
    }

    pub fn full_scan(constraint: ConstraintId, operation: DeferredOperation) -> Self {
        Self {
            constraint,
            key: None,
            operation,
        }
    }
}

/// Position in the ledger journal, for statement rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerMark(usize);

#[derive(Debug, Default)]
struct Slot {
    hints: BTreeSet<IndexKey>,
    full_scan: bool,
    operations: BTreeSet<DeferredOperation>,
}

#[derive(Debug)]
enum Journal {
    Slot(ConstraintId),
    Hint(ConstraintId, IndexKey),
    FullScan(ConstraintId),
    Operation(ConstraintId, DeferredOperation),
}

/// Hints moved out of memory once the ledger grows past its threshold.
struct Spill {
    // keeps the temporary database alive
    _db: sled::Db,
    tree: sled::Tree,
}

impl Spill {
    fn open() -> Result<Self, Error> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree("ledger:hints")?;
        Ok(Self { _db: db, tree })
    }

    fn entry(constraint: ConstraintId, key: &IndexKey) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + key.as_bytes().len());
        buf.extend_from_slice(&constraint.to_be_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf
    }
}

/// Per-transaction record of constraints with deferred work.
pub struct DeferredLedger {
    slots: BTreeMap<ConstraintId, Slot>,
    journal: Vec<Journal>,
    spill_threshold: usize,
    in_memory: usize,
    spill: Option<Spill>,
}

impl DeferredLedger {
    /// Create an empty ledger that spills hints after `spill_threshold` keys.
    pub fn new(spill_threshold: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            journal: Vec::new(),
            spill_threshold,
            in_memory: 0,
            spill: None,
        }
    }

    /// Record deferred work. Returns whether anything new was recorded.
    pub fn record(&mut self, entry: DeferredEntry) -> Result<bool, Error> {
        let id = entry.constraint;
        let mut changed = false;

        if !self.slots.contains_key(&id) {
            self.slots.insert(id, Slot::default());
            self.journal.push(Journal::Slot(id));
            changed = true;
        }

        match entry.key {
            Some(key) => {
                if self.insert_hint(id, key)? {
                    changed = true;
                }
            }
            None => {
                if let Some(slot) = self.slots.get_mut(&id) {
                    if !slot.full_scan {
                        slot.full_scan = true;
                        self.journal.push(Journal::FullScan(id));
                        changed = true;
                    }
                }
            }
        }

        if let Some(slot) = self.slots.get_mut(&id) {
            if slot.operations.insert(entry.operation) {
                self.journal.push(Journal::Operation(id, entry.operation));
                changed = true;
            }
        }

        if self.in_memory > self.spill_threshold {
            self.spill_hints()?;
        }
        Ok(changed)
    }

    fn insert_hint(&mut self, id: ConstraintId, key: IndexKey) -> Result<bool, Error> {
        if let Some(spill) = &self.spill {
            if spill.tree.contains_key(Spill::entry(id, &key))? {
                return Ok(false);
            }
        }
        let Some(slot) = self.slots.get_mut(&id) else {
            return Ok(false);
        };
        if slot.hints.insert(key.clone()) {
            self.in_memory += 1;
            self.journal.push(Journal::Hint(id, key));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn spill_hints(&mut self) -> Result<(), Error> {
        if self.spill.is_none() {
            self.spill = Some(Spill::open()?);
        }
        let Some(spill) = &self.spill else {
            return Ok(());
        };

        let mut moved = 0usize;
        for (id, slot) in &mut self.slots {
            for key in std::mem::take(&mut slot.hints) {
                spill.tree.insert(Spill::entry(*id, &key), crate::storage::EMPTY_VALUE)?;
                moved += 1;
            }
        }
        self.in_memory = 0;
        debug!(moved, threshold = self.spill_threshold, "deferred ledger spilled");
        Ok(())
    }

    /// Whether the ledger holds work for a constraint.
    pub fn has_entries(&self, constraint: ConstraintId) -> bool {
        self.slots.contains_key(&constraint)
    }

    /// Constraints with deferred work, in ascending id order.
    pub fn constraints(&self) -> Vec<ConstraintId> {
        self.slots.keys().copied().collect()
    }

    /// Whether a constraint must be re-examined in full.
    pub fn needs_full_scan(&self, constraint: ConstraintId) -> bool {
        self.slots
            .get(&constraint)
            .map(|s| s.full_scan)
            .unwrap_or(false)
    }

    /// Recorded keys for a constraint, in key order.
    pub fn hints(&self, constraint: ConstraintId) -> Result<Vec<IndexKey>, Error> {
        let mut keys: BTreeSet<IndexKey> = self
            .slots
            .get(&constraint)
            .map(|s| s.hints.clone())
            .unwrap_or_default();
        if let Some(spill) = &self.spill {
            for item in spill.tree.scan_prefix(constraint.to_be_bytes()) {
                let (entry, _) = item?;
                keys.insert(IndexKey::from_encoded(entry[8..].to_vec()));
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Statement kinds that produced work for a constraint.
    pub fn operations(&self, constraint: ConstraintId) -> Vec<DeferredOperation> {
        self.slots
            .get(&constraint)
            .map(|s| s.operations.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop all work recorded for a constraint.
    pub fn clear(&mut self, constraint: ConstraintId) -> Result<(), Error> {
        if let Some(slot) = self.slots.remove(&constraint) {
            self.in_memory = self.in_memory.saturating_sub(slot.hints.len());
        }
        if let Some(spill) = &self.spill {
            let spilled: Vec<sled::IVec> = spill
                .tree
                .scan_prefix(constraint.to_be_bytes())
                .keys()
                .collect::<Result<_, _>>()?;
            for entry in spilled {
                spill.tree.remove(entry)?;
            }
        }
        Ok(())
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether hints have moved out of memory.
    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// Total number of recorded keys.
    pub fn hint_count(&self) -> usize {
        let spilled = self.spill.as_ref().map(|s| s.tree.len()).unwrap_or(0);
        self.in_memory + spilled
    }

    /// Mark the current position for statement rollback.
    pub fn mark(&self) -> LedgerMark {
        LedgerMark(self.journal.len())
    }

    /// Undo everything recorded after `mark`.
    pub fn rollback_to(&mut self, mark: LedgerMark) -> Result<(), Error> {
        while self.journal.len() > mark.0 {
            let Some(step) = self.journal.pop() else {
                break;
            };
            match step {
                Journal::Slot(id) => {
                    self.slots.remove(&id);
                }
                Journal::Hint(id, key) => {
                    let in_slot = self
                        .slots
                        .get_mut(&id)
                        .map(|s| s.hints.remove(&key))
                        .unwrap_or(false);
                    if in_slot {
                        self.in_memory = self.in_memory.saturating_sub(1);
                    } else if let Some(spill) = &self.spill {
                        spill.tree.remove(Spill::entry(id, &key))?;
                    }
                }
                Journal::FullScan(id) => {
                    if let Some(slot) = self.slots.get_mut(&id) {
                        slot.full_scan = false;
                    }
                }
                Journal::Operation(id, op) => {
                    if let Some(slot) = self.slots.get_mut(&id) {
                        slot.operations.remove(&op);
                    }
                }
            }
        }
        Ok(())
    }

    /// Forget journal entries once a statement has succeeded.
    pub fn release(&mut self) {
        self.journal.clear();
    }
}

impl std::fmt::Debug for DeferredLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredLedger")
            .field("constraints", &self.constraints())
            .field("in_memory", &self.in_memory)
            .field("spilled", &self.spill.is_some())
            .finish()
    }
}
