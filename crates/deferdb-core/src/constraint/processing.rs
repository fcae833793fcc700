//! Row processing strategy for data-modifying statements.

/// How a statement applies its row changes.
///
/// This is independent of constraint mode: it only decides whether checks run
/// after each row or after the whole row set has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowProcessing {
    /// Write a row, then check it, one row at a time.
    Direct,
    /// Write every row first, then check them all.
    Batched,
}

/// Statement shapes that pick a processing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    InsertValues,
    InsertSelect,
    Update,
    Delete,
    Import,
    CascadeUpdate,
    CascadeDelete,
}

impl RowProcessing {
    /// Pick the strategy for a statement.
    ///
    /// Multi-row updates and updates of referenced keys are batched so that
    /// transient states between rows (`SET i = i + 1` over a unique column) are
    /// never observed by the checkers.
    pub fn select(kind: StatementKind, affected_rows: usize, touches_referenced_key: bool) -> Self {
        match kind {
            StatementKind::InsertValues => RowProcessing::Direct,
            StatementKind::InsertSelect | StatementKind::Import => RowProcessing::Batched,
            StatementKind::Update | StatementKind::CascadeUpdate => {
                if affected_rows > 1 || touches_referenced_key {
                    RowProcessing::Batched
                } else {
                    RowProcessing::Direct
                }
            }
            StatementKind::Delete | StatementKind::CascadeDelete => RowProcessing::Direct,
        }
    }
}
