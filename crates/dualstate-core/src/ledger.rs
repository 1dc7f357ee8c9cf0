//! The change ledger: one row per interface with a pending proposal.
//!
//! This is the only writable surface the simulator, gate and apply loop
//! share. Storage is delegated to a [`LedgerStore`]; the rules about which
//! rows are representable live here.

use crate::error::{LedgerError, UnrepresentableChangeError};
use crate::snapshot::GraphSnapshot;
use crate::store::LedgerStore;
use crate::types::{ChangeLedgerRow, FutureAction, GraphError, InterfaceKey, ValidationStatus};

pub struct ChangeLedger {
    store: Box<dyn LedgerStore + Send>,
}

impl ChangeLedger {
    pub fn new(store: Box<dyn LedgerStore + Send>) -> Self {
        Self { store }
    }

    /// Create or overwrite the row for `key`.
    ///
    /// Presence and current code are taken from `current`. A proposal that
    /// matches the stored row exactly leaves the row (including its
    /// validation status) untouched; anything else replaces it and resets
    /// the status to `Pending`.
    pub fn upsert_proposal(
        &mut self,
        current: &GraphSnapshot,
        key: &InterfaceKey,
        action: FutureAction,
        future_code: Option<String>,
    ) -> Result<ChangeLedgerRow, LedgerError> {
        let row = Self::proposed_row(current, key, action, future_code)?;

        if let Some(existing) = self.store.get_row(key)? {
            if !existing.applied && Self::same_proposal(&existing, &row) {
                tracing::debug!(key = %key, "identical proposal, ledger row unchanged");
                return Ok(existing);
            }
        }

        self.store.put_row(&row)?;
        tracing::debug!(key = %key, action = %action, "ledger row upserted");
        Ok(row)
    }

    fn proposed_row(
        current: &GraphSnapshot,
        key: &InterfaceKey,
        action: FutureAction,
        future_code: Option<String>,
    ) -> Result<ChangeLedgerRow, UnrepresentableChangeError> {
        let node = current.node(key);
        let current_present = node.is_some();
        match action {
            FutureAction::Create if current_present => {
                return Err(UnrepresentableChangeError::AlreadyPresent { key: key.clone() });
            }
            FutureAction::Edit | FutureAction::Delete if !current_present => {
                return Err(UnrepresentableChangeError::MissingKey {
                    key: key.clone(),
                    action,
                });
            }
            _ => {}
        }

        let future_present = match action {
            FutureAction::Create | FutureAction::Edit => true,
            FutureAction::Delete => false,
            FutureAction::None => current_present,
        };
        let future_code = match action {
            FutureAction::Delete => None,
            FutureAction::None => node.and_then(|n| n.code.clone()),
            FutureAction::Create | FutureAction::Edit => future_code,
        };

        Ok(ChangeLedgerRow {
            key: key.clone(),
            current_present,
            future_present,
            current_code: node.and_then(|n| n.code.clone()),
            future_code,
            future_action: action,
            validation_status: ValidationStatus::Pending,
            current_span: node.map(|n| n.span).filter(|s| s.start_line > 0),
            applied: false,
        })
    }

    fn same_proposal(a: &ChangeLedgerRow, b: &ChangeLedgerRow) -> bool {
        a.future_action == b.future_action
            && a.future_code == b.future_code
            && a.current_present == b.current_present
            && a.future_present == b.future_present
            && a.current_code == b.current_code
            && a.current_span == b.current_span
    }

    pub fn row(&self, key: &InterfaceKey) -> Result<Option<ChangeLedgerRow>, GraphError> {
        self.store.get_row(key)
    }

    pub fn rows(&self) -> Result<Vec<ChangeLedgerRow>, GraphError> {
        self.store.all_rows()
    }

    /// Rows that take part in blast radius, gating and apply.
    pub fn active_rows(&self) -> Result<Vec<ChangeLedgerRow>, GraphError> {
        Ok(self
            .store
            .all_rows()?
            .into_iter()
            .filter(|r| !r.future_action.is_inert() && !r.applied)
            .collect())
    }

    pub fn rows_pending_validation(&self) -> Result<Vec<ChangeLedgerRow>, GraphError> {
        Ok(self
            .store
            .all_rows()?
            .into_iter()
            .filter(|r| r.validation_status == ValidationStatus::Pending)
            .collect())
    }

    pub fn set_status(
        &mut self,
        key: &InterfaceKey,
        status: ValidationStatus,
    ) -> Result<bool, GraphError> {
        self.store.set_status(key, status)
    }

    /// Put every unapplied row back to `Pending`.
    pub fn reset_to_pending(&mut self) -> Result<usize, GraphError> {
        let mut reset = 0;
        for row in self.store.all_rows()? {
            if !row.applied && row.validation_status != ValidationStatus::Pending {
                self.store.set_status(&row.key, ValidationStatus::Pending)?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    pub fn mark_applied(&mut self, keys: &[InterfaceKey]) -> Result<(), GraphError> {
        self.store.mark_applied(keys)
    }

    /// Remove rows whose action has been applied. Returns how many went.
    pub fn clear_applied(&mut self) -> Result<usize, GraphError> {
        let removed = self.store.delete_applied()?;
        if removed > 0 {
            tracing::info!(removed, "cleared applied ledger rows");
        }
        Ok(removed)
    }

    /// Drop every row, applied or not.
    pub fn clear(&mut self) -> Result<(), GraphError> {
        self.store.delete_all()
    }
}
