// Change ledger: idempotent upserts and last-write-wins.
use dualstate_core::error::LedgerError;
use dualstate_core::types::{FutureAction, ValidationStatus};

use super::common::{create_project, ingest_project, key, new_ledger};

const LIB: &str = "fn a() { b(); }\nfn b() {}\n";

#[test]
fn test_identical_upsert_leaves_ledger_unchanged() {
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    let current = ingest_project(&root).current();
    let mut ledger = new_ledger();
    let b = key("src/lib.rs", "b");

    ledger
        .upsert_proposal(&current, &b, FutureAction::Edit, Some("fn b() { 1; }".into()))
        .unwrap();
    ledger.set_status(&b, ValidationStatus::Passed).unwrap();
    let before = ledger.rows().unwrap();

    ledger
        .upsert_proposal(&current, &b, FutureAction::Edit, Some("fn b() { 1; }".into()))
        .unwrap();
    assert_eq!(ledger.rows().unwrap(), before);
    assert_eq!(before[0].validation_status, ValidationStatus::Passed);
    assert_eq!(before[0].current_code.as_deref(), Some("fn b() {}"));
}

#[test]
fn test_changed_upsert_replaces_row_and_resets_status() {
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    let current = ingest_project(&root).current();
    let mut ledger = new_ledger();
    let b = key("src/lib.rs", "b");

    ledger
        .upsert_proposal(&current, &b, FutureAction::Edit, Some("fn b() { 1; }".into()))
        .unwrap();
    ledger.set_status(&b, ValidationStatus::Failed).unwrap();
    ledger.upsert_proposal(&current, &b, FutureAction::Delete, None).unwrap();

    let rows = ledger.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].future_action, FutureAction::Delete);
    assert!(!rows[0].future_present);
    assert_eq!(rows[0].validation_status, ValidationStatus::Pending);
}

#[test]
fn test_edit_of_missing_key_is_rejected_without_writes() {
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    let current = ingest_project(&root).current();
    let mut ledger = new_ledger();

    let err = ledger
        .upsert_proposal(&current, &key("src/lib.rs", "ghost"), FutureAction::Edit, Some("fn ghost() {}".into()))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unrepresentable(_)));
    assert!(ledger.rows().unwrap().is_empty());
}

#[test]
fn test_applied_rows_are_cleared() {
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    let current = ingest_project(&root).current();
    let mut ledger = new_ledger();
    let a = key("src/lib.rs", "a");
    let b = key("src/lib.rs", "b");
    ledger.upsert_proposal(&current, &a, FutureAction::Edit, Some("fn a() {}".into())).unwrap();
    ledger.upsert_proposal(&current, &b, FutureAction::None, None).unwrap();

    assert_eq!(ledger.active_rows().unwrap().len(), 1);
    ledger.mark_applied(&[a.clone()]).unwrap();
    assert!(ledger.active_rows().unwrap().is_empty());
    assert_eq!(ledger.clear_applied().unwrap(), 1);
    assert_eq!(ledger.rows().unwrap().len(), 1);
    assert!(ledger.row(&a).unwrap().is_none());
}
