// 🗃️ Record Store - storage contract required by the engine
//
// Keyed persistence for DecisionRecord, LearningRule and AuditLogEntry.
// Point lookups must not scan. A transition (status check + patch merge +
// audit entry) is one atomic step, and so is clearing all decisions
// together with its bulk audit entry.
//
// Two implementations:
// - MemoryStore (this file): HashMap-backed, used by tests and dry runs
// - SqliteStore (db.rs): rusqlite + WAL, used by the CLI

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::audit::{AuditAction, AuditLogEntry};
use crate::error::{EngineError, EngineResult};
use crate::learning::LearningRule;
use crate::records::{DecisionFilter, DecisionPatch, DecisionRecord, DecisionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same fingerprint already exists
    Duplicate,
}

/// One committed transition: both images and the audit entry written with it
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub before: DecisionRecord,
    pub after: DecisionRecord,
    pub entry: AuditLogEntry,
}

/// Check the expected status against the current image and build the
/// after image plus its audit entry. Stores call this while holding their
/// write lock or transaction.
pub fn prepare_transition(
    current: &DecisionRecord,
    expected: Option<DecisionStatus>,
    patch: &DecisionPatch,
    action: AuditAction,
    actor: &str,
) -> EngineResult<Transition> {
    if let Some(expected) = expected {
        if current.status != expected {
            return Err(EngineError::InvalidTransition {
                action: action.as_str().to_string(),
                status: current.status.as_str().to_string(),
            });
        }
    }
    let after = current.apply(patch);
    let entry = AuditLogEntry::new(&current.id, action, current.snapshot()?, after.snapshot()?, actor);
    Ok(Transition {
        before: current.clone(),
        after,
        entry,
    })
}

pub trait RecordStore: Send + Sync {
    // Decision records
    fn insert_decision(&self, record: &DecisionRecord) -> EngineResult<InsertOutcome>;
    fn get_decision(&self, id: &str) -> EngineResult<Option<DecisionRecord>>;
    fn list_decisions(&self, filter: &DecisionFilter) -> EngineResult<Vec<DecisionRecord>>;
    fn find_by_fingerprint(&self, fingerprint: &str) -> EngineResult<Option<DecisionRecord>>;
    /// Re-read the record, require `expected` status (None = any), merge the
    /// patch and append its audit entry, all or nothing
    fn transition(
        &self,
        id: &str,
        expected: Option<DecisionStatus>,
        patch: &DecisionPatch,
        action: AuditAction,
        actor: &str,
    ) -> EngineResult<Transition>;
    /// Remove every decision record and append the bulk audit entry in one
    /// atomic step; returns how many records were removed
    fn clear_decisions(&self, entry: &AuditLogEntry) -> EngineResult<usize>;
    fn count_decisions(&self) -> EngineResult<usize>;
    fn fingerprint_exists(&self, fingerprint: &str) -> EngineResult<bool>;

    // Audit trail (append-only)
    fn append_audit_entry(&self, entry: &AuditLogEntry) -> EngineResult<()>;
    fn audit_entries(&self, decision_record_id: &str) -> EngineResult<Vec<AuditLogEntry>>;

    // Learning rules
    fn find_rule(&self, token_key: &str, category_label: &str) -> EngineResult<Option<LearningRule>>;
    /// Insert or replace by rule id
    fn save_rule(&self, rule: &LearningRule) -> EngineResult<()>;
    fn list_rules(&self) -> EngineResult<Vec<LearningRule>>;
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Default)]
struct MemoryState {
    decisions: HashMap<String, DecisionRecord>,
    /// Insertion order, so scans are stable
    order: Vec<String>,
    fingerprints: HashMap<String, String>,
    audit: Vec<AuditLogEntry>,
    rules: HashMap<String, LearningRule>,
}

/// In-memory RecordStore (HashMap lookups, no scans for point reads)
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| EngineError::persistence("memory store lock poisoned"))
    }
}

impl RecordStore for MemoryStore {
    fn insert_decision(&self, record: &DecisionRecord) -> EngineResult<InsertOutcome> {
        let mut state = self.lock()?;
        if state.fingerprints.contains_key(&record.fingerprint) {
            return Ok(InsertOutcome::Duplicate);
        }
        if state.decisions.contains_key(&record.id) {
            return Err(EngineError::persistence(format!(
                "decision record id already exists: {}",
                record.id
            )));
        }
        state
            .fingerprints
            .insert(record.fingerprint.clone(), record.id.clone());
        state.order.push(record.id.clone());
        state.decisions.insert(record.id.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn get_decision(&self, id: &str) -> EngineResult<Option<DecisionRecord>> {
        Ok(self.lock()?.decisions.get(id).cloned())
    }

    fn list_decisions(&self, filter: &DecisionFilter) -> EngineResult<Vec<DecisionRecord>> {
        let state = self.lock()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.decisions.get(id))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> EngineResult<Option<DecisionRecord>> {
        let state = self.lock()?;
        Ok(state
            .fingerprints
            .get(fingerprint)
            .and_then(|id| state.decisions.get(id))
            .cloned())
    }

    fn transition(
        &self,
        id: &str,
        expected: Option<DecisionStatus>,
        patch: &DecisionPatch,
        action: AuditAction,
        actor: &str,
    ) -> EngineResult<Transition> {
        let mut state = self.lock()?;
        let current = state
            .decisions
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let transition = prepare_transition(current, expected, patch, action, actor)?;
        state.decisions.insert(id.to_string(), transition.after.clone());
        state.audit.push(transition.entry.clone());
        Ok(transition)
    }

    fn clear_decisions(&self, entry: &AuditLogEntry) -> EngineResult<usize> {
        let mut state = self.lock()?;
        let removed = state.decisions.len();
        state.decisions.clear();
        state.order.clear();
        state.fingerprints.clear();
        state.audit.push(entry.clone());
        Ok(removed)
    }

    fn count_decisions(&self) -> EngineResult<usize> {
        Ok(self.lock()?.decisions.len())
    }

    fn fingerprint_exists(&self, fingerprint: &str) -> EngineResult<bool> {
        Ok(self.lock()?.fingerprints.contains_key(fingerprint))
    }

    fn append_audit_entry(&self, entry: &AuditLogEntry) -> EngineResult<()> {
        self.lock()?.audit.push(entry.clone());
        Ok(())
    }

    fn audit_entries(&self, decision_record_id: &str) -> EngineResult<Vec<AuditLogEntry>> {
        Ok(self
            .lock()?
            .audit
            .iter()
            .filter(|e| e.decision_record_id == decision_record_id)
            .cloned()
            .collect())
    }

    fn find_rule(&self, token_key: &str, category_label: &str) -> EngineResult<Option<LearningRule>> {
        Ok(self
            .lock()?
            .rules
            .values()
            .find(|r| r.token_key() == token_key && r.category_label == category_label)
            .cloned())
    }

    fn save_rule(&self, rule: &LearningRule) -> EngineResult<()> {
        self.lock()?.rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    fn list_rules(&self) -> EngineResult<Vec<LearningRule>> {
        let mut rules: Vec<LearningRule> = self.lock()?.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rules)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ClassificationResult, SourceType, UnclassifiedRecord};
    use chrono::NaiveDate;

    fn decision(description: &str, amount: f64) -> DecisionRecord {
        let record = UnclassifiedRecord::new(
            description,
            SourceType::Transaction,
            description,
            amount,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        );
        let result = ClassificationResult::from_record(&record, "Software", 0.85, "test");
        DecisionRecord::from_result(&result)
    }

    #[test]
    fn test_insert_and_lookup() {
        let store = MemoryStore::new();
        let rec = decision("ACME CLOUD", -50.0);

        assert_eq!(store.insert_decision(&rec).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.get_decision(&rec.id).unwrap(), Some(rec.clone()));
        assert!(store.fingerprint_exists(&rec.fingerprint).unwrap());
        assert_eq!(store.get_decision("missing").unwrap(), None);
    }

    #[test]
    fn test_duplicate_fingerprint_skipped() {
        let store = MemoryStore::new();
        let first = decision("ACME CLOUD", -50.0);
        let second = decision("ACME CLOUD", -50.0);
        assert_ne!(first.id, second.id);

        assert_eq!(store.insert_decision(&first).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_decision(&second).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.count_decisions().unwrap(), 1);
    }

    #[test]
    fn test_transition_and_filtered_scan() {
        let store = MemoryStore::new();
        let a = decision("ACME CLOUD", -50.0);
        let b = decision("OFFICE RENT", -900.0);
        store.insert_decision(&a).unwrap();
        store.insert_decision(&b).unwrap();

        let patch = DecisionPatch {
            status: Some(DecisionStatus::Approved),
            ..Default::default()
        };
        let t = store
            .transition(&a.id, Some(DecisionStatus::Pending), &patch, AuditAction::Approve, "tester")
            .unwrap();
        assert_eq!(t.before, a);
        assert_eq!(t.after.status, DecisionStatus::Approved);
        assert_eq!(t.entry.before_snapshot["status"], "pending");
        assert_eq!(t.entry.after_snapshot["status"], "approved");
        assert_eq!(store.audit_entries(&a.id).unwrap(), vec![t.entry.clone()]);

        let pending = store
            .list_decisions(&DecisionFilter::by_status(DecisionStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let err = store
            .transition("missing", None, &patch, AuditAction::Approve, "tester")
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_transition_checks_status_inside_the_write() {
        let store = MemoryStore::new();
        let a = decision("ACME CLOUD", -50.0);
        store.insert_decision(&a).unwrap();

        let patch = DecisionPatch {
            status: Some(DecisionStatus::Rejected),
            ..Default::default()
        };
        store
            .transition(&a.id, Some(DecisionStatus::Pending), &patch, AuditAction::Reject, "tester")
            .unwrap();
        let err = store
            .transition(&a.id, Some(DecisionStatus::Pending), &patch, AuditAction::Reject, "tester")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(store.audit_entries(&a.id).unwrap().len(), 1);
    }

    #[test]
    fn test_find_by_fingerprint() {
        let store = MemoryStore::new();
        let a = decision("ACME CLOUD", -50.0);
        store.insert_decision(&a).unwrap();

        assert_eq!(store.find_by_fingerprint(&a.fingerprint).unwrap(), Some(a));
        assert_eq!(store.find_by_fingerprint("nope").unwrap(), None);
    }

    #[test]
    fn test_delete_all_keeps_audit_trail() {
        let store = MemoryStore::new();
        let a = decision("ACME CLOUD", -50.0);
        store.insert_decision(&a).unwrap();
        store
            .append_audit_entry(&AuditLogEntry::new(
                &a.id,
                AuditAction::Approve,
                serde_json::json!({}),
                serde_json::json!({}),
                "tester",
            ))
            .unwrap();

        let bulk = AuditLogEntry::new(
            crate::audit::ALL_RECORDS,
            AuditAction::ClearAll,
            serde_json::json!([]),
            serde_json::json!([]),
            "tester",
        );
        assert_eq!(store.clear_decisions(&bulk).unwrap(), 1);
        assert_eq!(store.count_decisions().unwrap(), 0);
        assert!(!store.fingerprint_exists(&a.fingerprint).unwrap());
        assert_eq!(store.audit_entries(&a.id).unwrap().len(), 1);
        assert_eq!(store.audit_entries("*").unwrap().len(), 1);
    }
}
