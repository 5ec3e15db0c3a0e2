// ✅ Approval Workflow - decision record state machine + audit trail
//
//   pending ──approve──▶ approved
//      │                    ▲
//      └──reject───▶ rejected│
//                            │
//   any state ──reclassify───┘   (human-confirmed label, confidence 1.0)
//
// Every transition is one store call: re-read the record, check the
// expected status, merge the patch and append exactly one AuditLogEntry
// (before/after snapshots), all or nothing. Learning happens after the
// transition committed and a learning failure never undoes it.

use std::sync::Arc;

use crate::audit::{AuditAction, AuditLogEntry, ALL_RECORDS};
use crate::error::{EngineError, EngineResult};
use crate::learning::LearningStore;
use crate::records::{
    DateOverrides, DecisionFilter, DecisionPatch, DecisionRecord, DecisionStatus, SuggestedAction,
};
use crate::store::RecordStore;

pub struct ApprovalWorkflow {
    store: Arc<dyn RecordStore>,
    learning: LearningStore,
}

impl ApprovalWorkflow {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let learning = LearningStore::new(store.clone());
        ApprovalWorkflow { store, learning }
    }

    pub fn learning(&self) -> &LearningStore {
        &self.learning
    }

    fn load(&self, id: &str) -> EngineResult<DecisionRecord> {
        self.store
            .get_decision(id)?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    fn commit(
        &self,
        id: &str,
        expected: Option<DecisionStatus>,
        patch: &DecisionPatch,
        action: AuditAction,
        actor: &str,
    ) -> EngineResult<DecisionRecord> {
        let t = self.store.transition(id, expected, patch, action, actor)?;

        tracing::info!(
            record = %id,
            action = action.as_str(),
            actor,
            from = t.before.status.as_str(),
            to = t.after.status.as_str(),
            label = %t.after.category_label,
            "decision record transition"
        );
        Ok(t.after)
    }

    fn learn_after_commit(&self, record: &DecisionRecord, label: &str) {
        if let Err(err) = self.learning.learn(&record.description, label) {
            tracing::warn!(record = %record.id, label, error = %err, "learning failed after transition");
        }
    }

    pub fn approve(&self, id: &str, overrides: Option<DateOverrides>, actor: &str) -> EngineResult<DecisionRecord> {
        let patch = DecisionPatch {
            status: Some(DecisionStatus::Approved),
            needs_review: Some(false),
            dates: overrides,
            ..Default::default()
        };
        let after = self.commit(id, Some(DecisionStatus::Pending), &patch, AuditAction::Approve, actor)?;

        self.learn_after_commit(&after, &after.category_label);
        Ok(after)
    }

    pub fn reject(&self, id: &str, overrides: Option<DateOverrides>, actor: &str) -> EngineResult<DecisionRecord> {
        let patch = DecisionPatch {
            status: Some(DecisionStatus::Rejected),
            needs_review: Some(false),
            dates: overrides,
            ..Default::default()
        };
        self.commit(id, Some(DecisionStatus::Pending), &patch, AuditAction::Reject, actor)
    }

    /// Human correction: allowed from any state, always ends approved
    pub fn reclassify(
        &self,
        id: &str,
        new_label: &str,
        overrides: Option<DateOverrides>,
        actor: &str,
    ) -> EngineResult<DecisionRecord> {
        let label = new_label.trim();
        if label.is_empty() {
            return Err(EngineError::validation("new category label must not be empty"));
        }

        let patch = DecisionPatch {
            status: Some(DecisionStatus::Approved),
            category_label: Some(label.to_string()),
            confidence: Some(1.0),
            needs_review: Some(false),
            suggested_action: Some(SuggestedAction::Approve),
            dates: overrides,
            ..Default::default()
        };
        let after = self.commit(id, None, &patch, AuditAction::Reclassify, actor)?;

        self.learn_after_commit(&after, label);
        Ok(after)
    }

    /// Delete every decision record; requires explicit confirmation
    pub fn clear_all(&self, confirm: bool, actor: &str) -> EngineResult<usize> {
        if !confirm {
            return Err(EngineError::validation(
                "clear_all requires explicit confirmation",
            ));
        }

        let records = self.store.list_decisions(&DecisionFilter::all())?;
        let before = records
            .iter()
            .map(DecisionRecord::snapshot)
            .collect::<EngineResult<Vec<_>>>()?;
        let entry = AuditLogEntry::new(
            ALL_RECORDS,
            AuditAction::ClearAll,
            serde_json::Value::Array(before),
            serde_json::Value::Array(Vec::new()),
            actor,
        );

        let removed = self.store.clear_decisions(&entry)?;
        tracing::warn!(removed, actor, "all decision records cleared");
        Ok(removed)
    }

    /// Audit entries for one record, oldest first
    pub fn history(&self, id: &str) -> EngineResult<Vec<AuditLogEntry>> {
        self.store.audit_entries(id)
    }

    pub fn list(&self, filter: &DecisionFilter) -> EngineResult<Vec<DecisionRecord>> {
        self.store.list_decisions(filter)
    }

    pub fn get(&self, id: &str) -> EngineResult<DecisionRecord> {
        self.load(id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::LearningRule;
    use crate::records::{ClassificationResult, SourceType, UnclassifiedRecord};
    use crate::store::{InsertOutcome, MemoryStore, Transition};
    use chrono::NaiveDate;

    fn pending(store: &dyn RecordStore, description: &str, label: &str) -> DecisionRecord {
        let record = UnclassifiedRecord::new(
            description,
            SourceType::Transaction,
            description,
            -150.0,
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        );
        let result = ClassificationResult::from_record(&record, label, 0.60, "test");
        let decision = DecisionRecord::from_result(&result);
        store.insert_decision(&decision).unwrap();
        decision
    }

    fn setup() -> (Arc<MemoryStore>, ApprovalWorkflow) {
        let store = Arc::new(MemoryStore::new());
        let workflow = ApprovalWorkflow::new(store.clone());
        (store, workflow)
    }

    #[test]
    fn test_approve_pending_record() {
        let (store, workflow) = setup();
        let rec = pending(store.as_ref(), "CONTRATO SOFTWARE XYZ MENSAL", "Software Fixed Cost");

        let due = NaiveDate::from_ymd_opt(2025, 4, 5).unwrap();
        let after = workflow
            .approve(
                &rec.id,
                Some(DateOverrides {
                    due_date: Some(due),
                    ..Default::default()
                }),
                "ana",
            )
            .unwrap();

        assert_eq!(after.status, DecisionStatus::Approved);
        assert!(!after.needs_review);
        assert_eq!(after.dates.due_date, Some(due));
        assert_eq!(after.category_label, "Software Fixed Cost");

        let history = workflow.history(&rec.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::Approve);
        assert_eq!(history[0].actor, "ana");
        assert_eq!(history[0].before_snapshot, rec.snapshot().unwrap());
        assert_eq!(history[0].after_snapshot, after.snapshot().unwrap());

        // Approval taught the learning store
        assert_eq!(workflow.learning().rule_count().unwrap(), 1);
    }

    #[test]
    fn test_approve_twice_is_invalid_transition() {
        let (store, workflow) = setup();
        let rec = pending(store.as_ref(), "ACME CLOUD HOSTING", "Software");
        workflow.approve(&rec.id, None, "ana").unwrap();

        let err = workflow.approve(&rec.id, None, "ana").unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert!(err.is_validation());
        assert_eq!(workflow.history(&rec.id).unwrap().len(), 1);

        let err = workflow.reject(&rec.id, None, "ana").unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_reject_does_not_learn() {
        let (store, workflow) = setup();
        let rec = pending(store.as_ref(), "CONTRATO SOFTWARE XYZ MENSAL", "Software Fixed Cost");

        let after = workflow.reject(&rec.id, None, "ana").unwrap();
        assert_eq!(after.status, DecisionStatus::Rejected);
        assert!(!after.needs_review);
        assert_eq!(workflow.learning().rule_count().unwrap(), 0);
        assert_eq!(workflow.history(&rec.id).unwrap()[0].action, AuditAction::Reject);
    }

    #[test]
    fn test_reclassify_from_any_state() {
        let (store, workflow) = setup();
        let rec = pending(store.as_ref(), "GLOBEX SERVICOS TI", "Other Expense");
        workflow.reject(&rec.id, None, "ana").unwrap();

        let after = workflow.reclassify(&rec.id, "IT Services", None, "bruno").unwrap();
        assert_eq!(after.status, DecisionStatus::Approved);
        assert_eq!(after.category_label, "IT Services");
        assert_eq!(after.confidence, 1.0);
        assert_eq!(after.suggested_action, SuggestedAction::Approve);
        assert!(!after.needs_review);

        let history = workflow.history(&rec.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action, AuditAction::Reclassify);

        let rules = workflow.learning().snapshot().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category_label, "IT Services");
    }

    #[test]
    fn test_reclassify_requires_label() {
        let (store, workflow) = setup();
        let rec = pending(store.as_ref(), "GLOBEX SERVICOS TI", "Other Expense");
        assert!(workflow.reclassify(&rec.id, "   ", None, "ana").unwrap_err().is_validation());
        assert!(workflow.history(&rec.id).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_record_not_found() {
        let (_, workflow) = setup();
        assert!(matches!(
            workflow.approve("missing", None, "ana").unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn test_short_description_approval_learns_nothing() {
        let (store, workflow) = setup();
        let rec = pending(store.as_ref(), "PIX RECEBIDO", "Client Revenue");
        workflow.approve(&rec.id, None, "ana").unwrap();
        assert_eq!(workflow.learning().rule_count().unwrap(), 0);
    }

    #[test]
    fn test_clear_all_requires_confirmation() {
        let (store, workflow) = setup();
        pending(store.as_ref(), "ACME CLOUD HOSTING", "Software");
        pending(store.as_ref(), "GLOBEX SERVICOS TI", "Software");

        let err = workflow.clear_all(false, "ana").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.count_decisions().unwrap(), 2);

        assert_eq!(workflow.clear_all(true, "ana").unwrap(), 2);
        assert_eq!(store.count_decisions().unwrap(), 0);

        let bulk = workflow.history(ALL_RECORDS).unwrap();
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].action, AuditAction::ClearAll);
        assert_eq!(bulk[0].before_snapshot.as_array().map(|a| a.len()), Some(2));
        assert_eq!(bulk[0].after_snapshot, serde_json::json!([]));
    }

    #[test]
    fn test_concurrent_approvals_commit_once() {
        let (store, workflow) = setup();
        let rec = pending(store.as_ref(), "CONTRATO SOFTWARE XYZ MENSAL", "Software Fixed Cost");

        let outcomes: Vec<EngineResult<DecisionRecord>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let workflow = &workflow;
                    let id = rec.id.clone();
                    scope.spawn(move || workflow.approve(&id, None, &format!("user-{}", i)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|o| o.as_ref().err())
            .all(|e| matches!(e, EngineError::InvalidTransition { .. })));

        let history = workflow.history(&rec.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].before_snapshot["status"], "pending");

        let rules = workflow.learning().snapshot().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].hit_count, 1);
    }

    // Store whose transitions always fail inside the write
    struct FailingUpdates {
        inner: MemoryStore,
    }

    impl RecordStore for FailingUpdates {
        fn insert_decision(&self, record: &DecisionRecord) -> EngineResult<InsertOutcome> {
            self.inner.insert_decision(record)
        }
        fn get_decision(&self, id: &str) -> EngineResult<Option<DecisionRecord>> {
            self.inner.get_decision(id)
        }
        fn list_decisions(&self, filter: &DecisionFilter) -> EngineResult<Vec<DecisionRecord>> {
            self.inner.list_decisions(filter)
        }
        fn find_by_fingerprint(&self, fingerprint: &str) -> EngineResult<Option<DecisionRecord>> {
            self.inner.find_by_fingerprint(fingerprint)
        }
        fn transition(
            &self,
            _id: &str,
            _expected: Option<DecisionStatus>,
            _patch: &DecisionPatch,
            _action: AuditAction,
            _actor: &str,
        ) -> EngineResult<Transition> {
            Err(EngineError::persistence("audit table locked"))
        }
        fn clear_decisions(&self, _entry: &AuditLogEntry) -> EngineResult<usize> {
            Err(EngineError::persistence("disk full"))
        }
        fn count_decisions(&self) -> EngineResult<usize> {
            self.inner.count_decisions()
        }
        fn fingerprint_exists(&self, fingerprint: &str) -> EngineResult<bool> {
            self.inner.fingerprint_exists(fingerprint)
        }
        fn append_audit_entry(&self, entry: &AuditLogEntry) -> EngineResult<()> {
            self.inner.append_audit_entry(entry)
        }
        fn audit_entries(&self, id: &str) -> EngineResult<Vec<AuditLogEntry>> {
            self.inner.audit_entries(id)
        }
        fn find_rule(&self, token_key: &str, label: &str) -> EngineResult<Option<LearningRule>> {
            self.inner.find_rule(token_key, label)
        }
        fn save_rule(&self, rule: &LearningRule) -> EngineResult<()> {
            self.inner.save_rule(rule)
        }
        fn list_rules(&self) -> EngineResult<Vec<LearningRule>> {
            self.inner.list_rules()
        }
    }

    #[test]
    fn test_failed_update_writes_no_audit_entry() {
        let store = Arc::new(FailingUpdates {
            inner: MemoryStore::new(),
        });
        let workflow = ApprovalWorkflow::new(store.clone());
        let rec = pending(store.as_ref(), "CONTRATO SOFTWARE XYZ MENSAL", "Software Fixed Cost");

        let err = workflow.approve(&rec.id, None, "ana").unwrap_err();
        assert!(err.is_persistence());
        assert!(workflow.history(&rec.id).unwrap().is_empty());
        assert_eq!(workflow.learning().rule_count().unwrap(), 0);
        assert_eq!(
            store.get_decision(&rec.id).unwrap().unwrap().status,
            DecisionStatus::Pending
        );

        // Nothing was half-applied, so a retry still sees a pending record
        let err = workflow.approve(&rec.id, None, "ana").unwrap_err();
        assert!(err.is_persistence());
        assert!(workflow.history(&rec.id).unwrap().is_empty());

        assert!(workflow.clear_all(true, "ana").unwrap_err().is_persistence());
        assert_eq!(store.count_decisions().unwrap(), 1);
    }
}
