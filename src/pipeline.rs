// 🔄 Sync Pipeline - one batch cycle over a date window
//
//   1. fetch statements + documents concurrently (failure → empty + warning)
//   2. classify in fixed-size chunks on blocking workers (bounded in flight,
//      input order preserved)
//   3. reconcile the whole batch once
//   4. budget audit of the final results
//   5. skip fingerprints already stored, persist chunk by chunk as pending
//      decision records; stop between chunks once the time ceiling is hit.
//      A stored record matched in this cycle (its partner arrived in a later
//      window) gets the link through an audited "reconcile" transition
//   6. summary payload for the notification sink
//
// Re-running over the same window inserts nothing new.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::audit::AuditAction;
use crate::budget::BudgetAuditor;
use crate::classifier::ClassificationEngine;
use crate::config::SyncConfig;
use crate::error::{EngineError, EngineResult};
use crate::learning::LearningStore;
use crate::reconciliation::{ReconciliationMatcher, ReconciliationReport};
use crate::records::{
    ClassificationResult, DecisionPatch, DecisionRecord, DecisionStatus, Severity, UnclassifiedRecord,
};
use crate::rules::RuleEngine;
use crate::sources::{documents_to_records, transactions_to_records, DateWindow, DocumentSource, StatementSource};
use crate::store::{InsertOutcome, RecordStore};

/// Actor recorded on audit entries written by a sync cycle
pub const SYNC_ACTOR: &str = "sync";

// ============================================================================
// REPORT + NOTIFICATION PAYLOAD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryItem {
    pub label: String,
    pub value: String,
    pub severity: Severity,
}

/// What the notification sink receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub items: Vec<SummaryItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistStats {
    pub inserted: usize,
    pub duplicates: usize,
    /// Already-stored records given a match found in this cycle
    pub linked: usize,
    pub failed: usize,
    /// Results not attempted because the time ceiling was reached
    pub deferred: usize,
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub window: Option<DateWindow>,
    pub fetched_transactions: usize,
    pub fetched_documents: usize,
    pub source_failures: Vec<String>,
    pub classified: usize,
    pub needs_review: usize,
    pub budget_warnings: usize,
    pub budget_critical: usize,
    pub reconciliation: ReconciliationReport,
    pub persisted: PersistStats,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn summary(&self) -> NotificationPayload {
        let title = match &self.window {
            Some(w) => format!("Sync {} → {}: {} new decision records", w.start, w.end, self.persisted.inserted),
            None => format!("Manual submission: {} new decision records", self.persisted.inserted),
        };

        let flag = |count: usize, severity: Severity| if count > 0 { severity } else { Severity::None };

        let items = vec![
            SummaryItem {
                label: "Transactions fetched".to_string(),
                value: self.fetched_transactions.to_string(),
                severity: Severity::None,
            },
            SummaryItem {
                label: "Document lines fetched".to_string(),
                value: self.fetched_documents.to_string(),
                severity: Severity::None,
            },
            SummaryItem {
                label: "Reconciled pairs".to_string(),
                value: self.reconciliation.match_count().to_string(),
                severity: Severity::None,
            },
            SummaryItem {
                label: "Needs review".to_string(),
                value: self.needs_review.to_string(),
                severity: flag(self.needs_review, Severity::Warning),
            },
            SummaryItem {
                label: "Near budget".to_string(),
                value: self.budget_warnings.to_string(),
                severity: flag(self.budget_warnings, Severity::Warning),
            },
            SummaryItem {
                label: "Over budget".to_string(),
                value: self.budget_critical.to_string(),
                severity: flag(self.budget_critical, Severity::Critical),
            },
            SummaryItem {
                label: "Inserted".to_string(),
                value: self.persisted.inserted.to_string(),
                severity: Severity::None,
            },
            SummaryItem {
                label: "Duplicates skipped".to_string(),
                value: self.persisted.duplicates.to_string(),
                severity: Severity::None,
            },
            SummaryItem {
                label: "Linked to earlier records".to_string(),
                value: self.persisted.linked.to_string(),
                severity: Severity::None,
            },
            SummaryItem {
                label: "Failed".to_string(),
                value: self.persisted.failed.to_string(),
                severity: flag(self.persisted.failed, Severity::Critical),
            },
            SummaryItem {
                label: "Deferred to next cycle".to_string(),
                value: self.persisted.deferred.to_string(),
                severity: flag(self.persisted.deferred, Severity::Warning),
            },
            SummaryItem {
                label: "Unavailable sources".to_string(),
                value: if self.source_failures.is_empty() {
                    "0".to_string()
                } else {
                    self.source_failures.join(", ")
                },
                severity: flag(self.source_failures.len(), Severity::Warning),
            },
        ];

        NotificationPayload { title, items }
    }
}

// ============================================================================
// CHUNKED CLASSIFICATION
// ============================================================================

/// Classify on blocking workers, at most `max_in_flight` chunks at a time.
/// Output order matches input order.
pub async fn classify_chunked(
    engine: Arc<ClassificationEngine>,
    records: Vec<UnclassifiedRecord>,
    chunk_size: usize,
    max_in_flight: usize,
) -> EngineResult<Vec<ClassificationResult>> {
    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut handles = Vec::new();

    for chunk in records.chunks(chunk_size.max(1)) {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Worker(e.to_string()))?;
        let engine = engine.clone();
        let chunk = chunk.to_vec();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            engine.classify_all(&chunk)
        }));
    }

    let mut results = Vec::with_capacity(records.len());
    for handle in handles {
        let chunk = handle.await.map_err(|e| EngineError::Worker(e.to_string()))?;
        results.extend(chunk);
    }
    Ok(results)
}

// ============================================================================
// SYNC PIPELINE
// ============================================================================

pub struct SyncPipeline {
    store: Arc<dyn RecordStore>,
    statements: Arc<dyn StatementSource>,
    documents: Arc<dyn DocumentSource>,
    heuristics: RuleEngine,
    auditor: Arc<BudgetAuditor>,
    matcher: ReconciliationMatcher,
    settings: SyncConfig,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        statements: Arc<dyn StatementSource>,
        documents: Arc<dyn DocumentSource>,
        heuristics: RuleEngine,
        auditor: Arc<BudgetAuditor>,
    ) -> Self {
        SyncPipeline {
            store,
            statements,
            documents,
            heuristics,
            auditor,
            matcher: ReconciliationMatcher::new(),
            settings: SyncConfig::default(),
        }
    }

    pub fn with_settings(mut self, settings: SyncConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_matcher(mut self, matcher: ReconciliationMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Run one full cycle over `window`
    pub async fn run(&self, window: DateWindow) -> EngineResult<SyncReport> {
        let started = Instant::now();
        tracing::info!(start = %window.start, end = %window.end, "sync cycle started");

        let (statements, documents) = tokio::join!(
            self.statements.fetch(&window),
            self.documents.poll(&window)
        );

        let mut source_failures = Vec::new();
        let statements = statements.unwrap_or_else(|err| {
            tracing::warn!(source = self.statements.name(), error = %err, "statement source failed, continuing without it");
            source_failures.push(self.statements.name().to_string());
            Vec::new()
        });
        let documents = documents.unwrap_or_else(|err| {
            tracing::warn!(source = self.documents.name(), error = %err, "document source failed, continuing without it");
            source_failures.push(self.documents.name().to_string());
            Vec::new()
        });

        let mut records = transactions_to_records(self.statements.name(), &statements);
        let fetched_transactions = records.len();
        let (document_records, hints) = documents_to_records(self.documents.name(), &documents);
        let fetched_documents = document_records.len();
        records.extend(document_records);

        let mut report = self.process(records, &hints, started).await?;
        report.window = Some(window);
        report.fetched_transactions = fetched_transactions;
        report.fetched_documents = fetched_documents;
        report.source_failures = source_failures;

        tracing::info!(
            inserted = report.persisted.inserted,
            duplicates = report.persisted.duplicates,
            matched = report.reconciliation.match_count(),
            critical = report.budget_critical,
            duration_ms = report.duration_ms,
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Classify → reconcile → audit → persist an already-built batch
    /// (used by `run` and by manual submissions)
    pub async fn process(
        &self,
        records: Vec<UnclassifiedRecord>,
        description_hints: &HashMap<String, String>,
        started: Instant,
    ) -> EngineResult<SyncReport> {
        let rules = LearningStore::new(self.store.clone()).snapshot()?;
        let engine = Arc::new(ClassificationEngine::standard(rules, self.heuristics.clone()));

        let mut results = classify_chunked(
            engine,
            records,
            self.settings.chunk_size,
            self.settings.max_in_flight,
        )
        .await?;
        let classified = results.len();

        let reconciliation = self.matcher.reconcile(&mut results, description_hints);
        self.auditor.audit_all(&mut results);

        let severity_count = |severity: Severity| {
            results
                .iter()
                .filter(|r| r.audit_outcome.as_ref().map(|o| o.severity) == Some(severity))
                .count()
        };
        let budget_warnings = severity_count(Severity::Warning);
        let budget_critical = severity_count(Severity::Critical);
        let needs_review = results.iter().filter(|r| r.needs_review).count();

        let persisted = self.persist(&results, started);

        Ok(SyncReport {
            window: None,
            fetched_transactions: 0,
            fetched_documents: 0,
            source_failures: Vec::new(),
            classified,
            needs_review,
            budget_warnings,
            budget_critical,
            reconciliation,
            persisted,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn persist(&self, results: &[ClassificationResult], started: Instant) -> PersistStats {
        let mut stats = PersistStats::default();
        let chunk_size = self.settings.chunk_size.max(1);
        let ceiling = self.settings.max_duration();

        for (index, chunk) in results.chunks(chunk_size).enumerate() {
            if started.elapsed() >= ceiling {
                stats.stopped_early = true;
                stats.deferred = results.len() - index * chunk_size;
                tracing::warn!(deferred = stats.deferred, "time ceiling reached, remaining chunks deferred");
                break;
            }

            for result in chunk {
                let decision = DecisionRecord::from_result(result);
                let outcome = match self.store.fingerprint_exists(&decision.fingerprint) {
                    Ok(true) => Ok(InsertOutcome::Duplicate),
                    Ok(false) => self.store.insert_decision(&decision),
                    Err(err) => Err(err),
                };
                match outcome {
                    Ok(InsertOutcome::Inserted) => stats.inserted += 1,
                    Ok(InsertOutcome::Duplicate) => {
                        stats.duplicates += 1;
                        match self.link_stored(result) {
                            Ok(true) => stats.linked += 1,
                            Ok(false) => {}
                            Err(err) => {
                                tracing::warn!(record = %result.record_id, error = %err, "failed to link stored decision record");
                            }
                        }
                    }
                    Err(err) => {
                        stats.failed += 1;
                        tracing::warn!(record = %result.record_id, error = %err, "failed to persist decision record");
                    }
                }
            }
        }
        stats
    }

    /// Carry a match found in this cycle onto the already-stored record.
    /// Pending records take the match's confidence and action too; decided
    /// records only get the link. Returns whether the record changed.
    fn link_stored(&self, result: &ClassificationResult) -> EngineResult<bool> {
        let matched = match &result.matched_record_id {
            Some(id) => id.clone(),
            None => return Ok(false),
        };
        let stored = match self.store.find_by_fingerprint(&result.fingerprint())? {
            Some(stored) if stored.matched_record_id.is_none() => stored,
            _ => return Ok(false),
        };

        let mut patch = DecisionPatch {
            matched_record_id: Some(matched),
            ..Default::default()
        };
        if stored.status == DecisionStatus::Pending {
            patch.confidence = Some(result.confidence);
            patch.needs_review = Some(result.needs_review);
            patch.suggested_action = Some(result.suggested_action);
        }

        match self
            .store
            .transition(&stored.id, Some(stored.status), &patch, AuditAction::Reconcile, SYNC_ACTOR)
        {
            Ok(t) => {
                tracing::info!(
                    record = %t.after.id,
                    matched = ?t.after.matched_record_id,
                    "stored decision record linked to a later match"
                );
                Ok(true)
            }
            // Decided by a human in between; leave it as it is
            Err(EngineError::InvalidTransition { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
