// 📄 Records - the data that flows through one sync cycle
//
//   UnclassifiedRecord  (ephemeral, built per cycle)
//        ↓ classify
//   ClassificationResult (pure computation, never persisted on its own)
//        ↓ reconcile + audit
//   DecisionRecord       (persisted, mutated only by the approval workflow)
//
// Identity vs deduplication: `DecisionRecord::id` is a UUID that never
// changes; `fingerprint` is a content hash used to skip the same event when
// sync windows overlap.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineResult;
use crate::tokens::normalize;

/// Confidence at or above which a result is suggested for approval
pub const APPROVAL_THRESHOLD: f64 = 0.90;

// ============================================================================
// ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Transaction,
    Document,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Transaction => "transaction",
            SourceType::Document => "document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Approve,
    Investigate,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(DecisionStatus::Pending),
            "approved" => Some(DecisionStatus::Approved),
            "rejected" => Some(DecisionStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// UNCLASSIFIED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnclassifiedRecord {
    pub id: String,
    pub source_type: SourceType,
    pub raw_description: String,
    /// Signed amount (negative = money going out)
    pub amount: f64,
    pub occurred_at: NaiveDate,
    pub counterparty_hint: Option<String>,
    /// Category suggested by the source itself (a document line's label guess)
    #[serde(default)]
    pub label_hint: Option<String>,
    /// Name of the source that produced this record ("bank", "documents", ...)
    pub origin: String,
}

impl UnclassifiedRecord {
    pub fn new(
        id: impl Into<String>,
        source_type: SourceType,
        raw_description: impl Into<String>,
        amount: f64,
        occurred_at: NaiveDate,
    ) -> Self {
        UnclassifiedRecord {
            id: id.into(),
            source_type,
            raw_description: raw_description.into(),
            amount,
            occurred_at,
            counterparty_hint: None,
            label_hint: None,
            origin: source_type.as_str().to_string(),
        }
    }

    pub fn with_counterparty(mut self, hint: impl Into<String>) -> Self {
        self.counterparty_hint = Some(hint.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_label_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        self.label_hint = if hint.trim().is_empty() { None } else { Some(hint) };
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(
            self.source_type,
            &self.raw_description,
            self.counterparty_hint.as_deref(),
            self.amount,
            self.occurred_at,
        )
    }
}

/// Amount in integer cents (all money comparisons go through this)
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Content fingerprint: source + description + amount + date.
/// Document lines also hash their vendor: the same line item from two
/// vendors is two events. Bank lines ignore the counterparty (not every
/// export carries it).
pub fn fingerprint(
    source_type: SourceType,
    description: &str,
    counterparty: Option<&str>,
    amount: f64,
    occurred_at: NaiveDate,
) -> String {
    let text = match (source_type, counterparty) {
        (SourceType::Document, Some(vendor)) => format!("{} {}", vendor, description),
        _ => description.to_string(),
    };
    let normalized: Vec<String> = normalize(&text)
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}",
        source_type.as_str(),
        normalized.join(" "),
        to_cents(amount),
        occurred_at.format("%Y-%m-%d")
    ));
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub within_budget: bool,
    pub budget_limit: Option<f64>,
    pub variation: Option<f64>,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub record_id: String,
    pub source_type: SourceType,
    pub category_label: String,
    pub confidence: f64,
    pub matched_record_id: Option<String>,
    pub needs_review: bool,
    pub suggested_action: SuggestedAction,
    pub audit_outcome: Option<AuditOutcome>,

    // Carried from the record for the auditor and the matcher
    pub description: String,
    pub amount: f64,
    pub occurred_at: NaiveDate,
    pub counterparty_hint: Option<String>,
    pub origin: String,
    /// Strategy that produced the label ("learned_rules", "heuristics", ...)
    pub classified_by: String,
}

impl ClassificationResult {
    pub fn from_record(
        record: &UnclassifiedRecord,
        category_label: impl Into<String>,
        confidence: f64,
        classified_by: impl Into<String>,
    ) -> Self {
        let mut result = ClassificationResult {
            record_id: record.id.clone(),
            source_type: record.source_type,
            category_label: category_label.into(),
            confidence: 0.0,
            matched_record_id: None,
            needs_review: true,
            suggested_action: SuggestedAction::Investigate,
            audit_outcome: None,
            description: record.raw_description.clone(),
            amount: record.amount,
            occurred_at: record.occurred_at,
            counterparty_hint: record.counterparty_hint.clone(),
            origin: record.origin.clone(),
            classified_by: classified_by.into(),
        };
        result.set_confidence(confidence);
        result
    }

    /// Set confidence (clamped to [0, 1]) and derive action + review flag
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence.clamp(0.0, 1.0);
        self.suggested_action = if self.confidence >= APPROVAL_THRESHOLD {
            SuggestedAction::Approve
        } else {
            SuggestedAction::Investigate
        };
        self.refresh_review_flag();
    }

    /// Mark as conciliated against another record
    pub fn mark_matched(&mut self, other_id: &str) {
        self.matched_record_id = Some(other_id.to_string());
        self.confidence = 1.0;
        self.suggested_action = SuggestedAction::Archive;
        self.refresh_review_flag();
    }

    /// needs_review ⇔ confidence below threshold OR critical audit
    pub fn refresh_review_flag(&mut self) {
        let critical = self.is_critical();
        self.needs_review = self.confidence < APPROVAL_THRESHOLD || critical;
        if critical {
            self.suggested_action = SuggestedAction::Investigate;
        }
    }

    pub fn is_critical(&self) -> bool {
        self.audit_outcome
            .as_ref()
            .map(|o| o.severity == Severity::Critical)
            .unwrap_or(false)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(
            self.source_type,
            &self.description,
            self.counterparty_hint.as_deref(),
            self.amount,
            self.occurred_at,
        )
    }
}

// ============================================================================
// DECISION RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competence_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<NaiveDate>,
}

impl DateOverrides {
    pub fn is_empty(&self) -> bool {
        self.competence_date.is_none() && self.due_date.is_none() && self.paid_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Stable identity (UUID)
    pub id: String,
    pub record_id: String,
    pub source_type: SourceType,
    pub category_label: String,
    pub confidence: f64,
    pub matched_record_id: Option<String>,
    pub needs_review: bool,
    pub suggested_action: SuggestedAction,
    pub audit_outcome: Option<AuditOutcome>,
    pub description: String,
    pub amount: f64,
    pub occurred_at: NaiveDate,
    pub counterparty_hint: Option<String>,
    pub classified_by: String,

    pub status: DecisionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub dates: DateOverrides,
    pub origin: String,
    pub fingerprint: String,
}

impl DecisionRecord {
    /// New pending record from a final (reconciled + audited) result
    pub fn from_result(result: &ClassificationResult) -> Self {
        let now = Utc::now();
        DecisionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            record_id: result.record_id.clone(),
            source_type: result.source_type,
            category_label: result.category_label.clone(),
            confidence: result.confidence,
            matched_record_id: result.matched_record_id.clone(),
            needs_review: result.needs_review,
            suggested_action: result.suggested_action,
            audit_outcome: result.audit_outcome.clone(),
            description: result.description.clone(),
            amount: result.amount,
            occurred_at: result.occurred_at,
            counterparty_hint: result.counterparty_hint.clone(),
            classified_by: result.classified_by.clone(),
            status: DecisionStatus::Pending,
            created_at: now,
            updated_at: now,
            dates: DateOverrides::default(),
            origin: result.origin.clone(),
            fingerprint: result.fingerprint(),
        }
    }

    /// Apply a patch, producing the after image (refreshes updated_at)
    pub fn apply(&self, patch: &DecisionPatch) -> DecisionRecord {
        let mut next = self.clone();
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(label) = &patch.category_label {
            next.category_label = label.clone();
        }
        if let Some(confidence) = patch.confidence {
            next.confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(needs_review) = patch.needs_review {
            next.needs_review = needs_review;
        }
        if let Some(action) = patch.suggested_action {
            next.suggested_action = action;
        }
        if let Some(matched) = &patch.matched_record_id {
            next.matched_record_id = Some(matched.clone());
        }
        if let Some(overrides) = &patch.dates {
            if overrides.competence_date.is_some() {
                next.dates.competence_date = overrides.competence_date;
            }
            if overrides.due_date.is_some() {
                next.dates.due_date = overrides.due_date;
            }
            if overrides.paid_date.is_some() {
                next.dates.paid_date = overrides.paid_date;
            }
        }
        next.updated_at = Utc::now();
        next
    }

    pub fn snapshot(&self) -> EngineResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Field-level update merged into a stored DecisionRecord
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionPatch {
    pub status: Option<DecisionStatus>,
    pub category_label: Option<String>,
    pub confidence: Option<f64>,
    pub needs_review: Option<bool>,
    pub suggested_action: Option<SuggestedAction>,
    pub matched_record_id: Option<String>,
    pub dates: Option<DateOverrides>,
}

/// Filtered scan over decision records
#[derive(Debug, Clone, Default)]
pub struct DecisionFilter {
    pub status: Option<DecisionStatus>,
    pub category_label: Option<String>,
}

impl DecisionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_status(status: DecisionStatus) -> Self {
        DecisionFilter {
            status: Some(status),
            category_label: None,
        }
    }

    pub fn matches(&self, record: &DecisionRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(label) = &self.category_label {
            if !record.category_label.eq_ignore_ascii_case(label) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
