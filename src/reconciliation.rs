// ⚖️ Reconciliation Matcher - pair bank transactions with supporting documents
//
// Composite score per (transaction, document) pair:
//
//   score = 0.5 × value + 0.3 × date + 0.2 × vendor
//
//   value:  1.0 when amounts differ by ≤ 0.01, else max(0, 1 − rel / 0.05)
//           with rel = diff / max(|a|, |b|)
//   date:   1.0 within 3 days, linear down to 0.0 at 7 days
//   vendor: share of the document hint tokens found in the transaction
//
// Pairs scoring ≥ 0.75 are assigned greedily (best score first), 1:1.
// Runs once per batch, after classification and before audit/persistence.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::{to_cents, ClassificationResult, SourceType};
use crate::tokens::{overlap_ratio, significant_tokens};

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSettings {
    #[serde(default = "default_value_weight")]
    pub value_weight: f64,
    #[serde(default = "default_date_weight")]
    pub date_weight: f64,
    #[serde(default = "default_vendor_weight")]
    pub vendor_weight: f64,

    /// Absolute difference treated as equal amounts
    #[serde(default = "default_exact_tolerance")]
    pub exact_tolerance: f64,
    /// Relative difference at which the value score reaches 0
    #[serde(default = "default_value_tolerance")]
    pub value_tolerance: f64,

    #[serde(default = "default_full_date_days")]
    pub full_date_days: i64,
    #[serde(default = "default_zero_date_days")]
    pub zero_date_days: i64,

    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
}

fn default_value_weight() -> f64 {
    0.5
}
fn default_date_weight() -> f64 {
    0.3
}
fn default_vendor_weight() -> f64 {
    0.2
}
fn default_exact_tolerance() -> f64 {
    0.01
}
fn default_value_tolerance() -> f64 {
    0.05
}
fn default_full_date_days() -> i64 {
    3
}
fn default_zero_date_days() -> i64 {
    7
}
fn default_acceptance_threshold() -> f64 {
    0.75
}

impl Default for MatchSettings {
    fn default() -> Self {
        MatchSettings {
            value_weight: default_value_weight(),
            date_weight: default_date_weight(),
            vendor_weight: default_vendor_weight(),
            exact_tolerance: default_exact_tolerance(),
            value_tolerance: default_value_tolerance(),
            full_date_days: default_full_date_days(),
            zero_date_days: default_zero_date_days(),
            acceptance_threshold: default_acceptance_threshold(),
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub transaction_id: String,
    pub document_id: String,
    pub score: f64,
    pub value_score: f64,
    pub date_score: f64,
    pub vendor_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub matches: Vec<MatchPair>,
    pub unmatched_transactions: Vec<String>,
    pub unmatched_documents: Vec<String>,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn document_for(&self, transaction_id: &str) -> Option<&str> {
        self.matches
            .iter()
            .find(|m| m.transaction_id == transaction_id)
            .map(|m| m.document_id.as_str())
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciliation: {} matched, {} transactions and {} documents unmatched",
            self.matches.len(),
            self.unmatched_transactions.len(),
            self.unmatched_documents.len()
        )
    }
}

// ============================================================================
// RECONCILIATION MATCHER
// ============================================================================

pub struct ReconciliationMatcher {
    settings: MatchSettings,
}

impl ReconciliationMatcher {
    pub fn new() -> Self {
        ReconciliationMatcher {
            settings: MatchSettings::default(),
        }
    }

    pub fn with_settings(settings: MatchSettings) -> Self {
        ReconciliationMatcher { settings }
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn value_score(&self, a: f64, b: f64) -> f64 {
        let (a, b) = (a.abs(), b.abs());
        let diff_cents = (to_cents(a) - to_cents(b)).abs();
        if diff_cents <= to_cents(self.settings.exact_tolerance) {
            return 1.0;
        }
        let largest = a.max(b);
        if largest <= 0.0 || self.settings.value_tolerance <= 0.0 {
            return 0.0;
        }
        let relative = (a - b).abs() / largest;
        (1.0 - relative / self.settings.value_tolerance).max(0.0)
    }

    pub fn date_score(&self, days_apart: i64) -> f64 {
        let days = days_apart.abs();
        let full = self.settings.full_date_days;
        let zero = self.settings.zero_date_days;
        if days <= full {
            1.0
        } else if days >= zero || zero <= full {
            0.0
        } else {
            (zero - days) as f64 / (zero - full) as f64
        }
    }

    pub fn vendor_score(&self, transaction_tokens: &BTreeSet<String>, hint_tokens: &BTreeSet<String>) -> f64 {
        overlap_ratio(transaction_tokens, hint_tokens)
    }

    /// Score one candidate pair (hint = text describing the document's vendor)
    pub fn score(&self, transaction: &ClassificationResult, document: &ClassificationResult, hint: &str) -> MatchPair {
        let value_score = self.value_score(transaction.amount, document.amount);
        let days = (transaction.occurred_at - document.occurred_at).num_days();
        let date_score = self.date_score(days);
        let vendor_score = self.vendor_score(&transaction_tokens(transaction), &significant_tokens(hint));

        let score = self.settings.value_weight * value_score
            + self.settings.date_weight * date_score
            + self.settings.vendor_weight * vendor_score;

        MatchPair {
            transaction_id: transaction.record_id.clone(),
            document_id: document.record_id.clone(),
            score,
            value_score,
            date_score,
            vendor_score,
        }
    }

    /// Match transactions to documents within one batch and mark both sides
    ///
    /// `description_hints` maps a document id to the vendor text to compare
    /// against; without a hint the document's counterparty (then its
    /// description) is used.
    pub fn reconcile(
        &self,
        results: &mut [ClassificationResult],
        description_hints: &HashMap<String, String>,
    ) -> ReconciliationReport {
        let transactions: Vec<usize> = indexes_of(results, SourceType::Transaction);
        let documents: Vec<usize> = indexes_of(results, SourceType::Document);

        let mut candidates: Vec<(MatchPair, usize, usize)> = Vec::new();
        for &d in &documents {
            let document = &results[d];
            let hint = document_hint(document, description_hints);
            for &t in &transactions {
                let pair = self.score(&results[t], document, hint);
                if pair.score >= self.settings.acceptance_threshold {
                    candidates.push((pair, t, d));
                }
            }
        }

        candidates.sort_by(|(a, _, _), (b, _, _)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });

        let mut taken_tx: HashSet<usize> = HashSet::new();
        let mut taken_doc: HashSet<usize> = HashSet::new();
        let mut matches = Vec::new();

        for (pair, t, d) in candidates {
            if taken_tx.contains(&t) || taken_doc.contains(&d) {
                continue;
            }
            taken_tx.insert(t);
            taken_doc.insert(d);

            let document_id = results[d].record_id.clone();
            let transaction_id = results[t].record_id.clone();
            results[t].mark_matched(&document_id);
            results[d].mark_matched(&transaction_id);

            tracing::debug!(
                transaction = %transaction_id,
                document = %document_id,
                score = pair.score,
                "transaction reconciled with document"
            );
            matches.push(pair);
        }

        let unmatched_transactions = transactions
            .iter()
            .filter(|t| !taken_tx.contains(t))
            .map(|&t| results[t].record_id.clone())
            .collect();
        let unmatched_documents = documents
            .iter()
            .filter(|d| !taken_doc.contains(d))
            .map(|&d| results[d].record_id.clone())
            .collect();

        ReconciliationReport {
            matches,
            unmatched_transactions,
            unmatched_documents,
            reconciled_at: Utc::now(),
        }
    }
}

impl Default for ReconciliationMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn indexes_of(results: &[ClassificationResult], source_type: SourceType) -> Vec<usize> {
    results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.source_type == source_type)
        .map(|(i, _)| i)
        .collect()
}

fn transaction_tokens(transaction: &ClassificationResult) -> BTreeSet<String> {
    let mut tokens = significant_tokens(&transaction.description);
    if let Some(counterparty) = &transaction.counterparty_hint {
        tokens.extend(significant_tokens(counterparty));
    }
    tokens
}

fn document_hint<'a>(document: &'a ClassificationResult, hints: &'a HashMap<String, String>) -> &'a str {
    hints
        .get(&document.record_id)
        .map(|s| s.as_str())
        .or(document.counterparty_hint.as_deref())
        .unwrap_or(&document.description)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{SuggestedAction, UnclassifiedRecord};
    use chrono::NaiveDate;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn tx(id: &str, description: &str, amount: f64, day: u32) -> ClassificationResult {
        let record = UnclassifiedRecord::new(id, SourceType::Transaction, description, amount, date(day));
        ClassificationResult::from_record(&record, "Other Expense", 0.60, "test")
    }

    fn doc(id: &str, vendor: &str, amount: f64, day: u32) -> ClassificationResult {
        let record = UnclassifiedRecord::new(id, SourceType::Document, "INVOICE", amount, date(day))
            .with_counterparty(vendor);
        ClassificationResult::from_record(&record, "Software", 0.70, "test")
    }

    #[test]
    fn test_value_score() {
        let matcher = ReconciliationMatcher::new();
        assert_eq!(matcher.value_score(-100.0, 100.0), 1.0);
        assert_eq!(matcher.value_score(100.0, 100.01), 1.0);
        assert!((matcher.value_score(100.0, 97.5) - 0.5).abs() < 1e-9);
        assert_eq!(matcher.value_score(100.0, 90.0), 0.0);
        assert_eq!(matcher.value_score(0.0, 0.0), 1.0);
    }

    #[test]
    fn test_date_score_decay() {
        let matcher = ReconciliationMatcher::new();
        assert_eq!(matcher.date_score(0), 1.0);
        assert_eq!(matcher.date_score(-3), 1.0);
        assert_eq!(matcher.date_score(5), 0.5);
        assert_eq!(matcher.date_score(7), 0.0);
        assert_eq!(matcher.date_score(10), 0.0);
    }

    #[test]
    fn test_exact_match_marks_both_sides() {
        let matcher = ReconciliationMatcher::new();
        let mut results = vec![
            tx("tx-1", "PIX ENVIADO ACME SOFTWARE", -450.0, 10),
            doc("doc-1", "ACME SOFTWARE", -450.0, 11),
        ];

        let report = matcher.reconcile(&mut results, &HashMap::new());
        assert_eq!(report.match_count(), 1);
        assert_eq!(report.document_for("tx-1"), Some("doc-1"));
        assert!(report.unmatched_transactions.is_empty());

        for (result, other) in results.iter().zip(["doc-1", "tx-1"]) {
            assert_eq!(result.matched_record_id.as_deref(), Some(other));
            assert_eq!(result.confidence, 1.0);
            assert_eq!(result.suggested_action, SuggestedAction::Archive);
            assert!(!result.needs_review);
        }
        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_equal_amounts_ten_days_apart_never_match() {
        let matcher = ReconciliationMatcher::new();
        let mut results = vec![
            tx("tx-1", "ACME SOFTWARE", -450.0, 1),
            doc("doc-1", "ACME SOFTWARE", -450.0, 11),
        ];

        let report = matcher.reconcile(&mut results, &HashMap::new());
        assert_eq!(report.match_count(), 0);
        assert_eq!(report.unmatched_documents, vec!["doc-1".to_string()]);
        assert!(results[0].matched_record_id.is_none());
    }

    #[test]
    fn test_document_matched_at_most_once() {
        let matcher = ReconciliationMatcher::new();
        let mut results = vec![
            tx("tx-a", "ACME SOFTWARE", -200.0, 5),
            tx("tx-b", "ACME SOFTWARE", -200.0, 9),
            doc("doc-1", "ACME SOFTWARE", -200.0, 5),
        ];

        let report = matcher.reconcile(&mut results, &HashMap::new());
        assert_eq!(report.match_count(), 1);
        // Closer date scores higher
        assert_eq!(report.matches[0].transaction_id, "tx-a");
        assert_eq!(report.unmatched_transactions, vec!["tx-b".to_string()]);
    }

    #[test]
    fn test_ties_resolved_by_ids() {
        let matcher = ReconciliationMatcher::new();
        let mut results = vec![
            tx("tx-2", "ACME", -80.0, 5),
            tx("tx-1", "ACME", -80.0, 5),
            doc("doc-2", "ACME", -80.0, 5),
            doc("doc-1", "ACME", -80.0, 5),
        ];

        let report = matcher.reconcile(&mut results, &HashMap::new());
        assert_eq!(report.match_count(), 2);
        assert_eq!(report.matches[0].document_id, "doc-1");
        assert_eq!(report.matches[0].transaction_id, "tx-1");
        assert_eq!(report.matches[1].document_id, "doc-2");
        assert_eq!(report.matches[1].transaction_id, "tx-2");
    }

    #[test]
    fn test_description_hint_overrides_counterparty() {
        let matcher = ReconciliationMatcher::new();
        let transaction = tx("tx-1", "BOLETO GLOBEX SERVICOS", -300.0, 8);
        let document = doc("doc-1", "UNRELATED VENDOR", -300.0, 14);

        let no_hint = matcher.score(&transaction, &document, "UNRELATED VENDOR");
        assert_eq!(no_hint.vendor_score, 0.0);
        assert!(no_hint.score < 0.75);

        let mut results = vec![transaction, document];
        let hints = HashMap::from([("doc-1".to_string(), "GLOBEX SERVICOS".to_string())]);
        let report = matcher.reconcile(&mut results, &hints);
        assert_eq!(report.match_count(), 1);
        assert_eq!(report.matches[0].vendor_score, 1.0);
    }
}
