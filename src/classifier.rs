// 🎯 Classification Engine - ordered classifier strategies
//
// Resolution order (first strategy with a verdict wins):
//   1. LearnedRuleStrategy   - rules learned from human decisions
//   2. HeuristicStrategy     - pattern rules + recurring counterparties
//                              (description first, then the source's label hint)
//   3. LabelHintStrategy     - the source's own label guess, low confidence
//   4. FallbackStrategy      - garbled → Uncategorized, else sign default
//
// Classification is pure: strategies read immutable snapshots and never
// write. Any other tier (for instance a provider-backed model) implements
// ClassifierStrategy and is inserted into the list.

use std::collections::BTreeSet;

use crate::learning::{best_match, LearningRule};
use crate::records::{ClassificationResult, UnclassifiedRecord};
use crate::rules::RuleEngine;
use crate::tokens::{is_garbled, significant_tokens};

pub const UNCATEGORIZED: &str = "Uncategorized";
pub const DEFAULT_REVENUE: &str = "Other Revenue";
pub const DEFAULT_EXPENSE: &str = "Other Expense";

pub const GARBLED_CONFIDENCE: f64 = 0.10;
pub const SIGN_DEFAULT_CONFIDENCE: f64 = 0.60;
pub const LABEL_HINT_CONFIDENCE: f64 = 0.60;

/// Label + confidence proposed by one strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub category_label: String,
    pub confidence: f64,
}

impl Verdict {
    pub fn new(category_label: impl Into<String>, confidence: f64) -> Self {
        Verdict {
            category_label: category_label.into(),
            confidence,
        }
    }
}

pub trait ClassifierStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// None = this tier has no opinion, try the next one
    fn classify(&self, record: &UnclassifiedRecord) -> Option<Verdict>;
}

// ============================================================================
// STRATEGIES
// ============================================================================

/// Tier 1: best overlapping learned rule
pub struct LearnedRuleStrategy {
    rules: Vec<LearningRule>,
}

impl LearnedRuleStrategy {
    pub fn new(rules: Vec<LearningRule>) -> Self {
        LearnedRuleStrategy { rules }
    }

    pub fn best_for(&self, tokens: &BTreeSet<String>) -> Option<&LearningRule> {
        best_match(&self.rules, tokens)
    }
}

impl ClassifierStrategy for LearnedRuleStrategy {
    fn name(&self) -> &str {
        "learned_rules"
    }

    fn classify(&self, record: &UnclassifiedRecord) -> Option<Verdict> {
        if self.rules.is_empty() {
            return None;
        }
        let tokens = significant_tokens(&record.raw_description);
        self.best_for(&tokens)
            .map(|rule| Verdict::new(rule.category_label.clone(), rule.confidence()))
    }
}

/// Tier 2: heuristic pattern rules
pub struct HeuristicStrategy {
    engine: RuleEngine,
}

impl HeuristicStrategy {
    pub fn new(engine: RuleEngine) -> Self {
        HeuristicStrategy { engine }
    }
}

impl ClassifierStrategy for HeuristicStrategy {
    fn name(&self) -> &str {
        "heuristics"
    }

    fn classify(&self, record: &UnclassifiedRecord) -> Option<Verdict> {
        self.engine
            .classify(record)
            .map(|m| Verdict::new(m.category, m.confidence))
    }
}

/// Tier 3: a label guessed by the source (document line items)
pub struct LabelHintStrategy;

impl ClassifierStrategy for LabelHintStrategy {
    fn name(&self) -> &str {
        "label_hint"
    }

    fn classify(&self, record: &UnclassifiedRecord) -> Option<Verdict> {
        let hint = record.label_hint.as_deref()?.trim();
        if hint.is_empty() {
            return None;
        }
        Some(Verdict::new(hint, LABEL_HINT_CONFIDENCE))
    }
}

/// Tier 4: always answers, always at low confidence
pub struct FallbackStrategy;

impl ClassifierStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        "fallback"
    }

    fn classify(&self, record: &UnclassifiedRecord) -> Option<Verdict> {
        if is_garbled(&record.raw_description) {
            return Some(Verdict::new(UNCATEGORIZED, GARBLED_CONFIDENCE));
        }
        let verdict = if record.amount > 0.0 {
            Verdict::new(DEFAULT_REVENUE, SIGN_DEFAULT_CONFIDENCE)
        } else if record.amount < 0.0 {
            Verdict::new(DEFAULT_EXPENSE, SIGN_DEFAULT_CONFIDENCE)
        } else {
            Verdict::new(UNCATEGORIZED, GARBLED_CONFIDENCE)
        };
        Some(verdict)
    }
}

// ============================================================================
// CLASSIFICATION ENGINE
// ============================================================================

pub struct ClassificationEngine {
    strategies: Vec<Box<dyn ClassifierStrategy>>,
}

impl ClassificationEngine {
    /// Engine with an explicit strategy order
    pub fn new(strategies: Vec<Box<dyn ClassifierStrategy>>) -> Self {
        ClassificationEngine { strategies }
    }

    /// learned rules → heuristics → label hint → fallback
    pub fn standard(rules: Vec<LearningRule>, heuristics: RuleEngine) -> Self {
        ClassificationEngine::new(vec![
            Box::new(LearnedRuleStrategy::new(rules)),
            Box::new(HeuristicStrategy::new(heuristics)),
            Box::new(LabelHintStrategy),
            Box::new(FallbackStrategy),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn classify(&self, record: &UnclassifiedRecord) -> ClassificationResult {
        for strategy in &self.strategies {
            if let Some(verdict) = strategy.classify(record) {
                return ClassificationResult::from_record(
                    record,
                    verdict.category_label,
                    verdict.confidence,
                    strategy.name(),
                );
            }
        }

        // Only reachable with a custom list that has no catch-all tier
        ClassificationResult::from_record(record, UNCATEGORIZED, 0.0, "none")
    }

    pub fn classify_all(&self, records: &[UnclassifiedRecord]) -> Vec<ClassificationResult> {
        records.iter().map(|r| self.classify(r)).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{SourceType, SuggestedAction};
    use crate::rules::HeuristicRule;
    use chrono::NaiveDate;

    fn record(description: &str, amount: f64) -> UnclassifiedRecord {
        UnclassifiedRecord::new(
            "r1",
            SourceType::Transaction,
            description,
            amount,
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
        )
    }

    fn learned(description: &str, label: &str, hits: u32) -> LearningRule {
        let mut rule = LearningRule::new(significant_tokens(description), label, description);
        rule.hit_count = hits;
        rule
    }

    #[test]
    fn test_learned_rule_wins_over_heuristics() {
        let rules = vec![learned("ALUGUEL SALA COMERCIAL", "Office Rent", 1)];
        let engine = ClassificationEngine::standard(rules, RuleEngine::with_defaults());

        let result = engine.classify(&record("ALUGUEL SALA COMERCIAL MAIO", -3000.0));
        assert_eq!(result.category_label, "Office Rent");
        assert_eq!(result.confidence, 0.83);
        assert_eq!(result.classified_by, "learned_rules");
        assert_eq!(result.suggested_action, SuggestedAction::Investigate);
        assert!(result.needs_review);
    }

    #[test]
    fn test_learned_confidence_capped() {
        let rules = vec![learned("CONTRATO SOFTWARE XYZ", "Software Fixed Cost", 40)];
        let engine = ClassificationEngine::standard(rules, RuleEngine::new());

        let result = engine.classify(&record("CONTRATO SOFTWARE XYZ", -99.0));
        assert_eq!(result.confidence, 0.97);
        assert_eq!(result.suggested_action, SuggestedAction::Approve);
        assert!(!result.needs_review);
    }

    #[test]
    fn test_heuristic_tier() {
        let heuristics = RuleEngine::from_rules(vec![
            HeuristicRule::new("rent", "*ALUGUEL*", "Rent").with_counterparties(&["IMOB-1"]),
        ]);
        let engine = ClassificationEngine::standard(Vec::new(), heuristics);

        let plain = engine.classify(&record("ALUGUEL JUNHO", -2500.0));
        assert_eq!(plain.category_label, "Rent");
        assert_eq!(plain.classified_by, "heuristics");
        assert_eq!(plain.suggested_action, SuggestedAction::Investigate);

        let recurring = engine.classify(&record("ALUGUEL JUNHO", -2500.0).with_counterparty("IMOB-1"));
        assert!(recurring.confidence > 0.85);
        assert_eq!(recurring.suggested_action, SuggestedAction::Approve);
    }

    #[test]
    fn test_sign_defaults() {
        let engine = ClassificationEngine::standard(Vec::new(), RuleEngine::new());

        let credit = engine.classify(&record("PIX RECEBIDO CLIENTE", 800.0));
        assert_eq!(credit.category_label, DEFAULT_REVENUE);
        assert_eq!(credit.confidence, SIGN_DEFAULT_CONFIDENCE);
        assert!(credit.needs_review);

        let debit = engine.classify(&record("PIX ENVIADO FORNECEDOR", -800.0));
        assert_eq!(debit.category_label, DEFAULT_EXPENSE);
        assert_eq!(debit.classified_by, "fallback");
    }

    #[test]
    fn test_label_hint_tier() {
        let engine = ClassificationEngine::standard(Vec::new(), RuleEngine::with_defaults());
        assert_eq!(
            engine.strategy_names(),
            vec!["learned_rules", "heuristics", "label_hint", "fallback"]
        );

        let line = record("Licenca anual", -450.0).with_label_hint("Software");
        let result = engine.classify(&line);
        assert_eq!(result.category_label, "Software");
        assert_eq!(result.classified_by, "label_hint");
        assert_eq!(result.confidence, LABEL_HINT_CONFIDENCE);
        assert!(result.needs_review);

        // A hint that a heuristic rule recognises gets the heuristic label
        let rent = engine.classify(&record("Servico ref 04", -3000.0).with_label_hint("Aluguel sala"));
        assert_eq!(rent.category_label, "Rent");
        assert_eq!(rent.classified_by, "heuristics");
    }

    #[test]
    fn test_garbled_description_is_uncategorized() {
        let engine = ClassificationEngine::standard(Vec::new(), RuleEngine::with_defaults());

        for description in ["", "   ", "#$% 12 --", "x1"] {
            let result = engine.classify(&record(description, -10.0));
            assert_eq!(result.category_label, UNCATEGORIZED, "{:?}", description);
            assert_eq!(result.confidence, GARBLED_CONFIDENCE);
            assert!(result.needs_review);
        }
    }

    struct FixedStrategy;

    impl ClassifierStrategy for FixedStrategy {
        fn name(&self) -> &str {
            "fixed"
        }

        fn classify(&self, record: &UnclassifiedRecord) -> Option<Verdict> {
            if record.raw_description.contains("MODEL") {
                Some(Verdict::new("Model Label", 0.91))
            } else {
                None
            }
        }
    }

    #[test]
    fn test_custom_strategy_order() {
        let engine = ClassificationEngine::new(vec![
            Box::new(LearnedRuleStrategy::new(Vec::new())),
            Box::new(FixedStrategy),
            Box::new(FallbackStrategy),
        ]);
        assert_eq!(engine.strategy_names(), vec!["learned_rules", "fixed", "fallback"]);

        let hit = engine.classify(&record("MODEL SAYS SO", -1.0));
        assert_eq!(hit.category_label, "Model Label");
        assert_eq!(hit.classified_by, "fixed");

        let miss = engine.classify(&record("SOMETHING ELSE", -1.0));
        assert_eq!(miss.classified_by, "fallback");
    }

    #[test]
    fn test_empty_strategy_list_is_uncategorized() {
        let engine = ClassificationEngine::new(Vec::new());
        let result = engine.classify(&record("ANYTHING", -1.0));
        assert_eq!(result.category_label, UNCATEGORIZED);
        assert_eq!(result.confidence, 0.0);
    }
}
