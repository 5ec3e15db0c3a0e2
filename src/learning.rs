// 🧠 Learning Store - token rules learned from human decisions
//
// learn(description, label):
//   1. Extract significant tokens (see tokens.rs)
//   2. Fewer than 2 tokens → skip (nothing general enough to learn)
//   3. Same token set + label exists → hit_count += 1
//   4. Otherwise → new rule with hit_count = 1
//
// Confidence grows with usage but never reaches 1.0 through learning alone:
//   confidence = min(0.97, 0.80 + hits × 0.03)
//
// Rules are never deleted. Stale rules do not decay.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::store::RecordStore;
use crate::tokens::{significant_tokens, token_key};

/// Minimum significant tokens required to create a rule
pub const MIN_RULE_TOKENS: usize = 2;

const BASE_CONFIDENCE_PCT: u32 = 80;
const STEP_PCT: u32 = 3;
const MAX_CONFIDENCE_PCT: u32 = 97;

/// Confidence for a rule confirmed `hits` times (in hundredths, so 0.83 is exact)
pub fn learning_confidence(hits: u32) -> f64 {
    let pct = BASE_CONFIDENCE_PCT
        .saturating_add(hits.saturating_mul(STEP_PCT))
        .min(MAX_CONFIDENCE_PCT);
    pct as f64 / 100.0
}

// ============================================================================
// LEARNING RULE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRule {
    pub id: String,
    pub tokens: BTreeSet<String>,
    pub category_label: String,
    pub hit_count: u32,
    pub derived_confidence: f64,
    pub original_description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LearningRule {
    pub fn new(tokens: BTreeSet<String>, category_label: &str, original_description: &str) -> Self {
        let now = Utc::now();
        LearningRule {
            id: uuid::Uuid::new_v4().to_string(),
            tokens,
            category_label: category_label.to_string(),
            hit_count: 1,
            derived_confidence: learning_confidence(1),
            original_description: original_description.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn token_key(&self) -> String {
        token_key(&self.tokens)
    }

    /// Number of this rule's tokens present in `tokens`
    pub fn overlap(&self, tokens: &BTreeSet<String>) -> usize {
        self.tokens.intersection(tokens).count()
    }

    pub fn reinforce(&mut self) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.derived_confidence = learning_confidence(self.hit_count);
        self.updated_at = Utc::now();
    }

    pub fn confidence(&self) -> f64 {
        learning_confidence(self.hit_count)
    }
}

/// Best rule for a token set: most shared tokens (≥ 2), then highest
/// hit_count, then oldest rule.
pub fn best_match<'a>(rules: &'a [LearningRule], tokens: &BTreeSet<String>) -> Option<&'a LearningRule> {
    rules
        .iter()
        .map(|rule| (rule.overlap(tokens), rule))
        .filter(|(overlap, _)| *overlap >= MIN_RULE_TOKENS)
        .max_by(|(oa, a), (ob, b)| {
            oa.cmp(ob)
                .then(a.hit_count.cmp(&b.hit_count))
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        })
        .map(|(_, rule)| rule)
}

// ============================================================================
// LEARNING STORE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LearnOutcome {
    /// Not enough significant tokens, nothing stored
    Skipped { tokens: usize },
    Created(LearningRule),
    Reinforced(LearningRule),
}

impl LearnOutcome {
    pub fn rule(&self) -> Option<&LearningRule> {
        match self {
            LearnOutcome::Skipped { .. } => None,
            LearnOutcome::Created(rule) | LearnOutcome::Reinforced(rule) => Some(rule),
        }
    }
}

pub struct LearningStore {
    store: Arc<dyn RecordStore>,
}

impl LearningStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        LearningStore { store }
    }

    /// Record a human-confirmed label for a description
    pub fn learn(&self, description: &str, confirmed_label: &str) -> EngineResult<LearnOutcome> {
        let label = confirmed_label.trim();
        if label.is_empty() {
            return Err(EngineError::validation("confirmed label must not be empty"));
        }

        let tokens = significant_tokens(description);
        if tokens.len() < MIN_RULE_TOKENS {
            tracing::info!(
                description,
                tokens = tokens.len(),
                "not enough significant tokens, no rule learned"
            );
            return Ok(LearnOutcome::Skipped { tokens: tokens.len() });
        }

        let key = token_key(&tokens);
        match self.store.find_rule(&key, label)? {
            Some(mut rule) => {
                rule.reinforce();
                self.store.save_rule(&rule)?;
                tracing::debug!(rule_id = %rule.id, hits = rule.hit_count, label, "rule reinforced");
                Ok(LearnOutcome::Reinforced(rule))
            }
            None => {
                let rule = LearningRule::new(tokens, label, description);
                self.store.save_rule(&rule)?;
                tracing::info!(rule_id = %rule.id, tokens = %key, label, "rule learned");
                Ok(LearnOutcome::Created(rule))
            }
        }
    }

    /// All rules, for a pure classification pass
    pub fn snapshot(&self) -> EngineResult<Vec<LearningRule>> {
        self.store.list_rules()
    }

    pub fn rule_count(&self) -> EngineResult<usize> {
        Ok(self.store.list_rules()?.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================
