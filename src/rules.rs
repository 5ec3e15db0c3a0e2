// 🏷️ Heuristic Rules - Rules as Data
// Pattern matching over descriptions, with recurring-counterparty boosts
//
// A matching rule gives the base heuristic confidence (0.85). When the
// record's counterparty is one of the rule's known recurring counterparties
// the confidence is raised above the base (0.92 by default).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::EngineResult;
use crate::records::UnclassifiedRecord;

pub const HEURISTIC_BASE_CONFIDENCE: f64 = 0.85;
pub const RECURRING_COUNTERPARTY_BONUS: f64 = 0.07;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicRule {
    /// Rule ID for tracking
    pub id: String,

    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Category to assign
    pub category: String,

    /// Counterparty ids seen on a recurring basis for this rule
    #[serde(default)]
    pub recurring_counterparties: Vec<String>,

    /// Description/notes about this rule
    pub description: Option<String>,

    /// Priority (higher = applied first)
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    0
}

impl HeuristicRule {
    pub fn new(id: &str, pattern: &str, category: &str) -> Self {
        HeuristicRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            category: category.to_string(),
            recurring_counterparties: Vec::new(),
            description: None,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_counterparties(mut self, ids: &[&str]) -> Self {
        self.recurring_counterparties = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Check if pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        let pattern_lower = self.pattern.to_lowercase();
        let text_lower = text.to_lowercase();

        if pattern_lower.contains('*') {
            // Wildcard matching
            let parts: Vec<&str> = pattern_lower.split('*').collect();
            let first = parts[0];
            let last = parts[parts.len() - 1];

            // Prefix and suffix must not share characters
            if text_lower.len() < first.len() + last.len() {
                return false;
            }
            if !text_lower.starts_with(first) || !text_lower.ends_with(last) {
                return false;
            }

            // Middle parts appear in order, strictly between prefix and suffix
            let mut rest = &text_lower[first.len()..text_lower.len() - last.len()];
            for part in &parts[1..parts.len() - 1] {
                if part.is_empty() {
                    continue;
                }
                match rest.find(part) {
                    Some(pos) => rest = &rest[pos + part.len()..],
                    None => return false,
                }
            }

            true
        } else {
            // Substring match (case-insensitive)
            text_lower.contains(&pattern_lower)
        }
    }

    pub fn is_recurring(&self, counterparty: Option<&str>) -> bool {
        match counterparty {
            Some(id) => self
                .recurring_counterparties
                .iter()
                .any(|known| known.eq_ignore_ascii_case(id.trim())),
            None => false,
        }
    }
}

// ============================================================================
// HEURISTIC MATCH
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicMatch {
    pub category: String,
    pub confidence: f64,
    pub rule_id: String,
    pub recurring: bool,
}

// ============================================================================
// RULE ENGINE
// ============================================================================

#[derive(Clone)]
pub struct RuleEngine {
    rules: Vec<HeuristicRule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// Built-in rules for common recurring business costs
    pub fn with_defaults() -> Self {
        RuleEngine::from_rules(vec![
            HeuristicRule::new("rent", "*ALUGUEL*", "Rent").with_priority(10),
            HeuristicRule::new("rent_en", "*OFFICE RENT*", "Rent").with_priority(5),
            HeuristicRule::new("payroll", "*FOLHA*", "Payroll").with_priority(10),
            HeuristicRule::new("payroll_en", "*PAYROLL*", "Payroll").with_priority(10),
            HeuristicRule::new("energy", "*ENERGIA*", "Utilities").with_priority(5),
            HeuristicRule::new("internet", "*INTERNET*", "Utilities").with_priority(5),
            HeuristicRule::new("aws", "*AWS*", "Software Fixed Cost").with_priority(8),
            HeuristicRule::new("google_ads", "*GOOGLE*ADS*", "Marketing").with_priority(9),
            HeuristicRule::new("meta_ads", "*FACEBK*", "Marketing").with_priority(9),
            HeuristicRule::new("taxes", "*DARF*", "Taxes").with_priority(10),
            HeuristicRule::new("taxes_das", "*SIMPLES NACIONAL*", "Taxes").with_priority(10),
            HeuristicRule::new("bank_fees", "*TARIFA*", "Bank Fees").with_priority(3),
        ])
    }

    /// Load rules from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let rules: Vec<HeuristicRule> = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.as_ref().display(), rules = rules.len(), "heuristic rules loaded");
        Ok(RuleEngine::from_rules(rules))
    }

    /// Create engine from a list of rules
    pub fn from_rules(mut rules: Vec<HeuristicRule>) -> Self {
        // Sort by priority (higher first); stable sort keeps file order for ties
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleEngine { rules }
    }

    /// Add a single rule
    pub fn add_rule(&mut self, rule: HeuristicRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Append every rule of `other` (e.g. a rules file on top of the defaults)
    pub fn extend(&mut self, other: RuleEngine) {
        self.rules.extend(other.rules);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// First matching rule (by priority) for a record. The description is
    /// tried first; the source's own label hint only when nothing matched it.
    pub fn classify(&self, record: &UnclassifiedRecord) -> Option<HeuristicMatch> {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.matches(&record.raw_description))
            .or_else(|| {
                let hint = record.label_hint.as_deref()?;
                self.rules.iter().find(|rule| rule.matches(hint))
            })?;

        let recurring = rule.is_recurring(record.counterparty_hint.as_deref());
        let confidence = if recurring {
            HEURISTIC_BASE_CONFIDENCE + RECURRING_COUNTERPARTY_BONUS
        } else {
            HEURISTIC_BASE_CONFIDENCE
        };

        Some(HeuristicMatch {
            category: rule.category.clone(),
            confidence,
            rule_id: rule.id.clone(),
            recurring,
        })
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================
