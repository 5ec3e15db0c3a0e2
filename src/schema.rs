// 📐 Entry Schema - manual entries validated at the boundary
//
// Manual submissions arrive as JSON tagged by "kind":
//
//   {"kind": "marketing", "description": "...", "amount": -300.0,
//    "date": "2025-03-02", "channel": "Google Ads"}
//
// Each kind has its own required fields. parse_entry() deserializes,
// validates, and only then hands an UnclassifiedRecord to the engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::records::{SourceType, UnclassifiedRecord};

// ============================================================================
// ENTRY KINDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationsEntry {
    pub description: String,
    pub amount: f64,
    pub date: NaiveDate,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub cost_center: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketingEntry {
    pub description: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub channel: String,
    #[serde(default)]
    pub campaign: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommercialEntry {
    pub description: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub client: String,
    #[serde(default)]
    pub contract_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentEntry {
    pub description: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub asset: String,
    #[serde(default)]
    pub counterparty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    Operations(OperationsEntry),
    Marketing(MarketingEntry),
    Commercial(CommercialEntry),
    Investment(InvestmentEntry),
}

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

fn require_text(errors: &mut Vec<ValidationError>, context: &str, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError {
            field: field.to_string(),
            message: "Required field is empty".to_string(),
            context: context.to_string(),
        });
    }
}

fn require_amount(errors: &mut Vec<ValidationError>, context: &str, amount: f64) {
    if !amount.is_finite() || amount == 0.0 {
        errors.push(ValidationError {
            field: "amount".to_string(),
            message: format!("must be a non-zero number, got {}", amount),
            context: context.to_string(),
        });
    }
}

impl EntryPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EntryPayload::Operations(_) => "operations",
            EntryPayload::Marketing(_) => "marketing",
            EntryPayload::Commercial(_) => "commercial",
            EntryPayload::Investment(_) => "investment",
        }
    }

    fn common(&self) -> (&str, f64, NaiveDate) {
        match self {
            EntryPayload::Operations(e) => (&e.description, e.amount, e.date),
            EntryPayload::Marketing(e) => (&e.description, e.amount, e.date),
            EntryPayload::Commercial(e) => (&e.description, e.amount, e.date),
            EntryPayload::Investment(e) => (&e.description, e.amount, e.date),
        }
    }

    fn counterparty(&self) -> Option<&str> {
        let hint = match self {
            EntryPayload::Operations(e) => e.supplier.as_deref(),
            EntryPayload::Marketing(e) => Some(e.channel.as_str()),
            EntryPayload::Commercial(e) => Some(e.client.as_str()),
            EntryPayload::Investment(e) => e.counterparty.as_deref().or(Some(e.asset.as_str())),
        };
        hint.map(str::trim).filter(|h| !h.is_empty())
    }

    pub fn validate(&self) -> ValidationResult {
        let context = self.kind();
        let mut errors = Vec::new();

        let (description, amount, _) = self.common();
        require_text(&mut errors, context, "description", description);
        require_amount(&mut errors, context, amount);

        match self {
            EntryPayload::Operations(_) => {}
            EntryPayload::Marketing(e) => require_text(&mut errors, context, "channel", &e.channel),
            EntryPayload::Commercial(e) => require_text(&mut errors, context, "client", &e.client),
            EntryPayload::Investment(e) => require_text(&mut errors, context, "asset", &e.asset),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validated payload → record for the engine
    pub fn into_record(self) -> EngineResult<UnclassifiedRecord> {
        if let Err(errors) = self.validate() {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(EngineError::validation(messages.join("; ")));
        }

        let (description, amount, date) = self.common();
        let record = UnclassifiedRecord::new(String::new(), SourceType::Transaction, description.trim(), amount, date)
            .with_origin(format!("manual:{}", self.kind()));
        let mut record = match self.counterparty() {
            Some(hint) => record.with_counterparty(hint),
            None => record,
        };
        let fp = record.fingerprint();
        record.id = format!("entry-{}", &fp[..16]);
        Ok(record)
    }
}

/// Parse and validate one manual entry
pub fn parse_entry(json: &str) -> EngineResult<UnclassifiedRecord> {
    let payload: EntryPayload = serde_json::from_str(json)
        .map_err(|e| EngineError::validation(format!("invalid entry payload: {}", e)))?;
    payload.into_record()
}

// ============================================================================
// TESTS
// ============================================================================
