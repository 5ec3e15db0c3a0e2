// 📜 Audit Trail - append-only log of decision record transitions
//
// "Every change is an event": each approve / reject / reclassify writes one
// entry with full before/after snapshots; a late reconciliation link made by
// a sync cycle writes a "reconcile" entry; clear_all writes one entry for the
// whole bulk deletion (decision_record_id = "*").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// decision_record_id used by bulk entries
pub const ALL_RECORDS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Approve,
    Reject,
    Reclassify,
    Reconcile,
    ClearAll,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Approve => "approve",
            AuditAction::Reject => "reject",
            AuditAction::Reclassify => "reclassify",
            AuditAction::Reconcile => "reconcile",
            AuditAction::ClearAll => "clear_all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(AuditAction::Approve),
            "reject" => Some(AuditAction::Reject),
            "reclassify" => Some(AuditAction::Reclassify),
            "reconcile" => Some(AuditAction::Reconcile),
            "clear_all" => Some(AuditAction::ClearAll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub decision_record_id: String,
    pub action: AuditAction,
    pub before_snapshot: serde_json::Value,
    pub after_snapshot: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
}

impl AuditLogEntry {
    pub fn new(
        decision_record_id: &str,
        action: AuditAction,
        before_snapshot: serde_json::Value,
        after_snapshot: serde_json::Value,
        actor: &str,
    ) -> Self {
        AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            decision_record_id: decision_record_id.to_string(),
            action,
            before_snapshot,
            after_snapshot,
            timestamp: Utc::now(),
            actor: actor.to_string(),
        }
    }

    pub fn is_bulk(&self) -> bool {
        self.decision_record_id == ALL_RECORDS
    }
}
