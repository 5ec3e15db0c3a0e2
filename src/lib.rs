// Decision Engine - Core Library
// Classification, budget audit, reconciliation and approval of financial records.
// Exposes all modules for use in the CLI and tests.

pub mod error;
pub mod tokens;         // Token extraction shared by learning + reconciliation
pub mod records;        // Records, results, decision records
pub mod audit;          // Append-only audit trail entries
pub mod store;          // RecordStore trait + in-memory store
pub mod db;             // SQLite RecordStore
pub mod learning;       // Rules learned from human confirmations
pub mod rules;          // Heuristic pattern rules
pub mod classifier;     // Ordered classification strategies
pub mod budget;         // Budget auditor + category cache
pub mod entities;       // Versioned category registry
pub mod reconciliation; // Transaction ↔ document matching
pub mod workflow;       // Approve / reject / reclassify state machine
pub mod sources;        // Statement + document sources
pub mod schema;         // Manual entry validation
pub mod config;         // TOML configuration
pub mod pipeline;       // Sync cycle

// Re-export commonly used types
pub use error::{EngineError, EngineResult};
pub use records::{
    ClassificationResult, DateOverrides, DecisionFilter, DecisionRecord, DecisionStatus,
    Severity, SourceType, SuggestedAction, UnclassifiedRecord, APPROVAL_THRESHOLD,
};
pub use audit::{AuditAction, AuditLogEntry};
pub use store::{InsertOutcome, MemoryStore, RecordStore, Transition};
pub use db::SqliteStore;
pub use learning::{LearnOutcome, LearningRule, LearningStore};
pub use rules::{HeuristicRule, RuleEngine};
pub use classifier::{ClassificationEngine, ClassifierStrategy};
pub use budget::{AccountingType, BudgetAuditor, CategoryCache, CategoryPolicy};
pub use entities::{Category, CategoryRegistry, CategorySeed};
pub use reconciliation::{MatchSettings, ReconciliationMatcher, ReconciliationReport};
pub use workflow::ApprovalWorkflow;
pub use sources::{DateWindow, DocumentSource, StatementSource};
pub use schema::parse_entry;
pub use config::Config;
pub use pipeline::{NotificationPayload, SyncPipeline, SyncReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
