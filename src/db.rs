// 🗄️ SQLite Record Store - rusqlite + WAL
//
// Tables:
// - decisions:      typed, indexed columns + full JSON snapshot of the record
// - audit_log:      append-only, ordered by insertion (seq)
// - learning_rules: one row per (token_key, category_label)
//
// The fingerprint column is UNIQUE: a second insert of the same content is
// reported as a duplicate, never as an error. A transition re-reads the row,
// checks its status, updates it and appends the audit row in one
// transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::audit::{AuditAction, AuditLogEntry};
use crate::error::{EngineError, EngineResult};
use crate::learning::LearningRule;
use crate::records::{DecisionFilter, DecisionPatch, DecisionRecord, DecisionStatus};
use crate::store::{prepare_transition, InsertOutcome, RecordStore, Transition};

pub fn setup_database(conn: &Connection) -> EngineResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Decision records
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS decisions (
            id TEXT PRIMARY KEY,
            fingerprint TEXT UNIQUE NOT NULL,
            record_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            status TEXT NOT NULL,
            category_label TEXT NOT NULL,
            confidence REAL NOT NULL,
            needs_review INTEGER NOT NULL,
            amount REAL NOT NULL,
            occurred_at TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Audit trail (append-only)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            decision_record_id TEXT NOT NULL,
            action TEXT NOT NULL,
            before_snapshot TEXT NOT NULL,
            after_snapshot TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Learning rules
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS learning_rules (
            id TEXT PRIMARY KEY,
            token_key TEXT NOT NULL,
            category_label TEXT NOT NULL,
            hit_count INTEGER NOT NULL,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(token_key, category_label)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_status ON decisions(status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_decisions_category ON decisions(category_label COLLATE NOCASE)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_decision ON audit_log(decision_record_id)",
        [],
    )?;

    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_timestamp(value: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::persistence(format!("bad timestamp '{}': {}", value, e)))
}

fn write_decision(conn: &Connection, record: &DecisionRecord) -> EngineResult<usize> {
    let snapshot = serde_json::to_string(record)?;
    let changed = conn.execute(
        "UPDATE decisions SET
            status = ?2, category_label = ?3, confidence = ?4, needs_review = ?5,
            snapshot = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            record.id,
            record.status.as_str(),
            record.category_label,
            record.confidence,
            record.needs_review,
            snapshot,
            record.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(changed)
}

fn insert_audit(conn: &Connection, entry: &AuditLogEntry) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO audit_log (
            id, decision_record_id, action, before_snapshot, after_snapshot, timestamp, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.decision_record_id,
            entry.action.as_str(),
            serde_json::to_string(&entry.before_snapshot)?,
            serde_json::to_string(&entry.after_snapshot)?,
            entry.timestamp.to_rfc3339(),
            entry.actor,
        ],
    )?;
    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        setup_database(&conn)?;
        tracing::debug!(path = %path.as_ref().display(), "sqlite store opened");
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::persistence("sqlite connection lock poisoned"))
    }
}

impl RecordStore for SqliteStore {
    fn insert_decision(&self, record: &DecisionRecord) -> EngineResult<InsertOutcome> {
        let conn = self.conn()?;
        let snapshot = serde_json::to_string(record)?;

        let result = conn.execute(
            "INSERT INTO decisions (
                id, fingerprint, record_id, source_type, status, category_label,
                confidence, needs_review, amount, occurred_at, snapshot, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.fingerprint,
                record.record_id,
                record.source_type.as_str(),
                record.status.as_str(),
                record.category_label,
                record.confidence,
                record.needs_review,
                record.amount,
                record.occurred_at.format("%Y-%m-%d").to_string(),
                snapshot,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_constraint_violation(&e) => {
                let fingerprint_taken: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM decisions WHERE fingerprint = ?1)",
                    params![record.fingerprint],
                    |row| row.get(0),
                )?;
                if fingerprint_taken {
                    Ok(InsertOutcome::Duplicate)
                } else {
                    Err(EngineError::persistence(format!(
                        "decision record id already exists: {}",
                        record.id
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_decision(&self, id: &str) -> EngineResult<Option<DecisionRecord>> {
        let conn = self.conn()?;
        let snapshot: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM decisions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match snapshot {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn list_decisions(&self, filter: &DecisionFilter) -> EngineResult<Vec<DecisionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT snapshot FROM decisions
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR category_label = ?2 COLLATE NOCASE)
             ORDER BY created_at, id",
        )?;

        let status = filter.status.map(|s| s.as_str());
        let snapshots = stmt
            .query_map(params![status, filter.category_label], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        snapshots
            .iter()
            .map(|json| serde_json::from_str(json).map_err(EngineError::from))
            .collect()
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> EngineResult<Option<DecisionRecord>> {
        let conn = self.conn()?;
        let snapshot: Option<String> = conn
            .query_row(
                "SELECT snapshot FROM decisions WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;

        match snapshot {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn transition(
        &self,
        id: &str,
        expected: Option<DecisionStatus>,
        patch: &DecisionPatch,
        action: AuditAction,
        actor: &str,
    ) -> EngineResult<Transition> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let snapshot: Option<String> = tx
            .query_row(
                "SELECT snapshot FROM decisions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let current: DecisionRecord = match snapshot {
            Some(json) => serde_json::from_str(&json)?,
            None => return Err(EngineError::NotFound(id.to_string())),
        };

        // Any early return drops `tx`, which rolls back
        let transition = prepare_transition(&current, expected, patch, action, actor)?;
        write_decision(&tx, &transition.after)?;
        insert_audit(&tx, &transition.entry)?;
        tx.commit()?;
        Ok(transition)
    }

    fn clear_decisions(&self, entry: &AuditLogEntry) -> EngineResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM decisions", [])?;
        insert_audit(&tx, entry)?;
        tx.commit()?;
        Ok(removed)
    }

    fn count_decisions(&self) -> EngineResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn fingerprint_exists(&self, fingerprint: &str) -> EngineResult<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM decisions WHERE fingerprint = ?1)",
            params![fingerprint],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn append_audit_entry(&self, entry: &AuditLogEntry) -> EngineResult<()> {
        let conn = self.conn()?;
        insert_audit(&conn, entry)
    }

    fn audit_entries(&self, decision_record_id: &str) -> EngineResult<Vec<AuditLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, decision_record_id, action, before_snapshot, after_snapshot, timestamp, actor
             FROM audit_log
             WHERE decision_record_id = ?1
             ORDER BY seq",
        )?;

        let rows = stmt
            .query_map(params![decision_record_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, record_id, action, before, after, timestamp, actor)| -> EngineResult<AuditLogEntry> {
                let action = AuditAction::parse(&action)
                    .ok_or_else(|| EngineError::persistence(format!("unknown audit action '{}'", action)))?;
                Ok(AuditLogEntry {
                    id,
                    decision_record_id: record_id,
                    action,
                    before_snapshot: serde_json::from_str(&before)?,
                    after_snapshot: serde_json::from_str(&after)?,
                    timestamp: parse_timestamp(&timestamp)?,
                    actor,
                })
            })
            .collect()
    }

    fn find_rule(&self, token_key: &str, category_label: &str) -> EngineResult<Option<LearningRule>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM learning_rules WHERE token_key = ?1 AND category_label = ?2",
                params![token_key, category_label],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_rule(&self, rule: &LearningRule) -> EngineResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO learning_rules (id, token_key, category_label, hit_count, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                hit_count = excluded.hit_count,
                data = excluded.data",
            params![
                rule.id,
                rule.token_key(),
                rule.category_label,
                rule.hit_count,
                serde_json::to_string(rule)?,
                rule.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_rules(&self) -> EngineResult<Vec<LearningRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM learning_rules ORDER BY created_at, id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(EngineError::from))
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
