// 🏦 Sources - bank statements and supporting documents
//
// Both sources are async (network or disk in production). The pipeline
// fetches them concurrently; a failing source degrades to an empty list.
//
// Raw items become UnclassifiedRecords with deterministic ids derived from
// their content fingerprint ("tx-…" / "doc-…"), so overlapping sync windows
// produce the same ids.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::records::{SourceType, UnclassifiedRecord};

const ID_PREFIX_LEN: usize = 16;

// ============================================================================
// RAW ITEMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBankTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub counterparty_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub label_guess: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub issued_at: NaiveDate,
    pub vendor: String,
    /// How the vendor shows up on bank statements, when known
    #[serde(default)]
    pub statement_descriptor: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

/// Inclusive date range of one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> EngineResult<Self> {
        if start > end {
            return Err(EngineError::validation(format!(
                "window start {} is after end {}",
                start, end
            )));
        }
        Ok(DateWindow { start, end })
    }

    /// The `days` days ending at `end` (inclusive)
    pub fn last_days(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        DateWindow {
            start: end - Duration::days(span),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

// ============================================================================
// SOURCE TRAITS
// ============================================================================

#[async_trait]
pub trait StatementSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, window: &DateWindow) -> EngineResult<Vec<RawBankTransaction>>;
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn name(&self) -> &str;

    async fn poll(&self, window: &DateWindow) -> EngineResult<Vec<RawDocument>>;
}

// ============================================================================
// CONVERSION
// ============================================================================

fn record_id(prefix: &str, fingerprint: &str) -> String {
    let end = ID_PREFIX_LEN.min(fingerprint.len());
    format!("{}-{}", prefix, &fingerprint[..end])
}

pub fn transactions_to_records(origin: &str, raw: &[RawBankTransaction]) -> Vec<UnclassifiedRecord> {
    raw.iter()
        .map(|tx| {
            let record = UnclassifiedRecord::new(
                String::new(),
                SourceType::Transaction,
                tx.description.clone(),
                tx.amount,
                tx.date,
            )
            .with_origin(origin);
            let mut record = match &tx.counterparty_id {
                Some(id) if !id.trim().is_empty() => record.with_counterparty(id.trim()),
                _ => record,
            };
            record.id = record_id("tx", &record.fingerprint());
            record
        })
        .collect()
}

/// One record per line item, plus the vendor hints used by reconciliation
pub fn documents_to_records(
    origin: &str,
    raw: &[RawDocument],
) -> (Vec<UnclassifiedRecord>, HashMap<String, String>) {
    let mut records = Vec::new();
    let mut hints = HashMap::new();

    for document in raw {
        for item in &document.line_items {
            let description = item
                .description
                .clone()
                .or_else(|| item.label_guess.clone())
                .unwrap_or_else(|| document.vendor.clone());
            let vendor = item.vendor.clone().unwrap_or_else(|| document.vendor.clone());

            let mut record =
                UnclassifiedRecord::new(String::new(), SourceType::Document, description, item.amount, document.issued_at)
                    .with_counterparty(vendor)
                    .with_origin(origin);
            if let Some(guess) = &item.label_guess {
                record = record.with_label_hint(guess.clone());
            }
            record.id = record_id("doc", &record.fingerprint());

            if let Some(descriptor) = &document.statement_descriptor {
                hints.insert(record.id.clone(), descriptor.clone());
            }

            records.push(record);
        }
    }

    (records, hints)
}

// ============================================================================
// FILE ADAPTERS
// ============================================================================

/// Bank statement export (CSV with date, description, amount, counterparty_id)
pub struct CsvStatementSource {
    name: String,
    path: PathBuf,
}

impl CsvStatementSource {
    pub fn new<P: AsRef<Path>>(name: &str, path: P) -> Self {
        CsvStatementSource {
            name: name.to_string(),
            path: path.as_ref().to_path_buf(),
        }
    }

    fn parse(content: &str) -> EngineResult<Vec<RawBankTransaction>> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut transactions = Vec::new();
        for row in rdr.deserialize() {
            let tx: RawBankTransaction = row?;
            transactions.push(tx);
        }
        Ok(transactions)
    }
}

#[async_trait]
impl StatementSource for CsvStatementSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, window: &DateWindow) -> EngineResult<Vec<RawBankTransaction>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EngineError::upstream(&self.name, format!("{}: {}", self.path.display(), e)))?;
        let all = Self::parse(&content).map_err(|e| EngineError::upstream(&self.name, e.to_string()))?;
        Ok(all.into_iter().filter(|tx| window.contains(tx.date)).collect())
    }
}

/// Document feed exported as a JSON array of documents
pub struct JsonDocumentSource {
    name: String,
    path: PathBuf,
}

impl JsonDocumentSource {
    pub fn new<P: AsRef<Path>>(name: &str, path: P) -> Self {
        JsonDocumentSource {
            name: name.to_string(),
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DocumentSource for JsonDocumentSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, window: &DateWindow) -> EngineResult<Vec<RawDocument>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EngineError::upstream(&self.name, format!("{}: {}", self.path.display(), e)))?;
        let all: Vec<RawDocument> =
            serde_json::from_str(&content).map_err(|e| EngineError::upstream(&self.name, e.to_string()))?;
        Ok(all.into_iter().filter(|d| window.contains(d.issued_at)).collect())
    }
}

// ============================================================================
// IN-MEMORY ADAPTERS (dry runs and tests)
// ============================================================================

#[derive(Default)]
pub struct MemoryStatementSource {
    pub transactions: Vec<RawBankTransaction>,
}

#[async_trait]
impl StatementSource for MemoryStatementSource {
    fn name(&self) -> &str {
        "memory_statements"
    }

    async fn fetch(&self, window: &DateWindow) -> EngineResult<Vec<RawBankTransaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|tx| window.contains(tx.date))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryDocumentSource {
    pub documents: Vec<RawDocument>,
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    fn name(&self) -> &str {
        "memory_documents"
    }

    async fn poll(&self, window: &DateWindow) -> EngineResult<Vec<RawDocument>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| window.contains(d.issued_at))
            .cloned()
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    #[test]
    fn test_window() {
        let window = DateWindow::last_days(date(3, 31), 31);
        assert_eq!(window.start, date(3, 1));
        assert!(window.contains(date(3, 1)));
        assert!(window.contains(date(3, 31)));
        assert!(!window.contains(date(4, 1)));

        assert!(DateWindow::new(date(3, 2), date(3, 1)).is_err());
    }

    #[test]
    fn test_transaction_ids_are_deterministic() {
        let raw = vec![RawBankTransaction {
            date: date(3, 5),
            description: "PIX ENVIADO ACME".to_string(),
            amount: -120.0,
            counterparty_id: Some(" ACME-1 ".to_string()),
        }];

        let first = transactions_to_records("bank", &raw);
        let second = transactions_to_records("bank", &raw);
        assert_eq!(first[0].id, second[0].id);
        assert!(first[0].id.starts_with("tx-"));
        assert_eq!(first[0].counterparty_hint.as_deref(), Some("ACME-1"));
        assert_eq!(first[0].origin, "bank");
    }

    #[test]
    fn test_documents_expand_line_items() {
        let raw = vec![RawDocument {
            issued_at: date(3, 6),
            vendor: "Acme Software".to_string(),
            statement_descriptor: Some("ACME SOFTWARE SP".to_string()),
            line_items: vec![
                LineItem {
                    amount: -100.0,
                    description: Some("Licenca mensal".to_string()),
                    label_guess: Some("Software".to_string()),
                    vendor: None,
                },
                LineItem {
                    amount: -20.0,
                    description: None,
                    label_guess: Some("Support".to_string()),
                    vendor: Some("Acme Support".to_string()),
                },
            ],
        }];

        let (records, hints) = documents_to_records("documents", &raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].raw_description, "Licenca mensal");
        assert_eq!(records[0].counterparty_hint.as_deref(), Some("Acme Software"));
        assert_eq!(records[1].raw_description, "Support");
        assert_eq!(records[1].counterparty_hint.as_deref(), Some("Acme Support"));
        assert!(records.iter().all(|r| r.source_type == SourceType::Document));
        assert_eq!(hints.get(&records[0].id).map(|s| s.as_str()), Some("ACME SOFTWARE SP"));
    }

    #[test]
    fn test_same_line_from_two_vendors_gets_two_ids() {
        let invoice = |vendor: &str| RawDocument {
            issued_at: date(3, 5),
            vendor: vendor.to_string(),
            statement_descriptor: None,
            line_items: vec![LineItem {
                amount: -100.0,
                description: Some("Licenca mensal".to_string()),
                label_guess: Some("Software".to_string()),
                vendor: None,
            }],
        };

        let (records, _) = documents_to_records("documents", &[invoice("Acme Software"), invoice("Globex Systems")]);
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
        assert_ne!(records[0].fingerprint(), records[1].fingerprint());
        assert_eq!(&records[0].id[4..], &records[0].fingerprint()[..ID_PREFIX_LEN]);
        assert_eq!(records[0].label_hint.as_deref(), Some("Software"));
    }

    #[tokio::test]
    async fn test_csv_source_filters_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statement.csv");
        std::fs::write(
            &path,
            "date,description,amount,counterparty_id\n\
             2025-03-01,ALUGUEL MARCO,-2500.00,IMOB-1\n\
             2025-04-02,ALUGUEL ABRIL,-2500.00,\n",
        )
        .unwrap();

        let source = CsvStatementSource::new("bank", &path);
        let window = DateWindow::new(date(3, 1), date(3, 31)).unwrap();
        let rows = source.fetch(&window).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description, "ALUGUEL MARCO");
        assert_eq!(rows[0].counterparty_id.as_deref(), Some("IMOB-1"));
    }

    #[tokio::test]
    async fn test_missing_file_is_upstream_error() {
        let source = JsonDocumentSource::new("documents", "/definitely/not/here.json");
        let window = DateWindow::last_days(date(3, 31), 30);
        let err = source.poll(&window).await.unwrap_err();
        assert!(err.is_upstream());
    }
}
