// 🧭 Decision Engine CLI
//
// Usage:
//   decision-engine sync [--days N]
//   decision-engine submit <entry.json | '{"kind": ...}'>
//   decision-engine list [--status pending] [--category Marketing]
//   decision-engine approve <id> [--competence-date 2025-03-01]
//   decision-engine reject <id>
//   decision-engine reclassify <id> <label>
//   decision-engine history <id>
//   decision-engine rules
//   decision-engine clear --yes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use decision_engine::budget::CategoryListener;
use decision_engine::sources::{
    CsvStatementSource, JsonDocumentSource, MemoryDocumentSource, MemoryStatementSource,
};
use decision_engine::{
    parse_entry, ApprovalWorkflow, BudgetAuditor, CategoryCache, CategoryRegistry, Config,
    DateOverrides, DateWindow, DecisionFilter, DecisionRecord, DecisionStatus, DocumentSource,
    NotificationPayload, RecordStore, ReconciliationMatcher, RuleEngine, SqliteStore,
    StatementSource, SyncPipeline, VERSION,
};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "decision-engine", version, about = "Classify, audit and reconcile financial records")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "decision-engine.toml")]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle over the configured sources
    Sync {
        /// Window size in days, ending today
        #[arg(long)]
        days: Option<u32>,
    },
    /// Submit one manual entry (file path or inline JSON)
    Submit { input: String },
    /// List decision records
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Approve a pending decision record
    Approve {
        id: String,
        #[command(flatten)]
        dates: DateArgs,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Reject a pending decision record
    Reject {
        id: String,
        #[command(flatten)]
        dates: DateArgs,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Replace the category of a decision record (ends approved)
    Reclassify {
        id: String,
        label: String,
        #[command(flatten)]
        dates: DateArgs,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Audit history of one decision record
    History { id: String },
    /// Learned rules and heuristic rule count
    Rules,
    /// Delete every decision record
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Args)]
struct DateArgs {
    #[arg(long)]
    competence_date: Option<NaiveDate>,
    #[arg(long)]
    due_date: Option<NaiveDate>,
    #[arg(long)]
    paid_date: Option<NaiveDate>,
}

impl DateArgs {
    fn overrides(&self) -> Option<DateOverrides> {
        let overrides = DateOverrides {
            competence_date: self.competence_date,
            due_date: self.due_date,
            paid_date: self.paid_date,
        };
        if overrides.is_empty() {
            None
        } else {
            Some(overrides)
        }
    }
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    let log_level = if cli.quiet {
        "error".to_string()
    } else if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };

    let filter = EnvFilter::from_default_env().add_directive(
        format!("decision_engine={}", log_level)
            .parse()
            .unwrap_or_else(|_| "decision_engine=info".parse().expect("fallback directive is valid")),
    );

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::debug!(version = VERSION, config = %cli.config.display(), "configuration loaded");

    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteStore::open(&config.general.database_path)
            .with_context(|| format!("failed to open {}", config.general.database_path.display()))?,
    );

    match cli.command {
        Commands::Sync { days } => run_sync(&config, store, days).await?,
        Commands::Submit { input } => run_submit(&config, store, &input).await?,
        Commands::List { status, category } => run_list(store, status, category)?,
        Commands::Approve { id, dates, actor } => {
            let record = ApprovalWorkflow::new(store).approve(&id, dates.overrides(), &actor)?;
            println!("✅ Approved {} as {}", record.id, record.category_label);
        }
        Commands::Reject { id, dates, actor } => {
            let record = ApprovalWorkflow::new(store).reject(&id, dates.overrides(), &actor)?;
            println!("🚫 Rejected {}", record.id);
        }
        Commands::Reclassify { id, label, dates, actor } => {
            let record = ApprovalWorkflow::new(store).reclassify(&id, &label, dates.overrides(), &actor)?;
            println!("🏷️  Reclassified {} as {} (approved)", record.id, record.category_label);
        }
        Commands::History { id } => run_history(store, &id)?,
        Commands::Rules => run_rules(&config, store)?,
        Commands::Clear { yes, actor } => {
            let removed = ApprovalWorkflow::new(store).clear_all(yes, &actor)?;
            println!("🗑️  Removed {} decision records", removed);
        }
    }

    Ok(())
}

// ============================================================================
// WIRING
// ============================================================================

fn build_heuristics(config: &Config) -> Result<RuleEngine> {
    let mut heuristics = if config.classification.use_default_heuristics {
        RuleEngine::with_defaults()
    } else {
        RuleEngine::new()
    };
    if let Some(path) = &config.classification.heuristic_rules_path {
        let extra = RuleEngine::from_file(path)
            .with_context(|| format!("failed to load heuristic rules {}", path.display()))?;
        heuristics.extend(extra);
    }
    Ok(heuristics)
}

fn build_auditor(config: &Config) -> Result<Arc<BudgetAuditor>> {
    let registry = Arc::new(CategoryRegistry::from_seeds(&config.categories)?);
    let cache = Arc::new(CategoryCache::with_capacity(
        registry.clone(),
        config.budget.cache_ttl(),
        config.budget.cache_capacity,
    ));
    registry.subscribe(cache.clone() as Arc<dyn CategoryListener>);
    tracing::debug!(categories = registry.count()?, "category registry loaded");

    Ok(Arc::new(
        BudgetAuditor::new(cache).with_warning_ratio(config.budget.warning_ratio),
    ))
}

fn build_pipeline(config: &Config, store: Arc<dyn RecordStore>) -> Result<SyncPipeline> {
    let statements: Arc<dyn StatementSource> = match &config.sources.statements_csv {
        Some(path) => Arc::new(CsvStatementSource::new("bank_statement", path)),
        None => Arc::new(MemoryStatementSource::default()),
    };
    let documents: Arc<dyn DocumentSource> = match &config.sources.documents_json {
        Some(path) => Arc::new(JsonDocumentSource::new("documents", path)),
        None => Arc::new(MemoryDocumentSource::default()),
    };

    Ok(SyncPipeline::new(
        store,
        statements,
        documents,
        build_heuristics(config)?,
        build_auditor(config)?,
    )
    .with_settings(config.sync.clone())
    .with_matcher(ReconciliationMatcher::with_settings(config.reconciliation.clone())))
}

// ============================================================================
// COMMANDS
// ============================================================================

async fn run_sync(config: &Config, store: Arc<dyn RecordStore>, days: Option<u32>) -> Result<()> {
    let pipeline = build_pipeline(config, store)?;
    let window = DateWindow::last_days(Utc::now().date_naive(), days.unwrap_or(config.sync.window_days));

    println!("🔄 Sync {} → {}", window.start, window.end);
    let report = pipeline.run(window).await.context("sync cycle failed")?;
    print_payload(&report.summary());
    println!("   {}", report.reconciliation.summary());
    Ok(())
}

async fn run_submit(config: &Config, store: Arc<dyn RecordStore>, input: &str) -> Result<()> {
    let json = if Path::new(input).exists() {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input))?
    } else {
        input.to_string()
    };
    let record = parse_entry(&json)?;
    println!("📝 Entry {} ({})", record.id, record.origin);

    let pipeline = build_pipeline(config, store)?;
    let report = pipeline.process(vec![record], &HashMap::new(), Instant::now()).await?;
    print_payload(&report.summary());
    Ok(())
}

fn run_list(store: Arc<dyn RecordStore>, status: Option<String>, category: Option<String>) -> Result<()> {
    let status = match status {
        Some(s) => Some(DecisionStatus::parse(&s).ok_or_else(|| anyhow!("unknown status '{}'", s))?),
        None => None,
    };
    let filter = DecisionFilter {
        status,
        category_label: category,
    };

    let records = ApprovalWorkflow::new(store).list(&filter)?;
    println!("📋 {} decision records", records.len());
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn run_history(store: Arc<dyn RecordStore>, id: &str) -> Result<()> {
    let workflow = ApprovalWorkflow::new(store);
    let record = workflow.get(id)?;
    print_record(&record);

    let entries = workflow.history(id)?;
    println!("📜 {} audit entries", entries.len());
    for entry in entries {
        println!(
            "   {}  {:<10}  by {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            entry.actor
        );
    }
    Ok(())
}

fn run_rules(config: &Config, store: Arc<dyn RecordStore>) -> Result<()> {
    let workflow = ApprovalWorkflow::new(store);
    let rules = workflow.learning().snapshot()?;

    println!("🧠 {} learned rules", rules.len());
    for rule in &rules {
        let tokens: Vec<&str> = rule.tokens.iter().map(String::as_str).collect();
        println!(
            "   {:<40} → {:<24} hits={} confidence={:.2}",
            tokens.join(" "),
            rule.category_label,
            rule.hit_count,
            rule.confidence()
        );
    }
    println!("📐 {} heuristic rules", build_heuristics(config)?.rule_count());
    Ok(())
}

// ============================================================================
// OUTPUT
// ============================================================================

fn print_payload(payload: &NotificationPayload) {
    println!("{}", payload.title);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for item in &payload.items {
        println!("   {:<24} {:>8}  {}", item.label, item.value, item.severity.as_str());
    }
}

fn print_record(record: &DecisionRecord) {
    let review = if record.needs_review { " ⚠️" } else { "" };
    println!(
        "   {}  {}  {:>12.2}  {:<24} {:.2}  {:<9}{}  {}",
        record.id,
        record.occurred_at,
        record.amount,
        record.category_label,
        record.confidence,
        record.status.as_str(),
        review,
        record.description
    );
}
