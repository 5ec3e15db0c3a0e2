// 💰 Budget Auditor - classified amounts vs. category monthly caps
//
// Lookups go through CategoryCache (bounded LRU, explicit TTL + explicit
// invalidation), never through module-level state. Absence of policy is not an error:
// unknown category, no cap, or an unavailable registry all mean "no check".
//
//   |amount| >  cap                → critical, forced review
//   |amount| == cap                → within budget (inclusive boundary)
//   |amount| >  cap × warning_ratio → warning, no forced review

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::records::{to_cents, AuditOutcome, ClassificationResult, Severity};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_WARNING_RATIO: f64 = 0.9;

// ============================================================================
// CATEGORY POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountingType {
    Revenue,
    Cost,
    Expense,
    Investment,
    Transfer,
}

/// What the Category Registry knows about one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub category_label: String,
    pub monthly_cap: Option<f64>,
    pub group_name: String,
    pub accounting_type: AccountingType,
}

/// External catalog of categories (label → policy)
pub trait CategoryDirectory: Send + Sync {
    /// Ok(None) when the label is unknown
    fn lookup(&self, category_label: &str) -> EngineResult<Option<CategoryPolicy>>;
}

/// Notified by a registry whenever a category changes
pub trait CategoryListener: Send + Sync {
    fn category_changed(&self, category_label: &str);
}

// ============================================================================
// CATEGORY CACHE
// ============================================================================

struct CachedPolicy {
    policy: Option<CategoryPolicy>,
    fetched_at: Instant,
}

impl CachedPolicy {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Expired entries served because the registry was unavailable
    pub stale_served: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded LRU of category policies with a TTL per entry. Expired entries
/// stay until evicted so they can be served while the registry is down.
pub struct CategoryCache {
    directory: Arc<dyn CategoryDirectory>,
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedPolicy>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
}

impl CategoryCache {
    pub fn new(directory: Arc<dyn CategoryDirectory>, ttl: Duration) -> Self {
        Self::with_capacity(directory, ttl, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(directory: Arc<dyn CategoryDirectory>, ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        CategoryCache {
            directory,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    fn key(label: &str) -> String {
        label.trim().to_lowercase()
    }

    fn entries(&self) -> Option<MutexGuard<'_, LruCache<String, CachedPolicy>>> {
        self.entries.lock().ok()
    }

    /// Resolve a label, refreshing after the TTL. On upstream failure a
    /// stale entry is served if one exists, otherwise the error is returned.
    pub fn policy(&self, category_label: &str) -> EngineResult<Option<CategoryPolicy>> {
        let key = Self::key(category_label);

        if let Some(mut entries) = self.entries() {
            let fresh = entries
                .peek(&key)
                .map(|cached| !cached.is_expired(self.ttl))
                .unwrap_or(false);
            if fresh {
                if let Some(cached) = entries.get(&key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(cached.policy.clone());
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        match self.directory.lookup(category_label) {
            Ok(policy) => {
                if let Some(mut entries) = self.entries() {
                    entries.put(
                        key,
                        CachedPolicy {
                            policy: policy.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Ok(policy)
            }
            Err(err) => {
                let stale = self
                    .entries()
                    .and_then(|entries| entries.peek(&key).map(|c| c.policy.clone()));
                match stale {
                    Some(policy) => {
                        tracing::warn!(category = category_label, error = %err, "category registry unavailable, serving stale policy");
                        self.stale_served.fetch_add(1, Ordering::Relaxed);
                        Ok(policy)
                    }
                    None => Err(err),
                }
            }
        }
    }

    pub fn invalidate(&self, category_label: &str) {
        if let Some(mut entries) = self.entries() {
            entries.pop(&Self::key(category_label));
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(mut entries) = self.entries() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let (size, capacity) = self
            .entries()
            .map(|entries| (entries.len(), entries.cap().get()))
            .unwrap_or_default();
        CacheStats {
            size,
            capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
        }
    }
}

impl CategoryListener for CategoryCache {
    fn category_changed(&self, category_label: &str) {
        tracing::debug!(category = category_label, "category changed, cache entry invalidated");
        self.invalidate(category_label);
    }
}

// ============================================================================
// BUDGET AUDITOR
// ============================================================================

pub struct BudgetAuditor {
    cache: Arc<CategoryCache>,
    warning_ratio: f64,
}

impl BudgetAuditor {
    pub fn new(cache: Arc<CategoryCache>) -> Self {
        BudgetAuditor {
            cache,
            warning_ratio: DEFAULT_WARNING_RATIO,
        }
    }

    pub fn with_warning_ratio(mut self, ratio: f64) -> Self {
        self.warning_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Compare an amount with a cap (pure; amounts compared in cents)
    pub fn evaluate(&self, amount: f64, cap: f64) -> Option<AuditOutcome> {
        let cap_cents = to_cents(cap);
        if cap_cents <= 0 {
            return None;
        }
        let amount_cents = to_cents(amount.abs());

        if amount_cents > cap_cents {
            return Some(AuditOutcome {
                within_budget: false,
                budget_limit: Some(cap),
                variation: Some((amount_cents - cap_cents) as f64 / 100.0),
                severity: Severity::Critical,
            });
        }

        let warning_cents = (cap_cents as f64 * self.warning_ratio).round() as i64;
        let severity = if self.warning_ratio < 1.0 && amount_cents > warning_cents {
            Severity::Warning
        } else {
            Severity::None
        };

        Some(AuditOutcome {
            within_budget: true,
            budget_limit: Some(cap),
            variation: None,
            severity,
        })
    }

    /// Annotate a result with its audit outcome (no policy → unchanged)
    pub fn audit(&self, result: &mut ClassificationResult) {
        let policy = match self.cache.policy(&result.category_label) {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(
                    category = %result.category_label,
                    error = %err,
                    "budget check skipped, category registry unavailable"
                );
                return;
            }
        };

        let Some(cap) = policy.and_then(|p| p.monthly_cap) else {
            return;
        };

        if let Some(outcome) = self.evaluate(result.amount, cap) {
            if outcome.severity == Severity::Critical {
                tracing::info!(
                    record_id = %result.record_id,
                    category = %result.category_label,
                    amount = result.amount,
                    cap,
                    "amount exceeds category budget"
                );
            }
            result.audit_outcome = Some(outcome);
            result.refresh_review_flag();
        }
    }

    pub fn audit_all(&self, results: &mut [ClassificationResult]) {
        for result in results.iter_mut() {
            self.audit(result);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
