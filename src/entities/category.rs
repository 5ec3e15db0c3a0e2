// 🏷️ Category Registry - chart of categories with monthly budget caps
//
// "Category label is a VALUE (can change), Category UUID is IDENTITY (never changes)"
//
// - Every update appends a new version and expires the previous one
// - Lookups by label are case-insensitive and only see current versions
// - Listeners (the budget CategoryCache) are told about every change,
//   so a cached cap never outlives the version it came from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::budget::{AccountingType, CategoryDirectory, CategoryListener, CategoryPolicy};
use crate::error::{EngineError, EngineResult};

// ============================================================================
// CATEGORY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    pub label: String,

    /// Reporting group ("Fixed Costs", "Marketing", ...)
    pub group_name: String,

    pub accounting_type: AccountingType,

    /// None = no budget check for this category
    pub monthly_cap: Option<f64>,

    pub version: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl Category {
    pub fn new(label: &str, group_name: &str, accounting_type: AccountingType) -> Self {
        Category {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            group_name: group_name.to_string(),
            accounting_type,
            monthly_cap: None,
            version: 1,
            valid_from: Utc::now(),
            valid_until: None,
        }
    }

    pub fn with_cap(mut self, monthly_cap: f64) -> Self {
        self.monthly_cap = Some(monthly_cap);
        self
    }

    pub fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    /// Create next version (for updating values)
    pub fn next_version(&self) -> Category {
        let mut next = self.clone();
        next.version += 1;
        next.valid_from = Utc::now();
        next.valid_until = None;
        next
    }

    pub fn policy(&self) -> CategoryPolicy {
        CategoryPolicy {
            category_label: self.label.clone(),
            monthly_cap: self.monthly_cap,
            group_name: self.group_name.clone(),
            accounting_type: self.accounting_type,
        }
    }
}

/// Category definition as written in config ([[categories]])
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySeed {
    pub label: String,
    #[serde(default = "default_group")]
    pub group_name: String,
    #[serde(default = "default_accounting_type")]
    pub accounting_type: AccountingType,
    #[serde(default)]
    pub monthly_cap: Option<f64>,
}

fn default_group() -> String {
    "General".to_string()
}

fn default_accounting_type() -> AccountingType {
    AccountingType::Expense
}

impl From<&CategorySeed> for Category {
    fn from(seed: &CategorySeed) -> Self {
        let category = Category::new(&seed.label, &seed.group_name, seed.accounting_type);
        match seed.monthly_cap {
            Some(cap) => category.with_cap(cap),
            None => category,
        }
    }
}

// ============================================================================
// CATEGORY REGISTRY
// ============================================================================

/// Registry of all known categories
///
/// Multi-version storage: stores ALL versions, never deletes.
#[derive(Default)]
pub struct CategoryRegistry {
    versions: RwLock<Vec<Category>>,
    listeners: RwLock<Vec<Arc<dyn CategoryListener>>>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seeds(seeds: &[CategorySeed]) -> EngineResult<Self> {
        let registry = CategoryRegistry::new();
        for seed in seeds {
            registry.register(Category::from(seed))?;
        }
        Ok(registry)
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, Vec<Category>>> {
        self.versions
            .read()
            .map_err(|_| EngineError::persistence("category registry lock poisoned"))
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, Vec<Category>>> {
        self.versions
            .write()
            .map_err(|_| EngineError::persistence("category registry lock poisoned"))
    }

    /// Subscribe to category changes
    pub fn subscribe(&self, listener: Arc<dyn CategoryListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    fn notify(&self, label: &str) {
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener.category_changed(label);
            }
        }
    }

    /// Register a new category (labels are unique among current versions)
    pub fn register(&self, category: Category) -> EngineResult<()> {
        if self.find_by_label(&category.label)?.is_some() {
            return Err(EngineError::validation(format!(
                "category already registered: {}",
                category.label
            )));
        }
        let label = category.label.clone();
        self.write()?.push(category);
        self.notify(&label);
        Ok(())
    }

    pub fn get_all_versions(&self, id: &str) -> EngineResult<Vec<Category>> {
        Ok(self.read()?.iter().filter(|c| c.id == id).cloned().collect())
    }

    pub fn get_current_version(&self, id: &str) -> EngineResult<Option<Category>> {
        Ok(self
            .read()?
            .iter()
            .find(|c| c.id == id && c.is_current())
            .cloned())
    }

    /// Category as it was at a given instant
    pub fn get_category_at_time(&self, id: &str, as_of: DateTime<Utc>) -> EngineResult<Option<Category>> {
        Ok(self
            .read()?
            .iter()
            .filter(|c| c.id == id)
            .find(|c| c.valid_from <= as_of && c.valid_until.map_or(true, |until| until > as_of))
            .cloned())
    }

    /// Update category (creates new version, expires old version)
    pub fn update_category<F>(&self, id: &str, mut update_fn: F) -> EngineResult<Category>
    where
        F: FnMut(&mut Category),
    {
        let current = self
            .get_current_version(id)?
            .ok_or_else(|| EngineError::NotFound(format!("category {}", id)))?;

        let mut expired = current.clone();
        expired.valid_until = Some(Utc::now());

        let mut next = current.next_version();
        update_fn(&mut next);

        {
            let mut versions = self.write()?;
            versions.retain(|c| !(c.id == id && c.is_current()));
            versions.push(expired);
            versions.push(next.clone());
        }

        // Both labels are stale if the update renamed the category
        self.notify(&current.label);
        if !next.label.eq_ignore_ascii_case(&current.label) {
            self.notify(&next.label);
        }
        tracing::debug!(category = %next.label, version = next.version, "category updated");
        Ok(next)
    }

    /// Change (or remove) a category's monthly cap
    pub fn set_monthly_cap(&self, label: &str, monthly_cap: Option<f64>) -> EngineResult<Category> {
        let current = self
            .find_by_label(label)?
            .ok_or_else(|| EngineError::NotFound(format!("category {}", label)))?;
        self.update_category(&current.id, |c| c.monthly_cap = monthly_cap)
    }

    /// Case-insensitive lookup, current version only
    pub fn find_by_label(&self, label: &str) -> EngineResult<Option<Category>> {
        let wanted = label.trim().to_lowercase();
        Ok(self
            .read()?
            .iter()
            .filter(|c| c.is_current())
            .find(|c| c.label.to_lowercase() == wanted)
            .cloned())
    }

    /// Current versions, sorted by label
    pub fn all_categories(&self) -> EngineResult<Vec<Category>> {
        let mut current: Vec<Category> = self.read()?.iter().filter(|c| c.is_current()).cloned().collect();
        current.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(current)
    }

    pub fn count(&self) -> EngineResult<usize> {
        Ok(self.all_categories()?.len())
    }

    pub fn by_group(&self, group_name: &str) -> EngineResult<Vec<Category>> {
        Ok(self
            .all_categories()?
            .into_iter()
            .filter(|c| c.group_name.eq_ignore_ascii_case(group_name))
            .collect())
    }
}

impl CategoryDirectory for CategoryRegistry {
    fn lookup(&self, category_label: &str) -> EngineResult<Option<CategoryPolicy>> {
        Ok(self.find_by_label(category_label)?.map(|c| c.policy()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CategoryCache;
    use std::sync::Mutex;
    use std::time::Duration;

    fn seeded() -> CategoryRegistry {
        CategoryRegistry::from_seeds(&[
            CategorySeed {
                label: "Marketing".to_string(),
                group_name: "Growth".to_string(),
                accounting_type: AccountingType::Expense,
                monthly_cap: Some(1000.0),
            },
            CategorySeed {
                label: "Rent".to_string(),
                group_name: "Fixed Costs".to_string(),
                accounting_type: AccountingType::Expense,
                monthly_cap: None,
            },
        ])
        .unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl CategoryListener for Recorder {
        fn category_changed(&self, category_label: &str) {
            self.seen.lock().unwrap().push(category_label.to_string());
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = seeded();
        assert_eq!(registry.count().unwrap(), 2);

        let policy = registry.lookup("marketing").unwrap().unwrap();
        assert_eq!(policy.monthly_cap, Some(1000.0));
        assert_eq!(policy.group_name, "Growth");

        assert_eq!(registry.lookup("Rent").unwrap().unwrap().monthly_cap, None);
        assert!(registry.lookup("Unknown").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let registry = seeded();
        let err = registry
            .register(Category::new("MARKETING", "Other", AccountingType::Expense))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_update_preserves_history() {
        let registry = seeded();
        let marketing = registry.find_by_label("Marketing").unwrap().unwrap();

        let v2 = registry.set_monthly_cap("Marketing", Some(2000.0)).unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.id, marketing.id);

        let versions = registry.get_all_versions(&marketing.id).unwrap();
        assert_eq!(versions.len(), 2);
        let v1 = versions.iter().find(|c| c.version == 1).unwrap();
        assert!(v1.valid_until.is_some());
        assert_eq!(v1.monthly_cap, Some(1000.0));

        let at_start = registry
            .get_category_at_time(&marketing.id, marketing.valid_from)
            .unwrap()
            .unwrap();
        assert_eq!(at_start.version, 1);
    }

    #[test]
    fn test_update_missing_category() {
        let registry = seeded();
        let err = registry.set_monthly_cap("Travel", Some(1.0)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_listeners_notified_on_change() {
        let registry = seeded();
        let recorder = Arc::new(Recorder::default());
        registry.subscribe(recorder.clone());

        registry.set_monthly_cap("Marketing", None).unwrap();
        let rent = registry.find_by_label("Rent").unwrap().unwrap();
        registry
            .update_category(&rent.id, |c| c.label = "Office Rent".to_string())
            .unwrap();

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["Marketing", "Rent", "Office Rent"]);
    }

    #[test]
    fn test_cache_sees_cap_change_immediately() {
        let registry = Arc::new(seeded());
        let cache = Arc::new(CategoryCache::new(registry.clone(), Duration::from_secs(3600)));
        registry.subscribe(cache.clone());

        assert_eq!(cache.policy("Marketing").unwrap().unwrap().monthly_cap, Some(1000.0));
        registry.set_monthly_cap("Marketing", Some(50.0)).unwrap();
        assert_eq!(cache.policy("Marketing").unwrap().unwrap().monthly_cap, Some(50.0));
    }
}
