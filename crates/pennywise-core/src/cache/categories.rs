use std::sync::Arc;

use tracing::info;

use crate::api::{ApiError, LedgerBackend};
use crate::config::StoreConfig;
use crate::models::{Category, CategoryPatch, NewCategory};
use crate::notify::Notifier;

use super::{CacheEntry, EntityCache, FetchOutcome};

/// The signed-in user's categories.
pub struct CategoryStore {
    cache: EntityCache<Category>,
    backend: Arc<dyn LedgerBackend>,
    notifier: Arc<dyn Notifier>,
}

impl CategoryStore {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        notifier: Arc<dyn Notifier>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            cache: EntityCache::new("categories", config.categories_ttl(), config.fetch_timeout()),
            backend,
            notifier,
        }
    }

    pub async fn fetch(&self, user_id: &str, force_refresh: bool) -> FetchOutcome {
        let backend = Arc::clone(&self.backend);
        let owner = user_id.to_string();
        self.cache
            .fetch(user_id, force_refresh, || async move {
                let mut categories = backend.list_categories(&owner).await?;
                sort_by_name(&mut categories);
                Ok(categories)
            })
            .await
    }

    fn reject(&self, message: &str) -> ApiError {
        self.notifier.error(message);
        ApiError::Validation(message.to_string())
    }

    fn surface(&self, action: &str, e: ApiError) -> ApiError {
        self.notifier.error(&format!("Failed to {} category: {}", action, e));
        e
    }

    pub async fn add(&self, category: NewCategory) -> Result<Category, ApiError> {
        let name = category.name.trim();
        if name.is_empty() {
            return Err(self.reject("Category name is required"));
        }
        if self.find_by_name(name).is_some() {
            return Err(self.reject("A category with this name already exists"));
        }

        let epoch = self.cache.epoch();
        let payload = NewCategory {
            name: name.to_string(),
            ..category
        };
        let created = self
            .backend
            .insert_category(&payload)
            .await
            .map_err(|e| self.surface("add", e))?;

        info!(category_id = %created.id, "Category added");
        let row = created.clone();
        self.cache.apply(epoch, move |items| {
            items.push(row);
            sort_by_name(items);
        });
        self.notifier.success("Category added");
        Ok(created)
    }

    pub async fn update(&self, id: &str, patch: CategoryPatch) -> Result<Category, ApiError> {
        if let Some(ref name) = patch.name {
            if name.trim().is_empty() {
                return Err(self.reject("Category name is required"));
            }
        }

        let epoch = self.cache.epoch();
        let updated = self
            .backend
            .update_category(id, &patch)
            .await
            .map_err(|e| self.surface("update", e))?;

        let row = updated.clone();
        self.cache.apply(epoch, move |items| {
            if let Some(existing) = items.iter_mut().find(|c| c.id == row.id) {
                *existing = row;
            }
            sort_by_name(items);
        });
        self.notifier.success("Category updated");
        Ok(updated)
    }

    /// Delete a category. Default categories are refused without a request.
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        if self.by_id(id).map(|c| c.is_default).unwrap_or(false) {
            return Err(self.reject("Default categories cannot be deleted"));
        }

        let epoch = self.cache.epoch();
        self.backend
            .delete_category(id)
            .await
            .map_err(|e| self.surface("delete", e))?;

        info!(category_id = id, "Category deleted");
        self.cache.apply(epoch, |items| items.retain(|c| c.id != id));
        self.notifier.success("Category deleted");
        Ok(())
    }

    // ===== Derived accessors =====

    pub fn categories(&self) -> Vec<Category> {
        self.cache.items()
    }

    pub fn by_id(&self, id: &str) -> Option<Category> {
        self.cache.with(|items| items.iter().find(|c| c.id == id).cloned())
    }

    pub fn find_by_name(&self, name: &str) -> Option<Category> {
        self.cache.with(|items| {
            items
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
                .cloned()
        })
    }

    /// Category name for display, or "Uncategorized" for an unknown id.
    pub fn name_of(&self, id: &str) -> String {
        self.by_id(id)
            .map(|c| c.name)
            .unwrap_or_else(|| "Uncategorized".to_string())
    }

    pub fn custom(&self) -> Vec<Category> {
        self.cache
            .with(|items| items.iter().filter(|c| !c.is_default).cloned().collect())
    }

    // ===== Cache state =====

    pub fn snapshot(&self) -> CacheEntry<Vec<Category>> {
        self.cache.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<CacheEntry<Vec<Category>>> {
        self.cache.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.cache.is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.cache.error()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: chrono::Duration) {
        self.cache.backdate(by);
    }
}

fn sort_by_name(categories: &mut [Category]) {
    categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{category, MockBackend, RecordingNotifier};

    fn store(backend: &Arc<MockBackend>, notifier: &Arc<RecordingNotifier>) -> CategoryStore {
        CategoryStore::new(
            backend.clone(),
            notifier.clone(),
            &StoreConfig::default(),
        )
    }

    fn seeded() -> Arc<MockBackend> {
        let backend = MockBackend::new();
        backend.categories.lock().unwrap().extend([
            category("c-food", "Food", "u1", true),
            category("c-bikes", "bikes", "u1", false),
            category("c-other", "Rent", "u2", true),
        ]);
        backend
    }

    #[tokio::test]
    async fn test_fetch_twice_within_ttl_calls_backend_once() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);

        assert_eq!(store.fetch("u1", false).await, FetchOutcome::Fetched(2));
        // Two seconds later, same user: served from cache.
        store.backdate(chrono::Duration::seconds(2));
        assert_eq!(store.fetch("u1", false).await, FetchOutcome::Cached);
        assert_eq!(backend.calls("list_categories"), 1);

        let names: Vec<String> = store.categories().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["bikes", "Food"]);
    }

    #[tokio::test]
    async fn test_fetch_after_ttl_removes_vanished_rows() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);
        store.fetch("u1", false).await;

        backend.categories.lock().unwrap().retain(|c| c.id != "c-bikes");
        store.backdate(chrono::Duration::minutes(6));
        assert_eq!(store.fetch("u1", false).await, FetchOutcome::Fetched(1));
        assert!(store.by_id("c-bikes").is_none());
        assert_eq!(backend.calls("list_categories"), 2);
    }

    #[tokio::test]
    async fn test_delete_default_is_rejected_locally() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);
        store.fetch("u1", false).await;
        let before = store.categories();

        let err = store.delete("c-food").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(backend.calls("delete_category"), 0);
        assert_eq!(store.categories(), before);
        assert_eq!(notifier.errors(), vec!["Default categories cannot be deleted"]);
    }

    #[tokio::test]
    async fn test_delete_custom_category() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);
        store.fetch("u1", false).await;

        store.delete("c-bikes").await.unwrap();
        assert_eq!(backend.calls("delete_category"), 1);
        assert!(store.by_id("c-bikes").is_none());
        assert!(store.custom().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejected_by_backend_leaves_cache_untouched() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);
        store.fetch("u1", false).await;
        let before = store.categories();

        backend.fail("insert_category", "duplicate key");
        let err = store.add(NewCategory::new("u1", "Travel")).await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(_)));
        assert_eq!(store.categories(), before);
        assert_eq!(
            notifier.errors(),
            vec!["Failed to add category: Server error: duplicate key"]
        );
    }

    #[tokio::test]
    async fn test_add_applies_after_confirmation() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);
        store.fetch("u1", false).await;

        let created = store.add(NewCategory::new("u1", "  Travel ")).await.unwrap();
        assert_eq!(created.name, "Travel");
        assert_eq!(store.find_by_name("travel").map(|c| c.id), Some(created.id));
        assert_eq!(notifier.successes(), 1);
        // No refetch needed to see the new row.
        assert_eq!(backend.calls("list_categories"), 1);
    }

    #[tokio::test]
    async fn test_add_validation_skips_network() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);
        store.fetch("u1", false).await;

        assert!(store.add(NewCategory::new("u1", "   ")).await.is_err());
        assert!(store.add(NewCategory::new("u1", "FOOD")).await.is_err());
        assert_eq!(backend.calls("insert_category"), 0);
        assert_eq!(notifier.errors().len(), 2);
    }

    #[tokio::test]
    async fn test_update_renames_in_place() {
        let backend = seeded();
        let notifier = RecordingNotifier::new();
        let store = store(&backend, &notifier);
        store.fetch("u1", false).await;

        let patch = CategoryPatch {
            name: Some("Cycling".to_string()),
        };
        store.update("c-bikes", patch).await.unwrap();
        assert_eq!(store.name_of("c-bikes"), "Cycling");
        assert_eq!(store.name_of("missing"), "Uncategorized");
    }
}
