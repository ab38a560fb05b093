use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Datelike;
use tracing::info;

use crate::api::{ApiError, LedgerBackend};
use crate::config::StoreConfig;
use crate::models::{Expense, ExpensePatch, NewExpense, Period};
use crate::notify::Notifier;

use super::{CacheEntry, EntityCache, FetchOutcome};

/// The signed-in user's expenses, newest first.
pub struct ExpenseStore {
    cache: EntityCache<Expense>,
    backend: Arc<dyn LedgerBackend>,
    notifier: Arc<dyn Notifier>,
}

impl ExpenseStore {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        notifier: Arc<dyn Notifier>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            cache: EntityCache::new("expenses", config.expenses_ttl(), config.fetch_timeout()),
            backend,
            notifier,
        }
    }

    pub async fn fetch(&self, user_id: &str, force_refresh: bool) -> FetchOutcome {
        let backend = Arc::clone(&self.backend);
        let owner = user_id.to_string();
        self.cache
            .fetch(user_id, force_refresh, || async move {
                let mut expenses = backend.list_expenses(&owner).await?;
                sort_newest_first(&mut expenses);
                Ok(expenses)
            })
            .await
    }

    fn surface(&self, action: &str, e: ApiError) -> ApiError {
        self.notifier.error(&format!("Failed to {} expense: {}", action, e));
        e
    }

    pub async fn add(&self, expense: NewExpense) -> Result<Expense, ApiError> {
        if let Err(message) = expense.validate() {
            self.notifier.error(&message);
            return Err(ApiError::Validation(message));
        }

        let epoch = self.cache.epoch();
        let created = self
            .backend
            .insert_expense(&expense)
            .await
            .map_err(|e| self.surface("add", e))?;

        info!(expense_id = %created.id, amount = created.amount, currency = %created.currency, "Expense added");
        let row = created.clone();
        self.cache.apply(epoch, move |items| {
            items.push(row);
            sort_newest_first(items);
        });
        self.notifier.success("Expense added");
        Ok(created)
    }

    pub async fn update(&self, id: &str, patch: ExpensePatch) -> Result<Expense, ApiError> {
        if let Some(amount) = patch.amount {
            if !amount.is_finite() || amount <= 0.0 {
                let message = "Amount must be a positive number";
                self.notifier.error(message);
                return Err(ApiError::Validation(message.to_string()));
            }
        }

        let epoch = self.cache.epoch();
        let updated = self
            .backend
            .update_expense(id, &patch)
            .await
            .map_err(|e| self.surface("update", e))?;

        let row = updated.clone();
        self.cache.apply(epoch, move |items| {
            if let Some(existing) = items.iter_mut().find(|e| e.id == row.id) {
                *existing = row;
            }
            sort_newest_first(items);
        });
        self.notifier.success("Expense updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let epoch = self.cache.epoch();
        self.backend
            .delete_expense(id)
            .await
            .map_err(|e| self.surface("delete", e))?;

        info!(expense_id = id, "Expense deleted");
        self.cache.apply(epoch, |items| items.retain(|e| e.id != id));
        self.notifier.success("Expense deleted");
        Ok(())
    }

    // ===== Derived accessors =====

    pub fn expenses(&self) -> Vec<Expense> {
        self.cache.items()
    }

    pub fn by_id(&self, id: &str) -> Option<Expense> {
        self.cache.with(|items| items.iter().find(|e| e.id == id).cloned())
    }

    pub fn by_category(&self, category_id: &str) -> Vec<Expense> {
        self.filtered(|e| e.category_id == category_id)
    }

    pub fn by_currency(&self, currency: &str) -> Vec<Expense> {
        self.filtered(|e| e.currency == currency)
    }

    pub fn for_group(&self, group_id: &str) -> Vec<Expense> {
        self.filtered(|e| e.group_id.as_deref() == Some(group_id))
    }

    pub fn personal(&self) -> Vec<Expense> {
        self.filtered(Expense::is_personal)
    }

    fn filtered(&self, keep: impl Fn(&Expense) -> bool) -> Vec<Expense> {
        self.cache
            .with(|items| items.iter().filter(|e| keep(*e)).cloned().collect())
    }

    /// Sum of amounts in `period`.
    pub fn monthly_total(&self, period: &Period) -> f64 {
        self.cache.with(|items| {
            items
                .iter()
                .filter(|e| e.in_period(period))
                .map(|e| e.amount)
                .sum()
        })
    }

    /// Per-category sums in `period`, in order of first appearance.
    pub fn category_totals(&self, period: &Period) -> Vec<(String, f64)> {
        self.cache.with(|items| {
            let mut totals: Vec<(String, f64)> = Vec::new();
            for e in items.iter().filter(|e| e.in_period(period)) {
                match totals.iter_mut().find(|(id, _)| *id == e.category_id) {
                    Some((_, sum)) => *sum += e.amount,
                    None => totals.push((e.category_id.clone(), e.amount)),
                }
            }
            totals
        })
    }

    /// The category with the highest spend in `period`. Ties go to the
    /// category encountered first.
    pub fn top_category(&self, period: &Period) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for (id, sum) in self.category_totals(period) {
            if best.as_ref().map_or(true, |(_, top)| sum > *top) {
                best = Some((id, sum));
            }
        }
        best
    }

    /// Totals for each month of `year` in `currency`, January first.
    pub fn yearly_totals(&self, year: i32, currency: &str) -> [f64; 12] {
        self.cache.with(|items| {
            let mut months = [0.0; 12];
            for e in items
                .iter()
                .filter(|e| e.date.year() == year && e.currency == currency)
            {
                months[e.date.month0() as usize] += e.amount;
            }
            months
        })
    }

    /// Sorted distinct currency codes present in the cache.
    pub fn currencies(&self) -> Vec<String> {
        self.cache.with(|items| {
            items
                .iter()
                .map(|e| e.currency.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
    }

    // ===== Cache state =====

    pub fn snapshot(&self) -> CacheEntry<Vec<Expense>> {
        self.cache.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<CacheEntry<Vec<Expense>>> {
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

fn sort_newest_first(expenses: &mut [Expense]) {
    expenses.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
}
