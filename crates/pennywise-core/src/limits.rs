use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::api::{ApiError, LedgerBackend};
use crate::cache::ExpenseStore;
use crate::models::{MonthlyLimit, Period};
use crate::notify::Notifier;

/// Spending against a monthly limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitUsage {
    pub limit: f64,
    pub spent: f64,
    pub remaining: f64,
    /// Share of the limit spent, in percent. May exceed 100.
    pub percent: f64,
}

impl LimitUsage {
    pub fn new(limit: f64, spent: f64) -> Self {
        let percent = if limit > 0.0 { spent / limit * 100.0 } else { 0.0 };
        Self {
            limit,
            spent,
            remaining: limit - spent,
            percent,
        }
    }

    pub fn exceeded(&self) -> bool {
        self.spent > self.limit
    }
}

/// Monthly spending limits per currency.
pub struct LimitService {
    backend: Arc<dyn LedgerBackend>,
    expenses: Arc<ExpenseStore>,
    notifier: Arc<dyn Notifier>,
}

impl LimitService {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        expenses: Arc<ExpenseStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            backend,
            expenses,
            notifier,
        }
    }

    pub async fn get(&self, user_id: &str, period: &Period) -> Result<Option<MonthlyLimit>, ApiError> {
        self.backend.get_monthly_limit(user_id, period).await
    }

    /// Create or replace the limit for `period`.
    pub async fn set(&self, user_id: &str, period: &Period, amount: f64) -> Result<MonthlyLimit, ApiError> {
        if !amount.is_finite() || amount <= 0.0 {
            let message = "Limit must be a positive number";
            self.notifier.error(message);
            return Err(ApiError::Validation(message.to_string()));
        }

        let limit = MonthlyLimit::new(user_id, period, amount);
        let saved = self.backend.upsert_monthly_limit(&limit).await.map_err(|e| {
            self.notifier.error(&format!("Failed to save limit: {}", e));
            e
        })?;
        info!(period = %period.label(), amount = amount, "Monthly limit saved");
        self.notifier.success("Monthly limit saved");
        Ok(saved)
    }

    /// Usage of the limit for `period`, measured against the expense store.
    /// `None` when no limit is set.
    pub async fn usage(&self, user_id: &str, period: &Period) -> Result<Option<LimitUsage>, ApiError> {
        let Some(limit) = self.get(user_id, period).await? else {
            return Ok(None);
        };
        let spent = self.expenses.monthly_total(period);
        Ok(Some(LimitUsage::new(limit.amount, spent)))
    }
}
