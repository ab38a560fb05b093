use serde::{Deserialize, Serialize};

use super::Period;

/// A spending limit for one month and currency.
///
/// Rows are unique on `(user_id, month, year, currency)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyLimit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub month: u32,
    pub year: i32,
    pub currency: String,
    pub amount: f64,
}

impl MonthlyLimit {
    pub fn new(user_id: impl Into<String>, period: &Period, amount: f64) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            month: period.month,
            year: period.year,
            currency: period.currency.clone(),
            amount,
        }
    }

    pub fn period(&self) -> Period {
        Period::new(self.month, self.year, self.currency.clone())
    }
}
