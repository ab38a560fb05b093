use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single recorded expense.
///
/// `group_id == None` marks a personal expense. `paid_by` only carries
/// meaning for group expenses; when absent the owner is the payer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    pub category_id: String,
    pub user_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    pub currency: String,
    #[serde(default)]
    pub paid_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    pub fn is_personal(&self) -> bool {
        self.group_id.is_none()
    }

    /// The member credited with paying this expense.
    pub fn payer(&self) -> &str {
        self.paid_by.as_deref().unwrap_or(&self.user_id)
    }

    pub fn in_period(&self, period: &Period) -> bool {
        self.date.month() == period.month
            && self.date.year() == period.year
            && self.currency == period.currency
    }
}

/// A (month, year, currency) tuple used for monthly aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub month: u32,
    pub year: i32,
    pub currency: String,
}

impl Period {
    pub fn new(month: u32, year: i32, currency: impl Into<String>) -> Self {
        Self {
            month,
            year,
            currency: currency.into(),
        }
    }

    /// The period containing `date`.
    pub fn of(date: NaiveDate, currency: impl Into<String>) -> Self {
        Self::new(date.month(), date.year(), currency)
    }

    pub fn label(&self) -> String {
        format!("{:04}-{:02} {}", self.year, self.month, self.currency)
    }
}

/// Insert payload for a new expense.
#[derive(Debug, Clone, Serialize)]
pub struct NewExpense {
    pub amount: f64,
    pub description: String,
    pub date: NaiveDate,
    pub category_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_by: Option<String>,
}

impl NewExpense {
    /// Validate the payload before it is sent.
    pub fn validate(&self) -> Result<(), String> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err("Amount must be a positive number".to_string());
        }
        if self.category_id.trim().is_empty() {
            return Err("Please select a category".to_string());
        }
        if self.currency.trim().len() != 3 {
            return Err("Please select a currency".to_string());
        }
        if self.paid_by.is_some() && self.group_id.is_none() {
            return Err("Only group expenses can have a payer".to_string());
        }
        Ok(())
    }
}

/// Partial update for an expense.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpensePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_by: Option<String>,
}

impl ExpensePatch {
    #[cfg(test)]
    pub(crate) fn apply(&self, expense: &mut Expense) {
        if let Some(amount) = self.amount {
            expense.amount = amount;
        }
        if let Some(ref description) = self.description {
            expense.description = description.clone();
        }
        if let Some(date) = self.date {
            expense.date = date;
        }
        if let Some(ref category_id) = self.category_id {
            expense.category_id = category_id.clone();
        }
        if let Some(ref currency) = self.currency {
            expense.currency = currency.clone();
        }
        if let Some(ref paid_by) = self.paid_by {
            expense.paid_by = Some(paid_by.clone());
        }
    }
}
