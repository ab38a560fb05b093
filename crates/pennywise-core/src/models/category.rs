use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An expense category owned by a user.
///
/// Default categories are seeded once for every new user and cannot be
/// deleted from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub user_id: String,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a new category.
#[derive(Debug, Clone, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub user_id: String,
    pub is_default: bool,
}

impl NewCategory {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user_id: user_id.into(),
            is_default: false,
        }
    }
}

/// Partial update for a category. Only `name` is editable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CategoryPatch {
    #[cfg(test)]
    pub(crate) fn apply(&self, category: &mut Category) {
        if let Some(ref name) = self.name {
            category.name = name.clone();
        }
    }
}
