use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel the backend returns when a member's email cannot be resolved.
pub const EMAIL_UNAVAILABLE: &str = "unavailable";

/// A set of users sharing expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing)]
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn is_creator(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: String,
    pub group_id: String,
    pub user_id: String,
    #[serde(default = "unavailable_email")]
    pub email: String,
    pub joined_at: DateTime<Utc>,
}

fn unavailable_email() -> String {
    EMAIL_UNAVAILABLE.to_string()
}

impl GroupMember {
    pub fn has_email(&self) -> bool {
        self.email != EMAIL_UNAVAILABLE && !self.email.is_empty()
    }

    /// Email if resolved, otherwise a shortened user id.
    pub fn display_name(&self) -> String {
        if self.has_email() {
            self.email.clone()
        } else {
            let short: String = self.user_id.chars().take(8).collect();
            format!("user {}", short)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInvitation {
    pub id: String,
    pub group_id: String,
    pub invited_by: String,
    pub invited_email: String,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewGroupInvitation {
    pub group_id: String,
    pub invited_by: String,
    pub invited_email: String,
    pub status: InvitationStatus,
}

/// Response of the group-detail edge function.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDetails {
    pub group: Group,
    #[serde(default)]
    pub members: Vec<GroupMember>,
    #[serde(default)]
    pub is_member: bool,
}

/// A group expense with the payer email and category name resolved server-side.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SharedExpense {
    pub id: String,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    pub currency: String,
    pub user_id: String,
    #[serde(default)]
    pub paid_by: Option<String>,
    #[serde(default = "unavailable_email")]
    pub payer_email: String,
    #[serde(default)]
    pub category_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SharedExpense {
    pub fn payer(&self) -> &str {
        self.paid_by.as_deref().unwrap_or(&self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CategoryBreakdown {
    pub category: String,
    pub currency: String,
    pub total: f64,
}

/// Response of the group-expenses edge function.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupExpenses {
    #[serde(default)]
    pub expenses: Vec<SharedExpense>,
    #[serde(default)]
    pub category_breakdown: Vec<CategoryBreakdown>,
}

impl GroupExpenses {
    /// Sorted distinct currencies among the shared expenses.
    pub fn currencies(&self) -> Vec<String> {
        let mut currencies: Vec<String> =
            self.expenses.iter().map(|e| e.currency.clone()).collect();
        currencies.sort();
        currencies.dedup();
        currencies
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpend {
    pub group_id: String,
    pub group_name: String,
    pub total: f64,
}

/// A user's spend across all their groups for one month and currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub month: u32,
    pub year: i32,
    pub currency: String,
    pub total: f64,
    #[serde(default)]
    pub groups: Vec<GroupSpend>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_email_defaults_to_sentinel() {
        let json = r#"{"id":"m1","group_id":"g1","user_id":"0123456789abcdef","joined_at":"2024-01-02T03:04:05Z"}"#;
        let member: GroupMember = serde_json::from_str(json).unwrap();
        assert_eq!(member.email, EMAIL_UNAVAILABLE);
        assert!(!member.has_email());
        assert_eq!(member.display_name(), "user 01234567");
    }

    #[test]
    fn test_invitation_status_serde() {
        let status: InvitationStatus = serde_json::from_str("\"accepted\"").unwrap();
        assert_eq!(status, InvitationStatus::Accepted);
        assert_eq!(
            serde_json::to_string(&InvitationStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(InvitationStatus::Rejected.as_str(), "rejected");
    }

    #[test]
    fn test_group_expenses_currencies() {
        let json = r#"{"expenses":[
            {"id":"e1","amount":5,"date":"2024-01-01","currency":"USD","user_id":"a","created_at":"2024-01-01T00:00:00Z"},
            {"id":"e2","amount":7,"date":"2024-01-02","currency":"EUR","user_id":"b","created_at":"2024-01-02T00:00:00Z"},
            {"id":"e3","amount":9,"date":"2024-01-03","currency":"USD","user_id":"a","paid_by":"b","created_at":"2024-01-03T00:00:00Z"}
        ]}"#;
        let resp: GroupExpenses = serde_json::from_str(json).unwrap();
        assert_eq!(resp.currencies(), vec!["EUR", "USD"]);
        assert_eq!(resp.expenses[2].payer(), "b");
        assert_eq!(resp.expenses[0].payer(), "a");
        assert!(resp.category_breakdown.is_empty());
    }
}
