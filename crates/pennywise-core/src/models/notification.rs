use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    GroupInvitation,
    ExpenseAdded,
    PaymentRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Group referenced by the payload, present on invitation notices.
    pub fn group_id(&self) -> Option<&str> {
        self.data.get("group_id").and_then(|v| v.as_str())
    }

    pub fn invitation_id(&self) -> Option<&str> {
        self.data.get("invitation_id").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invitation_notification() {
        let json = r#"{"id":"n1","user_id":"u1","type":"group_invitation","title":"Invite",
            "message":"You were invited","read":false,
            "data":{"group_id":"g1","invitation_id":"i1"},"created_at":"2024-05-01T10:00:00Z"}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, NotificationKind::GroupInvitation);
        assert_eq!(n.group_id(), Some("g1"));
        assert_eq!(n.invitation_id(), Some("i1"));
    }

    #[test]
    fn test_missing_data_payload() {
        let json = r#"{"id":"n2","user_id":"u1","type":"expense_added","title":"t","message":"m",
            "created_at":"2024-05-01T10:00:00Z"}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert!(!n.read);
        assert_eq!(n.group_id(), None);
    }
}
