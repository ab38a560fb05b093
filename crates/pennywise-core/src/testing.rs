//! In-memory backend and notifier used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tokio::sync::Notify;

use crate::api::{ApiError, GroupBackend, LedgerBackend, NotificationFilter};
use crate::models::{
    Category, CategoryPatch, Expense, ExpensePatch, Group, GroupDetails, GroupExpenses,
    GroupInvitation, GroupMember, GroupTotal, InvitationStatus, MonthlyLimit, NewCategory,
    NewExpense, NewGroupInvitation, Notification, NotificationKind, Period, SharedExpense,
};
use crate::notify::{NoticeLevel, Notifier};

#[derive(Clone)]
enum Failure {
    Server(String),
    Denied,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    pub categories: Mutex<Vec<Category>>,
    pub expenses: Mutex<Vec<Expense>>,
    pub totals: Mutex<HashMap<Period, GroupTotal>>,
    pub limits: Mutex<Vec<MonthlyLimit>>,
    pub groups: Mutex<Vec<Group>>,
    pub members: Mutex<Vec<GroupMember>>,
    pub invitations: Mutex<Vec<GroupInvitation>>,
    pub notifications: Mutex<Vec<Notification>>,
    pub shared: Mutex<HashMap<String, GroupExpenses>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, Failure>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    next_id: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn fail(&self, op: &'static str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(op, Failure::Server(message.to_string()));
    }

    pub fn deny(&self, op: &'static str) {
        self.failures.lock().unwrap().insert(op, Failure::Denied);
    }

    pub fn recover(&self, op: &'static str) {
        self.failures.lock().unwrap().remove(op);
    }

    /// Hold every call to `op` until the returned handle is notified.
    pub fn hold(&self, op: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(op, Arc::clone(&gate));
        gate
    }

    pub fn release(&self, op: &'static str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(op) {
            gate.notify_waiters();
        }
    }

    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn enter(&self, op: &'static str) -> Result<(), ApiError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;
        let gate = self.gates.lock().unwrap().get(op).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let failure = self.failures.lock().unwrap().get(op).cloned();
        match failure {
            Some(Failure::Server(message)) => Err(ApiError::ServerError(message)),
            Some(Failure::Denied) => Err(ApiError::AccessDenied(format!("{} denied", op))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerBackend for MockBackend {
    async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>, ApiError> {
        self.enter("list_categories").await?;
        Ok(self
            .categories
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<Category, ApiError> {
        self.enter("insert_category").await?;
        let row = Category {
            id: self.id("cat"),
            name: category.name.clone(),
            user_id: category.user_id.clone(),
            is_default: category.is_default,
            created_at: Utc::now(),
        };
        self.categories.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<Category, ApiError> {
        self.enter("update_category").await?;
        let mut rows = self.categories.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        patch.apply(row);
        Ok(row.clone())
    }

    async fn delete_category(&self, id: &str) -> Result<(), ApiError> {
        self.enter("delete_category").await?;
        self.categories.lock().unwrap().retain(|c| c.id != id);
        Ok(())
    }

    async fn list_expenses(&self, user_id: &str) -> Result<Vec<Expense>, ApiError> {
        self.enter("list_expenses").await?;
        Ok(self
            .expenses
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_expense(&self, expense: &NewExpense) -> Result<Expense, ApiError> {
        self.enter("insert_expense").await?;
        let row = Expense {
            id: self.id("exp"),
            amount: expense.amount,
            description: expense.description.clone(),
            date: expense.date,
            category_id: expense.category_id.clone(),
            user_id: expense.user_id.clone(),
            group_id: expense.group_id.clone(),
            currency: expense.currency.clone(),
            paid_by: expense.paid_by.clone(),
            created_at: Utc::now(),
        };
        self.expenses.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn update_expense(&self, id: &str, patch: &ExpensePatch) -> Result<Expense, ApiError> {
        self.enter("update_expense").await?;
        let mut rows = self.expenses.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        patch.apply(row);
        Ok(row.clone())
    }

    async fn delete_expense(&self, id: &str) -> Result<(), ApiError> {
        self.enter("delete_expense").await?;
        self.expenses.lock().unwrap().retain(|e| e.id != id);
        Ok(())
    }

    async fn group_totals(&self, period: &Period) -> Result<GroupTotal, ApiError> {
        self.enter("group_totals").await?;
        Ok(self
            .totals
            .lock()
            .unwrap()
            .get(period)
            .cloned()
            .unwrap_or_else(|| GroupTotal {
                month: period.month,
                year: period.year,
                currency: period.currency.clone(),
                total: 0.0,
                groups: Vec::new(),
            }))
    }

    async fn get_monthly_limit(
        &self,
        user_id: &str,
        period: &Period,
    ) -> Result<Option<MonthlyLimit>, ApiError> {
        self.enter("get_monthly_limit").await?;
        Ok(self
            .limits
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.user_id == user_id && l.period() == *period)
            .cloned())
    }

    async fn upsert_monthly_limit(&self, limit: &MonthlyLimit) -> Result<MonthlyLimit, ApiError> {
        self.enter("upsert_monthly_limit").await?;
        let mut rows = self.limits.lock().unwrap();
        let period = limit.period();
        if let Some(row) = rows
            .iter_mut()
            .find(|l| l.user_id == limit.user_id && l.period() == period)
        {
            row.amount = limit.amount;
            return Ok(row.clone());
        }
        let mut row = limit.clone();
        row.id = Some(self.id("limit"));
        rows.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl GroupBackend for MockBackend {
    async fn memberships(&self, user_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.enter("memberships").await?;
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn groups_by_id(&self, ids: &[String]) -> Result<Vec<Group>, ApiError> {
        self.enter("groups_by_id").await?;
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .filter(|g| ids.contains(&g.id))
            .cloned()
            .collect())
    }

    async fn insert_group(&self, name: &str, created_by: &str) -> Result<Group, ApiError> {
        self.enter("insert_group").await?;
        let group = Group {
            id: self.id("group"),
            name: name.to_string(),
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            members: Vec::new(),
        };
        self.groups.lock().unwrap().push(group.clone());
        Ok(group)
    }

    async fn rename_group(&self, id: &str, name: &str) -> Result<Group, ApiError> {
        self.enter("rename_group").await?;
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        group.name = name.to_string();
        Ok(group.clone())
    }

    async fn delete_group(&self, id: &str) -> Result<(), ApiError> {
        self.enter("delete_group").await?;
        self.groups.lock().unwrap().retain(|g| g.id != id);
        self.members.lock().unwrap().retain(|m| m.group_id != id);
        Ok(())
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.enter("group_members").await?;
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.group_id == group_id)
            .map(|m| GroupMember {
                email: crate::models::EMAIL_UNAVAILABLE.to_string(),
                ..m.clone()
            })
            .collect())
    }

    async fn insert_member(&self, group_id: &str, user_id: &str) -> Result<GroupMember, ApiError> {
        self.enter("insert_member").await?;
        let member = GroupMember {
            id: self.id("member"),
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            joined_at: Utc::now(),
        };
        self.members.lock().unwrap().push(member.clone());
        Ok(member)
    }

    async fn remove_member(&self, group_id: &str, user_id: &str) -> Result<(), ApiError> {
        self.enter("remove_member").await?;
        self.members
            .lock()
            .unwrap()
            .retain(|m| !(m.group_id == group_id && m.user_id == user_id));
        Ok(())
    }

    async fn members_with_emails(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.enter("members_with_emails").await?;
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn members_with_emails_rpc(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.enter("members_with_emails_rpc").await?;
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn group_details(&self, group_id: &str) -> Result<GroupDetails, ApiError> {
        self.enter("group_details").await?;
        let group = self
            .groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(group_id.to_string()))?;
        let members: Vec<GroupMember> = self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect();
        Ok(GroupDetails {
            group,
            is_member: !members.is_empty(),
            members,
        })
    }

    async fn group_expenses(&self, group_id: &str) -> Result<GroupExpenses, ApiError> {
        self.enter("group_expenses").await?;
        Ok(self
            .shared
            .lock()
            .unwrap()
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn invitations_for_group(
        &self,
        group_id: &str,
        status: InvitationStatus,
    ) -> Result<Vec<GroupInvitation>, ApiError> {
        self.enter("invitations_for_group").await?;
        Ok(self
            .invitations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.group_id == group_id && i.status == status)
            .cloned()
            .collect())
    }

    async fn invitations_for_email(
        &self,
        email: &str,
        status: InvitationStatus,
    ) -> Result<Vec<GroupInvitation>, ApiError> {
        self.enter("invitations_for_email").await?;
        Ok(self
            .invitations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.invited_email == email && i.status == status)
            .cloned()
            .collect())
    }

    async fn insert_invitation(
        &self,
        invitation: &NewGroupInvitation,
    ) -> Result<GroupInvitation, ApiError> {
        self.enter("insert_invitation").await?;
        let row = GroupInvitation {
            id: self.id("inv"),
            group_id: invitation.group_id.clone(),
            invited_by: invitation.invited_by.clone(),
            invited_email: invitation.invited_email.clone(),
            status: invitation.status,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.invitations.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn set_invitation_status(
        &self,
        id: &str,
        status: InvitationStatus,
    ) -> Result<GroupInvitation, ApiError> {
        self.enter("set_invitation_status").await?;
        let mut rows = self.invitations.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        row.status = status;
        row.updated_at = Some(Utc::now());
        Ok(row.clone())
    }

    async fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, ApiError> {
        self.enter("notifications").await?;
        Ok(self
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_notifications_read(&self, filter: NotificationFilter) -> Result<(), ApiError> {
        self.enter("mark_notifications_read").await?;
        for n in self.notifications.lock().unwrap().iter_mut() {
            let hit = match &filter {
                NotificationFilter::One(id) => &n.id == id,
                NotificationFilter::AllFor(user_id) => &n.user_id == user_id,
            };
            if hit {
                n.read = true;
            }
        }
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        self.enter("delete_notification").await?;
        self.notifications.lock().unwrap().retain(|n| n.id != id);
        Ok(())
    }
}

/// Notifier that keeps every notice for inspection.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn errors(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == NoticeLevel::Error)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn successes(&self) -> usize {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == NoticeLevel::Success)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices.lock().unwrap().push((level, message.to_string()));
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub(crate) fn category(id: &str, name: &str, user_id: &str, is_default: bool) -> Category {
    Category {
        id: id.to_string(),
        name: name.to_string(),
        user_id: user_id.to_string(),
        is_default,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub(crate) fn expense(id: &str, amount: f64, on: NaiveDate, category_id: &str, currency: &str) -> Expense {
    Expense {
        id: id.to_string(),
        amount,
        description: format!("expense {}", id),
        date: on,
        category_id: category_id.to_string(),
        user_id: "u1".to_string(),
        group_id: None,
        currency: currency.to_string(),
        paid_by: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub(crate) fn member(group_id: &str, user_id: &str) -> GroupMember {
    GroupMember {
        id: format!("m-{}-{}", group_id, user_id),
        group_id: group_id.to_string(),
        user_id: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        joined_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

pub(crate) fn group(id: &str, name: &str, created_by: &str) -> Group {
    Group {
        id: id.to_string(),
        name: name.to_string(),
        created_by: created_by.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        members: Vec::new(),
    }
}

pub(crate) fn shared_expense(id: &str, amount: f64, currency: &str, payer: &str) -> SharedExpense {
    SharedExpense {
        id: id.to_string(),
        amount,
        description: String::new(),
        date: date(2024, 3, 1),
        currency: currency.to_string(),
        user_id: payer.to_string(),
        paid_by: Some(payer.to_string()),
        payer_email: format!("{}@example.com", payer),
        category_name: None,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    }
}

pub(crate) fn invitation_notice(id: &str, user_id: &str, group_id: &str, invitation_id: &str) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: user_id.to_string(),
        kind: NotificationKind::GroupInvitation,
        title: "Group invitation".to_string(),
        message: "You have been invited".to_string(),
        read: false,
        data: serde_json::json!({ "group_id": group_id, "invitation_id": invitation_id }),
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    }
}
