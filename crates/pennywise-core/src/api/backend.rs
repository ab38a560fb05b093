//! Typed operations over the backend, split by the services that use them.
//!
//! The stores and services depend on these traits rather than on
//! `ApiClient` directly, so tests can substitute an in-memory backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{
    Category, CategoryPatch, Expense, ExpensePatch, Group, GroupDetails, GroupExpenses,
    GroupInvitation, GroupMember, GroupTotal, InvitationStatus, MonthlyLimit, NewCategory,
    NewExpense, NewGroupInvitation, Notification, Period,
};

use super::client::{eq, in_list};
use super::{ApiClient, ApiError};

// Table names
const CATEGORIES: &str = "categories";
const EXPENSES: &str = "expenses";
const GROUPS: &str = "groups";
const GROUP_MEMBERS: &str = "group_members";
const GROUP_INVITATIONS: &str = "group_invitations";
const NOTIFICATIONS: &str = "notifications";
const MONTHLY_LIMITS: &str = "monthly_limits";

// Edge functions and RPCs
const FN_GROUP_MEMBERS: &str = "get-group-members";
const FN_GROUP_DETAILS: &str = "get-group-details";
const FN_GROUP_EXPENSES: &str = "get-group-expenses";
const FN_USER_GROUP_TOTALS: &str = "get-user-group-totals";
const RPC_MEMBERS_WITH_EMAILS: &str = "get_group_members_with_emails";

const MONTHLY_LIMIT_CONFLICT: &str = "user_id,month,year,currency";

/// Collections backing the entity stores.
#[async_trait]
pub trait LedgerBackend: Send + Sync + 'static {
    async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>, ApiError>;
    async fn insert_category(&self, category: &NewCategory) -> Result<Category, ApiError>;
    async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<Category, ApiError>;
    async fn delete_category(&self, id: &str) -> Result<(), ApiError>;

    async fn list_expenses(&self, user_id: &str) -> Result<Vec<Expense>, ApiError>;
    async fn insert_expense(&self, expense: &NewExpense) -> Result<Expense, ApiError>;
    async fn update_expense(&self, id: &str, patch: &ExpensePatch) -> Result<Expense, ApiError>;
    async fn delete_expense(&self, id: &str) -> Result<(), ApiError>;

    async fn group_totals(&self, period: &Period) -> Result<GroupTotal, ApiError>;

    async fn get_monthly_limit(
        &self,
        user_id: &str,
        period: &Period,
    ) -> Result<Option<MonthlyLimit>, ApiError>;
    async fn upsert_monthly_limit(&self, limit: &MonthlyLimit) -> Result<MonthlyLimit, ApiError>;
}

/// Groups, invitations and notifications. Several of these need server-side
/// resolution of other users' emails, hence the edge functions.
#[async_trait]
pub trait GroupBackend: Send + Sync + 'static {
    async fn memberships(&self, user_id: &str) -> Result<Vec<GroupMember>, ApiError>;
    async fn groups_by_id(&self, ids: &[String]) -> Result<Vec<Group>, ApiError>;
    async fn insert_group(&self, name: &str, created_by: &str) -> Result<Group, ApiError>;
    async fn rename_group(&self, id: &str, name: &str) -> Result<Group, ApiError>;
    async fn delete_group(&self, id: &str) -> Result<(), ApiError>;

    /// Direct table read; row-level policies may deny it.
    async fn group_members(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError>;
    async fn insert_member(&self, group_id: &str, user_id: &str) -> Result<GroupMember, ApiError>;
    async fn remove_member(&self, group_id: &str, user_id: &str) -> Result<(), ApiError>;
    async fn members_with_emails(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError>;
    async fn members_with_emails_rpc(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError>;
    async fn group_details(&self, group_id: &str) -> Result<GroupDetails, ApiError>;
    async fn group_expenses(&self, group_id: &str) -> Result<GroupExpenses, ApiError>;

    async fn invitations_for_group(
        &self,
        group_id: &str,
        status: InvitationStatus,
    ) -> Result<Vec<GroupInvitation>, ApiError>;
    async fn invitations_for_email(
        &self,
        email: &str,
        status: InvitationStatus,
    ) -> Result<Vec<GroupInvitation>, ApiError>;
    async fn insert_invitation(
        &self,
        invitation: &NewGroupInvitation,
    ) -> Result<GroupInvitation, ApiError>;
    async fn set_invitation_status(
        &self,
        id: &str,
        status: InvitationStatus,
    ) -> Result<GroupInvitation, ApiError>;

    async fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, ApiError>;
    async fn mark_notifications_read(&self, filter: NotificationFilter) -> Result<(), ApiError>;
    async fn delete_notification(&self, id: &str) -> Result<(), ApiError>;
}

/// Which notifications a bulk update applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationFilter {
    One(String),
    AllFor(String),
}

#[derive(Serialize)]
struct GroupArgs<'a> {
    group_id: &'a str,
}

#[derive(Serialize)]
struct TotalsArgs<'a> {
    month: u32,
    year: i32,
    currency: &'a str,
}

#[derive(Serialize)]
struct NewGroupRow<'a> {
    name: &'a str,
    created_by: &'a str,
}

#[derive(Serialize)]
struct NewMemberRow<'a> {
    group_id: &'a str,
    user_id: &'a str,
}

#[derive(Serialize)]
struct NamePatch<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct StatusPatch {
    status: InvitationStatus,
}

#[derive(Serialize)]
struct ReadPatch {
    read: bool,
}

#[derive(Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<GroupMember>,
}

fn first_or_not_found<T>(rows: Vec<T>, what: &str, id: &str) -> Result<T, ApiError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound(format!("{} {}", what, id)))
}

#[async_trait]
impl LedgerBackend for ApiClient {
    async fn list_categories(&self, user_id: &str) -> Result<Vec<Category>, ApiError> {
        self.select(CATEGORIES, &[("user_id", eq(user_id))], Some("name.asc"))
            .await
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<Category, ApiError> {
        self.insert(CATEGORIES, category).await
    }

    async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<Category, ApiError> {
        let rows = self.update(CATEGORIES, &[("id", eq(id))], patch).await?;
        first_or_not_found(rows, "category", id)
    }

    async fn delete_category(&self, id: &str) -> Result<(), ApiError> {
        self.delete(CATEGORIES, &[("id", eq(id))]).await
    }

    async fn list_expenses(&self, user_id: &str) -> Result<Vec<Expense>, ApiError> {
        self.select(EXPENSES, &[("user_id", eq(user_id))], Some("date.desc"))
            .await
    }

    async fn insert_expense(&self, expense: &NewExpense) -> Result<Expense, ApiError> {
        self.insert(EXPENSES, expense).await
    }

    async fn update_expense(&self, id: &str, patch: &ExpensePatch) -> Result<Expense, ApiError> {
        let rows = self.update(EXPENSES, &[("id", eq(id))], patch).await?;
        first_or_not_found(rows, "expense", id)
    }

    async fn delete_expense(&self, id: &str) -> Result<(), ApiError> {
        self.delete(EXPENSES, &[("id", eq(id))]).await
    }

    async fn group_totals(&self, period: &Period) -> Result<GroupTotal, ApiError> {
        let args = TotalsArgs {
            month: period.month,
            year: period.year,
            currency: &period.currency,
        };
        self.invoke(FN_USER_GROUP_TOTALS, &args).await
    }

    async fn get_monthly_limit(
        &self,
        user_id: &str,
        period: &Period,
    ) -> Result<Option<MonthlyLimit>, ApiError> {
        let rows: Vec<MonthlyLimit> = self
            .select(
                MONTHLY_LIMITS,
                &[
                    ("user_id", eq(user_id)),
                    ("month", eq(period.month)),
                    ("year", eq(period.year)),
                    ("currency", eq(&period.currency)),
                ],
                None,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_monthly_limit(&self, limit: &MonthlyLimit) -> Result<MonthlyLimit, ApiError> {
        self.upsert(MONTHLY_LIMITS, limit, MONTHLY_LIMIT_CONFLICT).await
    }
}

#[async_trait]
impl GroupBackend for ApiClient {
    async fn memberships(&self, user_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.select(GROUP_MEMBERS, &[("user_id", eq(user_id))], None)
            .await
    }

    async fn groups_by_id(&self, ids: &[String]) -> Result<Vec<Group>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(GROUPS, &[("id", in_list(ids))], Some("created_at.desc"))
            .await
    }

    async fn insert_group(&self, name: &str, created_by: &str) -> Result<Group, ApiError> {
        self.insert(GROUPS, &NewGroupRow { name, created_by }).await
    }

    async fn rename_group(&self, id: &str, name: &str) -> Result<Group, ApiError> {
        let rows = self
            .update(GROUPS, &[("id", eq(id))], &NamePatch { name })
            .await?;
        first_or_not_found(rows, "group", id)
    }

    async fn delete_group(&self, id: &str) -> Result<(), ApiError> {
        self.delete(GROUPS, &[("id", eq(id))]).await
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.select(
            GROUP_MEMBERS,
            &[("group_id", eq(group_id))],
            Some("joined_at.asc"),
        )
        .await
    }

    async fn insert_member(&self, group_id: &str, user_id: &str) -> Result<GroupMember, ApiError> {
        self.insert(GROUP_MEMBERS, &NewMemberRow { group_id, user_id })
            .await
    }

    async fn remove_member(&self, group_id: &str, user_id: &str) -> Result<(), ApiError> {
        self.delete(
            GROUP_MEMBERS,
            &[("group_id", eq(group_id)), ("user_id", eq(user_id))],
        )
        .await
    }

    async fn members_with_emails(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        let resp: MembersResponse = self
            .invoke(FN_GROUP_MEMBERS, &GroupArgs { group_id })
            .await?;
        Ok(resp.members)
    }

    async fn members_with_emails_rpc(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.rpc(RPC_MEMBERS_WITH_EMAILS, &GroupArgs { group_id })
            .await
    }

    async fn group_details(&self, group_id: &str) -> Result<GroupDetails, ApiError> {
        self.invoke(FN_GROUP_DETAILS, &GroupArgs { group_id }).await
    }

    async fn group_expenses(&self, group_id: &str) -> Result<GroupExpenses, ApiError> {
        self.invoke(FN_GROUP_EXPENSES, &GroupArgs { group_id }).await
    }

    async fn invitations_for_group(
        &self,
        group_id: &str,
        status: InvitationStatus,
    ) -> Result<Vec<GroupInvitation>, ApiError> {
        self.select(
            GROUP_INVITATIONS,
            &[("group_id", eq(group_id)), ("status", eq(status.as_str()))],
            Some("created_at.desc"),
        )
        .await
    }

    async fn invitations_for_email(
        &self,
        email: &str,
        status: InvitationStatus,
    ) -> Result<Vec<GroupInvitation>, ApiError> {
        self.select(
            GROUP_INVITATIONS,
            &[("invited_email", eq(email)), ("status", eq(status.as_str()))],
            Some("created_at.desc"),
        )
        .await
    }

    async fn insert_invitation(
        &self,
        invitation: &NewGroupInvitation,
    ) -> Result<GroupInvitation, ApiError> {
        self.insert(GROUP_INVITATIONS, invitation).await
    }

    async fn set_invitation_status(
        &self,
        id: &str,
        status: InvitationStatus,
    ) -> Result<GroupInvitation, ApiError> {
        let rows = self
            .update(GROUP_INVITATIONS, &[("id", eq(id))], &StatusPatch { status })
            .await?;
        first_or_not_found(rows, "invitation", id)
    }

    async fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, ApiError> {
        self.select(
            NOTIFICATIONS,
            &[("user_id", eq(user_id))],
            Some("created_at.desc"),
        )
        .await
    }

    async fn mark_notifications_read(&self, filter: NotificationFilter) -> Result<(), ApiError> {
        let filters = match filter {
            NotificationFilter::One(id) => vec![("id", eq(id))],
            NotificationFilter::AllFor(user_id) => {
                vec![("user_id", eq(user_id)), ("read", eq(false))]
            }
        };
        let _: Vec<serde_json::Value> = self
            .update(NOTIFICATIONS, &filters, &ReadPatch { read: true })
            .await?;
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<(), ApiError> {
        self.delete(NOTIFICATIONS, &[("id", eq(id))]).await
    }
}
