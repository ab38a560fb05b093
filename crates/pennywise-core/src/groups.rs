//! Groups, membership and invitations.
//!
//! Unlike the ledger stores these are not kept in an entity cache: group
//! screens call the backend directly, with group detail and shared expenses
//! going through a [`Prefetcher`] so they can be warmed before navigation.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, GroupBackend, NotificationFilter};
use crate::auth::SessionData;
use crate::balance::{compute_balances, MemberBalance};
use crate::cache::Prefetcher;
use crate::models::{
    Group, GroupDetails, GroupExpenses, GroupInvitation, GroupMember, InvitationStatus,
    NewGroupInvitation,
};
use crate::notify::Notifier;

pub struct GroupService {
    backend: Arc<dyn GroupBackend>,
    notifier: Arc<dyn Notifier>,
    details: Arc<Prefetcher<GroupDetails>>,
    expenses: Arc<Prefetcher<GroupExpenses>>,
    session: Option<watch::Receiver<Option<SessionData>>>,
    /// User the prefetched data was loaded for.
    cached_for: watch::Sender<Option<String>>,
}

impl GroupService {
    pub fn new(backend: Arc<dyn GroupBackend>, notifier: Arc<dyn Notifier>) -> Self {
        let (cached_for, _) = watch::channel(None);
        Self {
            backend,
            notifier,
            details: Arc::new(Prefetcher::new("group_details")),
            expenses: Arc::new(Prefetcher::new("group_expenses")),
            session: None,
            cached_for,
        }
    }

    /// Follow the signed-in user so prefetched group data never outlives a
    /// user switch.
    pub fn with_session(mut self, session: watch::Receiver<Option<SessionData>>) -> Self {
        self.session = Some(session);
        self
    }

    /// Drop prefetched data loaded for someone other than the current user.
    fn follow_user(&self) {
        let Some(session) = &self.session else {
            return;
        };
        let current = session.borrow().as_ref().map(|s| s.user_id.clone());
        let switched = self.cached_for.send_if_modified(|cached_for| {
            if *cached_for == current {
                return false;
            }
            *cached_for = current.clone();
            true
        });
        if switched {
            debug!(user_id = ?current, "User changed, dropping prefetched group data");
            self.clear_cache();
        }
    }

    fn reject(&self, message: &str) -> ApiError {
        self.notifier.error(message);
        ApiError::Validation(message.to_string())
    }

    fn surface(&self, action: &str, e: ApiError) -> ApiError {
        self.notifier.error(&format!("Failed to {}: {}", action, e));
        e
    }

    // ===== Groups =====

    /// Groups the user belongs to, sorted by name.
    pub async fn list_groups(&self, user_id: &str) -> Result<Vec<Group>, ApiError> {
        let memberships = self.backend.memberships(user_id).await?;
        let ids: Vec<String> = memberships.into_iter().map(|m| m.group_id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut groups = self.backend.groups_by_id(&ids).await?;
        groups.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(groups)
    }

    /// Create a group with `user_id` as creator and first member.
    pub async fn create_group(&self, user_id: &str, name: &str) -> Result<Group, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.reject("Group name is required"));
        }

        let group = self
            .backend
            .insert_group(name, user_id)
            .await
            .map_err(|e| self.surface("create group", e))?;

        if let Err(e) = self.backend.insert_member(&group.id, user_id).await {
            // A group nobody belongs to is invisible; remove it again.
            if let Err(cleanup) = self.backend.delete_group(&group.id).await {
                warn!(group_id = %group.id, error = %cleanup, "Failed to remove memberless group");
            }
            return Err(self.surface("create group", e));
        }

        info!(group_id = %group.id, "Group created");
        self.notifier.success("Group created");
        Ok(group)
    }

    pub async fn rename_group(&self, group_id: &str, name: &str) -> Result<Group, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.reject("Group name is required"));
        }
        let group = self
            .backend
            .rename_group(group_id, name)
            .await
            .map_err(|e| self.surface("rename group", e))?;
        self.details.invalidate(group_id);
        self.notifier.success("Group renamed");
        Ok(group)
    }

    /// Delete a group. Only its creator may do this.
    pub async fn delete_group(&self, group: &Group, user_id: &str) -> Result<(), ApiError> {
        if !group.is_creator(user_id) {
            return Err(self.reject("Only the group creator can delete this group"));
        }
        self.backend
            .delete_group(&group.id)
            .await
            .map_err(|e| self.surface("delete group", e))?;
        self.forget(&group.id);
        info!(group_id = %group.id, "Group deleted");
        self.notifier.success("Group deleted");
        Ok(())
    }

    pub async fn leave_group(&self, group_id: &str, user_id: &str) -> Result<(), ApiError> {
        self.backend
            .remove_member(group_id, user_id)
            .await
            .map_err(|e| self.surface("leave group", e))?;
        self.forget(group_id);
        info!(group_id = group_id, "Left group");
        self.notifier.success("You left the group");
        Ok(())
    }

    // ===== Group data =====

    /// Group with its members. Fails with `AccessDenied` when the user is not
    /// a member, so the caller can navigate away.
    pub async fn group_details(&self, group_id: &str) -> Result<GroupDetails, ApiError> {
        self.follow_user();
        let backend = Arc::clone(&self.backend);
        let id = group_id.to_string();
        let details = self
            .details
            .prefetch(group_id, move || async move { backend.group_details(&id).await })
            .await
            .map_err(ApiError::from_shared)?;

        if !details.is_member {
            self.details.invalidate(group_id);
            return Err(ApiError::AccessDenied(
                "You are not a member of this group".to_string(),
            ));
        }
        Ok(details)
    }

    /// Members with their emails resolved where the backend allows it.
    pub async fn members(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        match self.backend.members_with_emails(group_id).await {
            Ok(members) => return Ok(members),
            Err(e) => warn!(group_id = group_id, error = %e, "Member lookup failed, reading table"),
        }

        match self.backend.group_members(group_id).await {
            Ok(members) => Ok(members),
            Err(e) if e.is_policy_denial() => {
                debug!(group_id = group_id, "Member table denied, using RPC");
                self.backend.members_with_emails_rpc(group_id).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn shared_expenses(&self, group_id: &str) -> Result<GroupExpenses, ApiError> {
        self.follow_user();
        let backend = Arc::clone(&self.backend);
        let id = group_id.to_string();
        self.expenses
            .prefetch(group_id, move || async move { backend.group_expenses(&id).await })
            .await
            .map_err(ApiError::from_shared)
    }

    /// Start loading a group's detail and expenses in the background.
    pub fn prefetch_group(&self, group_id: &str) {
        self.follow_user();
        let backend = Arc::clone(&self.backend);
        let id = group_id.to_string();
        self.details
            .warm(group_id, move || async move { backend.group_details(&id).await });

        let backend = Arc::clone(&self.backend);
        let id = group_id.to_string();
        self.expenses
            .warm(group_id, move || async move { backend.group_expenses(&id).await });
    }

    /// Balances of every member over the group's expenses in `currency`.
    pub async fn balances(&self, group_id: &str, currency: &str) -> Result<Vec<MemberBalance>, ApiError> {
        let (details, expenses) =
            tokio::join!(self.group_details(group_id), self.shared_expenses(group_id));
        let details = details?;
        let expenses = expenses?;

        let members = if details.members.iter().all(GroupMember::has_email) {
            details.members
        } else {
            self.members(group_id).await.unwrap_or(details.members)
        };
        Ok(compute_balances(&members, &expenses.expenses, currency))
    }

    // ===== Invitations =====

    /// Invite `email` to a group. Every check runs before anything is written.
    pub async fn invite(
        &self,
        group_id: &str,
        inviter_id: &str,
        inviter_email: &str,
        email: &str,
    ) -> Result<GroupInvitation, ApiError> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(self.reject("Please enter a valid email address"));
        }
        if email.eq_ignore_ascii_case(inviter_email.trim()) {
            return Err(self.reject("You cannot invite yourself"));
        }

        let members = self
            .members(group_id)
            .await
            .map_err(|e| self.surface("send invitation", e))?;
        if members.iter().any(|m| m.email.eq_ignore_ascii_case(&email)) {
            return Err(self.reject("This user is already a member of the group"));
        }

        let pending = self
            .backend
            .invitations_for_group(group_id, InvitationStatus::Pending)
            .await
            .map_err(|e| self.surface("send invitation", e))?;
        if pending.iter().any(|i| i.invited_email.eq_ignore_ascii_case(&email)) {
            return Err(self.reject("An invitation is already pending for this email"));
        }

        let invitation = NewGroupInvitation {
            group_id: group_id.to_string(),
            invited_by: inviter_id.to_string(),
            invited_email: email,
            status: InvitationStatus::Pending,
        };
        let created = self
            .backend
            .insert_invitation(&invitation)
            .await
            .map_err(|e| self.surface("send invitation", e))?;

        info!(group_id = group_id, invitation_id = %created.id, "Invitation sent");
        self.notifier.success("Invitation sent");
        Ok(created)
    }

    pub async fn pending_invitations(&self, email: &str) -> Result<Vec<GroupInvitation>, ApiError> {
        self.backend
            .invitations_for_email(&email.trim().to_lowercase(), InvitationStatus::Pending)
            .await
    }

    /// Accept an invitation: mark it accepted, join the group and mark the
    /// notification that announced it as read. If joining fails the
    /// invitation goes back to pending so it can be accepted again.
    pub async fn accept_invitation(
        &self,
        invitation: &GroupInvitation,
        user_id: &str,
        notification_id: Option<&str>,
    ) -> Result<GroupMember, ApiError> {
        self.backend
            .set_invitation_status(&invitation.id, InvitationStatus::Accepted)
            .await
            .map_err(|e| self.surface("accept invitation", e))?;
        let member = match self.backend.insert_member(&invitation.group_id, user_id).await {
            Ok(member) => member,
            Err(e) => {
                if let Err(revert) = self
                    .backend
                    .set_invitation_status(&invitation.id, InvitationStatus::Pending)
                    .await
                {
                    warn!(invitation_id = %invitation.id, error = %revert, "Failed to reopen invitation");
                }
                return Err(self.surface("join group", e));
            }
        };

        self.mark_notice_read(notification_id).await;
        self.forget(&invitation.group_id);
        info!(group_id = %invitation.group_id, "Invitation accepted");
        self.notifier.success("You joined the group");
        Ok(member)
    }

    pub async fn reject_invitation(
        &self,
        invitation: &GroupInvitation,
        notification_id: Option<&str>,
    ) -> Result<(), ApiError> {
        self.backend
            .set_invitation_status(&invitation.id, InvitationStatus::Rejected)
            .await
            .map_err(|e| self.surface("reject invitation", e))?;
        self.mark_notice_read(notification_id).await;
        info!(invitation_id = %invitation.id, "Invitation rejected");
        self.notifier.success("Invitation declined");
        Ok(())
    }

    async fn mark_notice_read(&self, notification_id: Option<&str>) {
        let Some(id) = notification_id else {
            return;
        };
        if let Err(e) = self
            .backend
            .mark_notifications_read(NotificationFilter::One(id.to_string()))
            .await
        {
            warn!(notification_id = id, error = %e, "Failed to mark notification read");
        }
    }

    // ===== Cache =====

    fn forget(&self, group_id: &str) {
        self.details.invalidate(group_id);
        self.expenses.invalidate(group_id);
    }

    /// Drop all prefetched group data (sign-out, pull-to-refresh).
    pub fn clear_cache(&self) {
        self.details.clear_cache();
        self.expenses.clear_cache();
    }
}

/// Loose shape check; the backend does the real validation.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .map(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
            .unwrap_or(false)
}
