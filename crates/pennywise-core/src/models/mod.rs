//! Data models for pennywise entities.
//!
//! These mirror the rows of the backend collections:
//!
//! - `Category`, `Expense`: the per-user ledger
//! - `Group`, `GroupMember`, `GroupInvitation`: shared expense groups
//! - `Notification`: in-app notices (invitations, new shared expenses)
//! - `MonthlyLimit`: per-month spending limits
//! - `GroupTotal`, `GroupExpenses`: edge-function responses

pub mod category;
pub mod expense;
pub mod group;
pub mod limit;
pub mod notification;

pub use category::{Category, CategoryPatch, NewCategory};
pub use expense::{Expense, ExpensePatch, NewExpense, Period};
pub use group::{
    CategoryBreakdown, Group, GroupDetails, GroupExpenses, GroupInvitation, GroupMember,
    GroupSpend, GroupTotal, InvitationStatus, NewGroupInvitation, SharedExpense,
    EMAIL_UNAVAILABLE,
};
pub use limit::MonthlyLimit;
pub use notification::{Notification, NotificationKind};
