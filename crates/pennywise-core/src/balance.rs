//! Per-member balances for a group's shared expenses.
//!
//! Every expense is split equally among all current members. Balances are
//! computed per currency and never mixed: a positive balance means the member
//! is owed money, a negative one that they owe.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::models::{Expense, GroupMember, SharedExpense};

/// What the split needs to know about an expense.
pub trait SplitExpense {
    fn amount(&self) -> f64;
    fn currency(&self) -> &str;
    /// Member who paid; the owner when no payer was recorded.
    fn payer(&self) -> &str;
}

impl SplitExpense for Expense {
    fn amount(&self) -> f64 {
        self.amount
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn payer(&self) -> &str {
        Expense::payer(self)
    }
}

impl SplitExpense for SharedExpense {
    fn amount(&self) -> f64 {
        self.amount
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn payer(&self) -> &str {
        SharedExpense::payer(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberBalance {
    pub user_id: String,
    pub email: String,
    pub balance: f64,
}

/// A payment that moves a debtor towards zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub from_user: String,
    pub to_user: String,
    pub amount: f64,
}

/// Balances of `members` over the expenses in `currency`, in member order.
///
/// Expenses paid by someone who is no longer a member are left out so the
/// balances still sum to zero.
pub fn compute_balances<E: SplitExpense>(
    members: &[GroupMember],
    expenses: &[E],
    currency: &str,
) -> Vec<MemberBalance> {
    let mut balances: Vec<MemberBalance> = members
        .iter()
        .map(|m| MemberBalance {
            user_id: m.user_id.clone(),
            email: m.display_name(),
            balance: 0.0,
        })
        .collect();
    if balances.is_empty() {
        return balances;
    }

    let index: HashMap<&str, usize> = members
        .iter()
        .enumerate()
        .map(|(i, m)| (m.user_id.as_str(), i))
        .collect();
    let share_count = members.len() as f64;

    for expense in expenses.iter().filter(|e| e.currency() == currency) {
        let Some(&payer) = index.get(expense.payer()) else {
            debug!(payer = expense.payer(), "Skipping expense paid by a former member");
            continue;
        };
        let share = expense.amount() / share_count;
        for (i, entry) in balances.iter_mut().enumerate() {
            if i == payer {
                entry.balance += expense.amount() - share;
            } else {
                entry.balance -= share;
            }
        }
    }
    balances
}

/// Greedy settle-up: the largest debtor pays the largest creditor until
/// everyone is within a cent of zero.
pub fn settle_up(balances: &[MemberBalance]) -> Vec<Transfer> {
    let mut creditors: Vec<(String, f64)> = Vec::new();
    let mut debtors: Vec<(String, f64)> = Vec::new();
    for b in balances {
        let amount = round_to_2_decimals(b.balance);
        if amount > 0.0 {
            creditors.push((b.user_id.clone(), amount));
        } else if amount < 0.0 {
            debtors.push((b.user_id.clone(), -amount));
        }
    }
    // Largest last, so pop/last_mut work on the biggest amounts.
    creditors.sort_by(|a, b| a.1.total_cmp(&b.1));
    debtors.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut transfers = Vec::new();
    while let (Some(creditor), Some(debtor)) = (creditors.last_mut(), debtors.last_mut()) {
        let amount = round_to_2_decimals(creditor.1.min(debtor.1));
        if amount > 0.0 {
            transfers.push(Transfer {
                from_user: debtor.0.clone(),
                to_user: creditor.0.clone(),
                amount,
            });
        }
        creditor.1 = round_to_2_decimals(creditor.1 - amount);
        debtor.1 = round_to_2_decimals(debtor.1 - amount);

        if creditor.1 <= 0.0 {
            creditors.pop();
        }
        if debtor.1 <= 0.0 {
            debtors.pop();
        }
    }
    transfers
}

fn round_to_2_decimals(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}
