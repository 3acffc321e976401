//! Per-user daily minute budgets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::HubError;

pub type UserId = i64;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub username: String,
    /// Daily allotment restored at the midnight reset.
    pub default_minutes: i64,
    /// May go negative through an admin adjustment ("debt" until midnight),
    /// but a debit never drives it below zero.
    pub remaining_minutes: i64,
    /// Monotonic within a day, cleared at reset.
    pub used_minutes: i64,
    /// Minutes attributed for tampering/disconnection, cleared at reset.
    pub error_minutes: i64,
}

impl UserAccount {
    pub fn new(user_id: UserId, username: impl Into<String>, default_minutes: i64) -> Self {
        Self {
            user_id,
            username: username.into(),
            default_minutes,
            remaining_minutes: default_minutes,
            used_minutes: 0,
            error_minutes: 0,
        }
    }
}

/// What the midnight reset does with a balance that differs from the
/// default (admin additions or debt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResetPolicy {
    /// `remaining = default`. Adjustments and debt both vanish.
    #[default]
    Discard,
    /// Surplus beyond the default survives one reset:
    /// `remaining = default + max(0, remaining - default)`.
    CarryExtra,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct QuotaBook {
    accounts: BTreeMap<UserId, UserAccount>,
}

impl QuotaBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account wholesale (config seeding, snapshot load).
    pub fn insert(&mut self, account: UserAccount) {
        self.accounts.insert(account.user_id, account);
    }

    /// Create the account with the given allotment if absent; either way
    /// return the current record.
    pub fn register(
        &mut self,
        user_id: UserId,
        username: &str,
        default_minutes: i64,
    ) -> &UserAccount {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| UserAccount::new(user_id, username, default_minutes))
    }

    pub fn get(&self, user_id: UserId) -> Result<&UserAccount, HubError> {
        self.accounts
            .get(&user_id)
            .ok_or_else(|| HubError::unknown_user(user_id))
    }

    fn get_mut(&mut self, user_id: UserId) -> Result<&mut UserAccount, HubError> {
        self.accounts
            .get_mut(&user_id)
            .ok_or_else(|| HubError::unknown_user(user_id))
    }

    /// Resolve "<id>" or "@username" (case-insensitive) to an account.
    pub fn resolve(&self, key: &str) -> Result<&UserAccount, HubError> {
        if let Ok(id) = key.parse::<UserId>() {
            return self.get(id);
        }
        let name = key.trim_start_matches('@');
        self.accounts
            .values()
            .find(|a| a.username.eq_ignore_ascii_case(name))
            .ok_or_else(|| HubError::unknown_user(key))
    }

    /// Subtract up to `minutes` from the remaining budget, flooring at zero,
    /// and count the same amount as used. Returns how much was actually
    /// debited.
    pub fn debit(&mut self, user_id: UserId, minutes: i64) -> Result<i64, HubError> {
        let acct = self.get_mut(user_id)?;
        let before = acct.remaining_minutes;
        acct.remaining_minutes = (acct.remaining_minutes - minutes).max(0);
        let debited = before - acct.remaining_minutes;
        acct.used_minutes += debited;
        Ok(debited)
    }

    /// Admin adjustment. No floor: a negative delta may push the balance
    /// below zero until midnight. Returns the new balance.
    pub fn add_minutes(&mut self, user_id: UserId, delta: i64) -> Result<i64, HubError> {
        let acct = self.get_mut(user_id)?;
        acct.remaining_minutes += delta;
        Ok(acct.remaining_minutes)
    }

    /// Change the daily allotment. Does not touch today's balance.
    pub fn set_daily_minutes(&mut self, user_id: UserId, minutes: i64) -> Result<(), HubError> {
        self.get_mut(user_id)?.default_minutes = minutes;
        Ok(())
    }

    pub fn add_error_minutes(&mut self, user_id: UserId, minutes: i64) -> Result<(), HubError> {
        self.get_mut(user_id)?.error_minutes += minutes;
        Ok(())
    }

    /// Midnight reset for every account.
    pub fn reset_daily(&mut self, policy: ResetPolicy) {
        for acct in self.accounts.values_mut() {
            acct.remaining_minutes = match policy {
                ResetPolicy::Discard => acct.default_minutes,
                ResetPolicy::CarryExtra => {
                    acct.default_minutes + (acct.remaining_minutes - acct.default_minutes).max(0)
                }
            };
            acct.used_minutes = 0;
            acct.error_minutes = 0;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserAccount> {
        self.accounts.values()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with(id: UserId, minutes: i64) -> QuotaBook {
        let mut book = QuotaBook::new();
        book.insert(UserAccount::new(id, format!("user{id}"), minutes));
        book
    }

    // -- debit -------------------------------------------------------------

    #[test]
    fn debit_reduces_remaining_and_counts_used() {
        let mut book = book_with(1, 125);
        let debited = book.debit(1, 2).unwrap();
        assert_eq!(debited, 2);
        let acct = book.get(1).unwrap();
        assert_eq!(acct.remaining_minutes, 123);
        assert_eq!(acct.used_minutes, 2);
    }

    #[test]
    fn debit_floors_at_zero() {
        let mut book = book_with(1, 3);
        let debited = book.debit(1, 10).unwrap();
        assert_eq!(debited, 3);
        let acct = book.get(1).unwrap();
        assert_eq!(acct.remaining_minutes, 0);
        assert_eq!(acct.used_minutes, 3);
    }

    #[test]
    fn debit_on_zero_balance_is_a_noop() {
        let mut book = book_with(1, 0);
        assert_eq!(book.debit(1, 2).unwrap(), 0);
        assert_eq!(book.get(1).unwrap().used_minutes, 0);
    }

    #[test]
    fn debit_unknown_user_fails() {
        let mut book = QuotaBook::new();
        assert!(matches!(
            book.debit(9, 2),
            Err(HubError::NotFound { kind: "user", .. })
        ));
    }

    // -- admin adjustments -------------------------------------------------

    #[test]
    fn add_minutes_may_go_negative() {
        let mut book = book_with(1, 125);
        book.debit(1, 6).unwrap();
        let remaining = book.add_minutes(1, -150).unwrap();
        assert_eq!(remaining, 119 - 150);
    }

    #[test]
    fn set_daily_minutes_leaves_todays_balance_alone() {
        let mut book = book_with(1, 125);
        book.set_daily_minutes(1, 60).unwrap();
        let acct = book.get(1).unwrap();
        assert_eq!(acct.default_minutes, 60);
        assert_eq!(acct.remaining_minutes, 125);
    }

    // -- reset -------------------------------------------------------------

    #[test]
    fn reset_discard_restores_default() {
        let mut book = book_with(1, 125);
        book.debit(1, 6).unwrap();
        book.add_minutes(1, -50).unwrap();
        book.add_error_minutes(1, 4).unwrap();
        book.reset_daily(ResetPolicy::Discard);
        let acct = book.get(1).unwrap();
        assert_eq!(acct.remaining_minutes, 125);
        assert_eq!(acct.used_minutes, 0);
        assert_eq!(acct.error_minutes, 0);
    }

    #[test]
    fn reset_discard_wipes_admin_surplus() {
        let mut book = book_with(1, 125);
        book.add_minutes(1, 40).unwrap();
        book.reset_daily(ResetPolicy::Discard);
        assert_eq!(book.get(1).unwrap().remaining_minutes, 125);
    }

    #[test]
    fn reset_carry_extra_keeps_surplus_only() {
        let mut book = book_with(1, 125);
        book.add_minutes(1, 40).unwrap(); // 165
        book.reset_daily(ResetPolicy::CarryExtra);
        assert_eq!(book.get(1).unwrap().remaining_minutes, 165);

        // Debt is still forgiven.
        book.add_minutes(1, -300).unwrap();
        book.reset_daily(ResetPolicy::CarryExtra);
        assert_eq!(book.get(1).unwrap().remaining_minutes, 125);
    }

    #[test]
    fn used_plus_remaining_equals_default_after_reset_and_debits() {
        let mut book = book_with(1, 125);
        book.reset_daily(ResetPolicy::Discard);
        for _ in 0..3 {
            book.debit(1, 2).unwrap();
            let acct = book.get(1).unwrap();
            assert_eq!(acct.used_minutes + acct.remaining_minutes, 125);
        }
    }

    // -- register / resolve ------------------------------------------------

    #[test]
    fn register_creates_once_then_returns_existing() {
        let mut book = QuotaBook::new();
        book.register(7, "gina", 100);
        book.debit(7, 10).unwrap();
        let acct = book.register(7, "renamed", 999);
        assert_eq!(acct.username, "gina");
        assert_eq!(acct.remaining_minutes, 90);
    }

    #[test]
    fn resolve_by_id_and_username() {
        let mut book = QuotaBook::new();
        book.insert(UserAccount::new(42, "Alice", 125));
        assert_eq!(book.resolve("42").unwrap().user_id, 42);
        assert_eq!(book.resolve("@alice").unwrap().user_id, 42);
        assert_eq!(book.resolve("ALICE").unwrap().user_id, 42);
        assert!(book.resolve("@nobody").is_err());
    }
}
