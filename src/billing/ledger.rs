//! # Credit Ledger
//!
//! Per-user credit accounting with a reserve/commit/release protocol. The
//! ledger is the consistency anchor of the billing saga: a reservation is a
//! tentative hold that must be resolved exactly once, and the spendable
//! balance already accounts for every open hold.
//!
//! ## Key Guarantees:
//! - **No overdraft under concurrency**: two reservations for the same user
//!   cannot both succeed when only one could be funded
//! - **Single resolution**: a reservation leaves `held` at most once; a second
//!   commit or release returns `InvalidState` without touching the balance
//! - **Per-user linearization**: operations on one account are serialized by a
//!   per-user mutex; accounts do not contend with each other
//!
//! All locking is synchronous and brief. Nothing here performs I/O, so the
//! per-user critical section can never span a remote call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Credit amounts are whole, non-negative units.
pub type Credits = u64;

/// A user account as seen by the billing layer.
///
/// Accounts are created at registration and never deleted; deactivation
/// flips `active` and blocks new reservations.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub user_id: Uuid,
    /// Committed balance: initial grants minus committed charges.
    pub balance: Credits,
    pub active: bool,
}

/// Lifecycle of a reservation. `Held` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Held,
    Committed,
    Released,
}

/// A tentative credit hold created by [`CreditLedger::reserve`].
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Credits,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
}

/// Errors produced by ledger operations.
///
/// The pre-flight variants (`UserNotFound`, `UserInactive`,
/// `InsufficientFunds`) are ordinary request outcomes. `InvalidState` and
/// `UnknownReservation` coming back from commit/release indicate the
/// single-resolution invariant was broken by the caller and are treated as
/// programming errors upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("user {0} is not active")]
    UserInactive(Uuid),

    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientFunds {
        required: Credits,
        available: Credits,
    },

    #[error("account for user {0} already exists")]
    AccountExists(Uuid),

    #[error("reservation {0} not found")]
    UnknownReservation(Uuid),

    #[error("reservation {id} already resolved as {state:?}")]
    InvalidState { id: Uuid, state: ReservationState },
}

/// Everything the ledger tracks for one user, guarded by one mutex.
///
/// `held` is the running sum of `Held` reservation amounts, so the funding
/// check in `reserve` is O(1). Terminal reservations stay in the map for
/// auditing.
#[derive(Debug)]
struct AccountSlot {
    account: Account,
    held: Credits,
    reservations: HashMap<Uuid, Reservation>,
}

impl AccountSlot {
    fn spendable(&self) -> Credits {
        self.account.balance - self.held
    }
}

/// In-memory credit ledger with per-user mutual exclusion.
///
/// ## Locking Discipline:
/// The outer map is only locked to look up or insert an account slot; every
/// balance or reservation mutation happens under that user's slot mutex. A
/// reservation-owner index routes `commit`/`release` back to the right slot
/// without scanning accounts.
pub struct CreditLedger {
    accounts: RwLock<HashMap<Uuid, Arc<Mutex<AccountSlot>>>>,
    /// reservation id -> owning user id
    reservation_owners: RwLock<HashMap<Uuid, Uuid>>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            reservation_owners: RwLock::new(HashMap::new()),
        }
    }

    /// Create an account with an initial credit grant.
    pub fn create_account(&self, user_id: Uuid, initial_credits: Credits) -> Result<Account, LedgerError> {
        let mut accounts = self.accounts.write().unwrap();
        if accounts.contains_key(&user_id) {
            return Err(LedgerError::AccountExists(user_id));
        }

        let account = Account {
            user_id,
            balance: initial_credits,
            active: true,
        };
        let slot = AccountSlot {
            account: account.clone(),
            held: 0,
            reservations: HashMap::new(),
        };
        accounts.insert(user_id, Arc::new(Mutex::new(slot)));

        tracing::info!(user_id = %user_id, initial_credits, "account created");
        Ok(account)
    }

    /// Top up an account. Allowed for inactive accounts; grants never expire.
    pub fn grant(&self, user_id: Uuid, amount: Credits) -> Result<Account, LedgerError> {
        let slot = self.slot(user_id)?;
        let mut slot = slot.lock().unwrap();
        slot.account.balance += amount;
        Ok(slot.account.clone())
    }

    /// Soft-deactivate an account. Open holds stay resolvable; new
    /// reservations are rejected.
    pub fn deactivate(&self, user_id: Uuid) -> Result<(), LedgerError> {
        let slot = self.slot(user_id)?;
        slot.lock().unwrap().account.active = false;
        Ok(())
    }

    /// Snapshot of the account (committed balance).
    pub fn account(&self, user_id: Uuid) -> Result<Account, LedgerError> {
        let slot = self.slot(user_id)?;
        let slot = slot.lock().unwrap();
        Ok(slot.account.clone())
    }

    /// What the user could reserve right now: balance minus open holds.
    pub fn spendable_balance(&self, user_id: Uuid) -> Result<Credits, LedgerError> {
        let slot = self.slot(user_id)?;
        let slot = slot.lock().unwrap();
        Ok(slot.spendable())
    }

    /// Atomically check funding and place a hold.
    ///
    /// The check observes `balance - held`, so concurrent reservations for
    /// one user can never jointly exceed the balance. The hold is not yet a
    /// charge; the balance only moves on commit.
    pub fn reserve(&self, user_id: Uuid, amount: Credits) -> Result<Uuid, LedgerError> {
        let slot = self.slot(user_id)?;

        let reservation = {
            let mut slot = slot.lock().unwrap();
            if !slot.account.active {
                return Err(LedgerError::UserInactive(user_id));
            }
            if slot.spendable() < amount {
                return Err(LedgerError::InsufficientFunds {
                    required: amount,
                    available: slot.spendable(),
                });
            }

            let reservation = Reservation {
                id: Uuid::new_v4(),
                user_id,
                amount,
                state: ReservationState::Held,
                created_at: Utc::now(),
            };
            slot.held += amount;
            slot.reservations.insert(reservation.id, reservation.clone());
            reservation
        };

        // The caller does not know the id until we return, so inserting the
        // owner entry outside the slot lock cannot race a commit/release.
        self.reservation_owners
            .write()
            .unwrap()
            .insert(reservation.id, user_id);

        tracing::debug!(
            user_id = %user_id,
            reservation_id = %reservation.id,
            amount,
            "credits reserved"
        );
        Ok(reservation.id)
    }

    /// Finalize a hold as a real charge.
    pub fn commit(&self, reservation_id: Uuid) -> Result<(), LedgerError> {
        self.resolve(reservation_id, ReservationState::Committed)
    }

    /// Cancel a hold with no balance effect.
    pub fn release(&self, reservation_id: Uuid) -> Result<(), LedgerError> {
        self.resolve(reservation_id, ReservationState::Released)
    }

    /// Snapshot of a reservation, if it exists.
    pub fn reservation(&self, reservation_id: Uuid) -> Option<Reservation> {
        let user_id = *self.reservation_owners.read().unwrap().get(&reservation_id)?;
        let slot = self.slot(user_id).ok()?;
        let slot = slot.lock().unwrap();
        slot.reservations.get(&reservation_id).cloned()
    }

    /// Move a reservation out of `held` exactly once.
    fn resolve(&self, reservation_id: Uuid, target: ReservationState) -> Result<(), LedgerError> {
        let user_id = self
            .reservation_owners
            .read()
            .unwrap()
            .get(&reservation_id)
            .copied()
            .ok_or(LedgerError::UnknownReservation(reservation_id))?;

        let slot = self.slot(user_id)?;
        let mut slot = slot.lock().unwrap();

        let reservation = slot
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(LedgerError::UnknownReservation(reservation_id))?;

        if reservation.state != ReservationState::Held {
            return Err(LedgerError::InvalidState {
                id: reservation_id,
                state: reservation.state,
            });
        }

        slot.held -= reservation.amount;
        if target == ReservationState::Committed {
            slot.account.balance -= reservation.amount;
        }
        if let Some(stored) = slot.reservations.get_mut(&reservation_id) {
            stored.state = target;
        }

        tracing::debug!(
            user_id = %user_id,
            reservation_id = %reservation_id,
            amount = reservation.amount,
            state = ?target,
            "reservation resolved"
        );
        Ok(())
    }

    fn slot(&self, user_id: Uuid) -> Result<Arc<Mutex<AccountSlot>>, LedgerError> {
        self.accounts
            .read()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or(LedgerError::UserNotFound(user_id))
    }
}

impl Default for CreditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_account(balance: Credits) -> (CreditLedger, Uuid) {
        let ledger = CreditLedger::new();
        let user_id = Uuid::new_v4();
        ledger.create_account(user_id, balance).unwrap();
        (ledger, user_id)
    }

    #[test]
    fn test_reserve_and_commit_charges_balance() {
        let (ledger, user) = ledger_with_account(5);

        let reservation = ledger.reserve(user, 3).unwrap();
        // The hold reduces what is spendable but not the committed balance.
        assert_eq!(ledger.account(user).unwrap().balance, 5);
        assert_eq!(ledger.spendable_balance(user).unwrap(), 2);

        ledger.commit(reservation).unwrap();
        assert_eq!(ledger.account(user).unwrap().balance, 2);
        assert_eq!(ledger.spendable_balance(user).unwrap(), 2);
    }

    #[test]
    fn test_release_has_no_balance_effect() {
        let (ledger, user) = ledger_with_account(5);

        let reservation = ledger.reserve(user, 3).unwrap();
        ledger.release(reservation).unwrap();

        assert_eq!(ledger.account(user).unwrap().balance, 5);
        assert_eq!(ledger.spendable_balance(user).unwrap(), 5);
        assert_eq!(
            ledger.reservation(reservation).unwrap().state,
            ReservationState::Released
        );
    }

    #[test]
    fn test_open_holds_bound_further_reservations() {
        let (ledger, user) = ledger_with_account(5);

        let first = ledger.reserve(user, 3).unwrap();
        let second = ledger.reserve(user, 3);
        assert_eq!(
            second,
            Err(LedgerError::InsufficientFunds {
                required: 3,
                available: 2
            })
        );

        // Releasing the first hold frees the credits again.
        ledger.release(first).unwrap();
        assert!(ledger.reserve(user, 3).is_ok());
    }

    #[test]
    fn test_resolution_is_idempotent_on_state_not_balance() {
        let (ledger, user) = ledger_with_account(5);

        let reservation = ledger.reserve(user, 3).unwrap();
        ledger.commit(reservation).unwrap();

        // Second commit and a late release both refuse without a second charge.
        assert!(matches!(
            ledger.commit(reservation),
            Err(LedgerError::InvalidState {
                state: ReservationState::Committed,
                ..
            })
        ));
        assert!(matches!(
            ledger.release(reservation),
            Err(LedgerError::InvalidState { .. })
        ));
        assert_eq!(ledger.account(user).unwrap().balance, 2);
    }

    #[test]
    fn test_inactive_user_cannot_reserve() {
        let (ledger, user) = ledger_with_account(5);
        ledger.deactivate(user).unwrap();

        assert_eq!(ledger.reserve(user, 1), Err(LedgerError::UserInactive(user)));
    }

    #[test]
    fn test_unknown_user_and_reservation() {
        let ledger = CreditLedger::new();
        let nobody = Uuid::new_v4();
        assert_eq!(ledger.reserve(nobody, 1), Err(LedgerError::UserNotFound(nobody)));

        let missing = Uuid::new_v4();
        assert_eq!(
            ledger.commit(missing),
            Err(LedgerError::UnknownReservation(missing))
        );
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let (ledger, user) = ledger_with_account(5);
        assert_eq!(
            ledger.create_account(user, 10).err(),
            Some(LedgerError::AccountExists(user))
        );
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overdraft() {
        let (ledger, user) = ledger_with_account(10);
        let ledger = Arc::new(ledger);

        // 8 tasks race to reserve 3 credits each; only 3 can be funded.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move { ledger.reserve(user, 3) }));
        }

        let mut granted = Vec::new();
        for handle in handles {
            if let Ok(id) = handle.await.unwrap() {
                granted.push(id);
            }
        }

        assert_eq!(granted.len(), 3);
        assert_eq!(ledger.spendable_balance(user).unwrap(), 1);

        // Committing every winner drains exactly the held amount.
        for id in granted {
            ledger.commit(id).unwrap();
        }
        assert_eq!(ledger.account(user).unwrap().balance, 1);
    }

    #[tokio::test]
    async fn test_cross_user_operations_do_not_interfere() {
        let ledger = Arc::new(CreditLedger::new());
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for user in &users {
            ledger.create_account(*user, 4).unwrap();
        }

        let mut handles = Vec::new();
        for user in users.clone() {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let id = ledger.reserve(user, 4).unwrap();
                ledger.commit(id).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for user in users {
            assert_eq!(ledger.account(user).unwrap().balance, 0);
        }
    }
}
