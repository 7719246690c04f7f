//! The wallet ledger: user balances plus an append-only transaction log.
//!
//! Every monetary movement in the settlement core goes through one of the
//! mutators on [`Ledger`]; no other component writes balances. A wallet's
//! spendable `balance` is debited the moment a hold is taken and credited
//! back when the hold is released, so `balance` is always net of active
//! holds. Holds are tracked per originating bid, which is what makes
//! releasing and settling them idempotent: a hold can be consumed exactly
//! once, and consuming it again is detected by scanning the log for the
//! entry that consumed it.
//!
//! Lock order: components always acquire an auction record's lock before any
//! wallet lock, and wallet locks are never nested.

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
        Mutex,
    },
};

use jiff::Timestamp;
use serde::Serialize;
use tracing::instrument;

use crate::ids::{
    AuctionId,
    BidId,
    TransactionId,
    UserId,
    WalletId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WalletStatus {
    Active,
    Frozen,
}

/// The kind of a ledger entry.
///
/// A payment appears twice per settlement: as a debit consuming the winner's
/// hold and as a credit of the payout on the seller's wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Hold,
    Release,
    PaymentDebit,
    PaymentCredit,
}

/// An append-only ledger entry. Never updated or deleted once written.
#[derive(Clone, Debug, Serialize)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub amount: u64,
    pub kind: TransactionKind,
    pub ref_id: Option<BidId>,
    pub auction_id: Option<AuctionId>,
    pub created_at: Timestamp,
}

/// A point-in-time copy of a wallet's externally visible state.
#[derive(Clone, Debug, Serialize)]
pub struct WalletView {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: String,
    pub status: WalletStatus,
    /// Spendable funds, net of active holds.
    pub balance: u64,
    /// The sum of all currently active holds.
    pub held: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no wallet exists for user `{user_id}`")]
    WalletNotFound { user_id: UserId },
    #[error("a wallet already exists for user `{user_id}`")]
    WalletAlreadyExists { user_id: UserId },
    #[error("wallet for user `{user_id}` is frozen")]
    WalletFrozen { user_id: UserId },
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error(
        "insufficient spendable balance for user `{user_id}`: available {available}, requested \
         {requested}"
    )]
    InsufficientFunds {
        user_id: UserId,
        available: u64,
        requested: u64,
    },
    #[error("no active hold for bid `{bid_id}` on the wallet of user `{user_id}`")]
    HoldNotFound { user_id: UserId, bid_id: BidId },
    #[error("balance arithmetic overflowed for user `{user_id}`")]
    Overflow { user_id: UserId },
}

/// The result of releasing a hold.
#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The hold existed and its amount was credited back to the wallet.
    Released { amount: u64 },
    /// The hold was already released or settled earlier; nothing was changed.
    AlreadyReleased,
}

/// The result of settling a hold into a payment.
#[derive(Debug, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The hold was consumed and recorded as a payment debit.
    Paid { amount: u64 },
    /// A payment debit for this bid already exists; nothing was changed.
    AlreadyPaid,
}

struct ActiveHold {
    amount: u64,
    auction_id: AuctionId,
}

struct WalletState {
    status: WalletStatus,
    balance: u64,
    holds: HashMap<BidId, ActiveHold>,
    transactions: Vec<WalletTransaction>,
}

struct WalletRecord {
    id: WalletId,
    user_id: UserId,
    currency: String,
    state: Mutex<WalletState>,
}

/// The in-memory wallet store.
pub(crate) struct Ledger {
    wallets: papaya::HashMap<UserId, Arc<WalletRecord>>,
    next_wallet_id: AtomicU64,
    next_transaction_id: AtomicU64,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self {
            wallets: papaya::HashMap::new(),
            next_wallet_id: AtomicU64::new(1),
            next_transaction_id: AtomicU64::new(1),
        }
    }

    /// Opens a wallet for `user_id`. Each user has at most one wallet.
    #[instrument(skip(self), err)]
    pub(crate) fn open_wallet(
        &self,
        user_id: UserId,
        currency: &str,
    ) -> Result<WalletView, LedgerError> {
        let id = WalletId::new(self.next_wallet_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(WalletRecord {
            id,
            user_id,
            currency: currency.to_string(),
            state: Mutex::new(WalletState {
                status: WalletStatus::Active,
                balance: 0,
                holds: HashMap::new(),
                transactions: Vec::new(),
            }),
        });
        self.wallets
            .pin()
            .try_insert(user_id, record.clone())
            .map_err(|_| LedgerError::WalletAlreadyExists {
                user_id,
            })?;
        Ok(view(&record))
    }

    pub(crate) fn wallet(&self, user_id: UserId) -> Option<WalletView> {
        self.wallets.pin().get(&user_id).map(|record| view(record))
    }

    pub(crate) fn transactions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let record = self.get(user_id)?;
        let state = lock(&record);
        Ok(state.transactions.clone())
    }

    /// Freezes or unfreezes a wallet. A frozen wallet rejects user-initiated
    /// operations (deposit, withdraw, new holds); releases and settlements of
    /// already-reserved funds still go through so every hold can reach its
    /// terminal release or payment.
    pub(crate) fn set_frozen(&self, user_id: UserId, frozen: bool) -> Result<(), LedgerError> {
        let record = self.get(user_id)?;
        let mut state = lock(&record);
        state.status = if frozen {
            WalletStatus::Frozen
        } else {
            WalletStatus::Active
        };
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub(crate) fn deposit(
        &self,
        user_id: UserId,
        amount: u64,
    ) -> Result<TransactionId, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let record = self.get(user_id)?;
        let mut state = lock_active(&record)?;
        state.balance = state
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow {
                user_id,
            })?;
        let tx_id = self.append(
            &record,
            &mut state,
            amount,
            TransactionKind::Deposit,
            None,
            None,
        );
        debug_assert!(reconciled(&state));
        Ok(tx_id)
    }

    #[instrument(skip(self), err)]
    pub(crate) fn withdraw(
        &self,
        user_id: UserId,
        amount: u64,
    ) -> Result<TransactionId, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let record = self.get(user_id)?;
        let mut state = lock_active(&record)?;
        state.balance = debit(&state, user_id, amount)?;
        let tx_id = self.append(
            &record,
            &mut state,
            amount,
            TransactionKind::Withdraw,
            None,
            None,
        );
        debug_assert!(reconciled(&state));
        Ok(tx_id)
    }

    /// Reserves `amount` against `bid_id`, debiting the spendable balance.
    #[instrument(skip(self), err)]
    pub(crate) fn hold(
        &self,
        user_id: UserId,
        bid_id: BidId,
        auction_id: AuctionId,
        amount: u64,
    ) -> Result<TransactionId, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let record = self.get(user_id)?;
        let mut state = lock_active(&record)?;
        state.balance = debit(&state, user_id, amount)?;
        state.holds.insert(
            bid_id,
            ActiveHold {
                amount,
                auction_id,
            },
        );
        let tx_id = self.append(
            &record,
            &mut state,
            amount,
            TransactionKind::Hold,
            Some(bid_id),
            Some(auction_id),
        );
        debug_assert!(reconciled(&state));
        Ok(tx_id)
    }

    /// Reverses the hold taken for `bid_id`, restoring the spendable balance.
    ///
    /// Exactly one release (or payment) is ever recorded per hold: if the
    /// hold was already consumed this returns
    /// [`ReleaseOutcome::AlreadyReleased`] without touching the wallet, which
    /// is what makes redelivered outbid events harmless.
    #[instrument(skip(self), err)]
    pub(crate) fn release(
        &self,
        user_id: UserId,
        bid_id: BidId,
    ) -> Result<ReleaseOutcome, LedgerError> {
        let record = self.get(user_id)?;
        let mut state = lock(&record);
        let Some(hold) = state.holds.remove(&bid_id) else {
            if consumed_hold_exists(&state, bid_id) {
                return Ok(ReleaseOutcome::AlreadyReleased);
            }
            return Err(LedgerError::HoldNotFound {
                user_id,
                bid_id,
            });
        };
        state.balance = state
            .balance
            .checked_add(hold.amount)
            .ok_or(LedgerError::Overflow {
                user_id,
            })?;
        self.append(
            &record,
            &mut state,
            hold.amount,
            TransactionKind::Release,
            Some(bid_id),
            Some(hold.auction_id),
        );
        debug_assert!(reconciled(&state));
        Ok(ReleaseOutcome::Released {
            amount: hold.amount,
        })
    }

    /// Consumes the winner's hold for `bid_id`, recording it as a payment
    /// debit. The spendable balance is unchanged: it was already debited when
    /// the hold was taken.
    #[instrument(skip(self), err)]
    pub(crate) fn settle_hold(
        &self,
        user_id: UserId,
        bid_id: BidId,
    ) -> Result<SettleOutcome, LedgerError> {
        let record = self.get(user_id)?;
        let mut state = lock(&record);
        let Some(hold) = state.holds.remove(&bid_id) else {
            if consumed_hold_exists(&state, bid_id) {
                return Ok(SettleOutcome::AlreadyPaid);
            }
            return Err(LedgerError::HoldNotFound {
                user_id,
                bid_id,
            });
        };
        self.append(
            &record,
            &mut state,
            hold.amount,
            TransactionKind::PaymentDebit,
            Some(bid_id),
            Some(hold.auction_id),
        );
        debug_assert!(reconciled(&state));
        Ok(SettleOutcome::Paid {
            amount: hold.amount,
        })
    }

    /// Credits a settlement payout (hammer price net of commission) to the
    /// seller's wallet.
    #[instrument(skip(self), err)]
    pub(crate) fn credit_payout(
        &self,
        user_id: UserId,
        amount: u64,
        auction_id: AuctionId,
        winning_bid_id: BidId,
    ) -> Result<TransactionId, LedgerError> {
        let record = self.get(user_id)?;
        let mut state = lock(&record);
        state.balance = state
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow {
                user_id,
            })?;
        let tx_id = self.append(
            &record,
            &mut state,
            amount,
            TransactionKind::PaymentCredit,
            Some(winning_bid_id),
            Some(auction_id),
        );
        debug_assert!(reconciled(&state));
        Ok(tx_id)
    }

    /// True if a payout credit referencing `winning_bid_id` was already
    /// written to the wallet of `user_id`. Used to keep settlement retries
    /// from crediting a seller twice.
    pub(crate) fn has_payout_credit(
        &self,
        user_id: UserId,
        winning_bid_id: BidId,
    ) -> Result<bool, LedgerError> {
        let record = self.get(user_id)?;
        let state = lock(&record);
        Ok(state.transactions.iter().any(|tx| {
            tx.kind == TransactionKind::PaymentCredit && tx.ref_id == Some(winning_bid_id)
        }))
    }

    /// Returns the amount of the active hold for `bid_id`, if any.
    #[cfg(test)]
    pub(crate) fn active_hold(&self, user_id: UserId, bid_id: BidId) -> Option<u64> {
        let record = self.wallets.pin().get(&user_id)?.clone();
        let state = lock(&record);
        state.holds.get(&bid_id).map(|hold| hold.amount)
    }

    fn get(&self, user_id: UserId) -> Result<Arc<WalletRecord>, LedgerError> {
        self.wallets
            .pin()
            .get(&user_id)
            .cloned()
            .ok_or(LedgerError::WalletNotFound {
                user_id,
            })
    }

    fn append(
        &self,
        record: &WalletRecord,
        state: &mut WalletState,
        amount: u64,
        kind: TransactionKind,
        ref_id: Option<BidId>,
        auction_id: Option<AuctionId>,
    ) -> TransactionId {
        let id = TransactionId::new(self.next_transaction_id.fetch_add(1, Ordering::Relaxed));
        state.transactions.push(WalletTransaction {
            id,
            wallet_id: record.id,
            amount,
            kind,
            ref_id,
            auction_id,
            created_at: Timestamp::now(),
        });
        id
    }
}

fn view(record: &WalletRecord) -> WalletView {
    let state = lock(record);
    WalletView {
        id: record.id,
        user_id: record.user_id,
        currency: record.currency.clone(),
        status: state.status,
        balance: state.balance,
        held: state.holds.values().map(|hold| hold.amount).sum(),
    }
}

fn lock(record: &WalletRecord) -> std::sync::MutexGuard<'_, WalletState> {
    record.state.lock().expect("wallet state lock poisoned")
}

fn lock_active(
    record: &WalletRecord,
) -> Result<std::sync::MutexGuard<'_, WalletState>, LedgerError> {
    let state = lock(record);
    if state.status == WalletStatus::Frozen {
        return Err(LedgerError::WalletFrozen {
            user_id: record.user_id,
        });
    }
    Ok(state)
}

/// True if the hold for `bid_id` was already consumed by a release or a
/// payment debit.
fn consumed_hold_exists(state: &WalletState, bid_id: BidId) -> bool {
    state.transactions.iter().any(|tx| {
        tx.ref_id == Some(bid_id)
            && matches!(
                tx.kind,
                TransactionKind::Release | TransactionKind::PaymentDebit
            )
    })
}

fn debit(state: &WalletState, user_id: UserId, amount: u64) -> Result<u64, LedgerError> {
    state
        .balance
        .checked_sub(amount)
        .ok_or(LedgerError::InsufficientFunds {
            user_id,
            available: state.balance,
            requested: amount,
        })
}

/// The ledger reconciliation identity: the spendable balance must equal the
/// signed sum of all entries that move it, and the tracked holds must equal
/// holds taken minus holds consumed.
fn reconciled(state: &WalletState) -> bool {
    let mut balance: i128 = 0;
    let mut held: i128 = 0;
    for tx in &state.transactions {
        let amount = i128::from(tx.amount);
        match tx.kind {
            TransactionKind::Deposit | TransactionKind::PaymentCredit => balance += amount,
            TransactionKind::Withdraw => balance -= amount,
            TransactionKind::Hold => {
                balance -= amount;
                held += amount;
            }
            TransactionKind::Release => {
                balance += amount;
                held -= amount;
            }
            TransactionKind::PaymentDebit => held -= amount,
        }
    }
    let tracked_held: i128 = state.holds.values().map(|hold| i128::from(hold.amount)).sum();
    balance == i128::from(state.balance) && held == tracked_held
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: UserId = UserId::new(7);
    const AUCTION: AuctionId = AuctionId::new(1);
    const BID: BidId = BidId::new(100);

    fn ledger_with_wallet(balance: u64) -> Ledger {
        let ledger = Ledger::new();
        ledger.open_wallet(USER, "VND").unwrap();
        if balance > 0 {
            ledger.deposit(USER, balance).unwrap();
        }
        ledger
    }

    #[test]
    fn opening_a_second_wallet_for_the_same_user_is_rejected() {
        let ledger = ledger_with_wallet(0);
        assert_eq!(
            ledger.open_wallet(USER, "VND").unwrap_err(),
            LedgerError::WalletAlreadyExists {
                user_id: USER
            },
        );
    }

    #[test]
    fn deposit_and_withdraw_move_the_spendable_balance() {
        let ledger = ledger_with_wallet(1_000_000);
        ledger.withdraw(USER, 400_000).unwrap();
        let wallet = ledger.wallet(USER).unwrap();
        assert_eq!(wallet.balance, 600_000);
        assert_eq!(ledger.transactions(USER).unwrap().len(), 2);
    }

    #[test]
    fn zero_amounts_are_rejected() {
        let ledger = ledger_with_wallet(1_000_000);
        assert_eq!(ledger.deposit(USER, 0).unwrap_err(), LedgerError::ZeroAmount);
        assert_eq!(
            ledger.withdraw(USER, 0).unwrap_err(),
            LedgerError::ZeroAmount
        );
    }

    #[test]
    fn overdrawing_is_rejected_without_a_ledger_entry() {
        let ledger = ledger_with_wallet(100);
        assert_eq!(
            ledger.withdraw(USER, 101).unwrap_err(),
            LedgerError::InsufficientFunds {
                user_id: USER,
                available: 100,
                requested: 101,
            },
        );
        assert_eq!(ledger.transactions(USER).unwrap().len(), 1);
    }

    #[test]
    fn hold_debits_spendable_balance_and_tracks_the_reservation() {
        let ledger = ledger_with_wallet(1_100_000);
        ledger.hold(USER, BID, AUCTION, 1_100_000).unwrap();
        let wallet = ledger.wallet(USER).unwrap();
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.held, 1_100_000);
        assert_eq!(ledger.active_hold(USER, BID), Some(1_100_000));
    }

    #[test]
    fn hold_exceeding_spendable_balance_is_rejected() {
        let ledger = ledger_with_wallet(1_000_000);
        ledger.hold(USER, BID, AUCTION, 600_000).unwrap();
        let err = ledger
            .hold(USER, BidId::new(101), AUCTION, 500_000)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                user_id: USER,
                available: 400_000,
                requested: 500_000,
            },
        );
    }

    #[test]
    fn release_restores_the_balance_exactly_once() {
        let ledger = ledger_with_wallet(1_100_000);
        ledger.hold(USER, BID, AUCTION, 1_100_000).unwrap();

        assert_eq!(
            ledger.release(USER, BID).unwrap(),
            ReleaseOutcome::Released {
                amount: 1_100_000
            },
        );
        assert_eq!(ledger.wallet(USER).unwrap().balance, 1_100_000);

        // A redelivered outbid event must not credit the wallet a second time.
        assert_eq!(
            ledger.release(USER, BID).unwrap(),
            ReleaseOutcome::AlreadyReleased,
        );
        assert_eq!(ledger.wallet(USER).unwrap().balance, 1_100_000);
        let releases = ledger
            .transactions(USER)
            .unwrap()
            .into_iter()
            .filter(|tx| tx.kind == TransactionKind::Release)
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn releasing_an_unknown_hold_is_an_error() {
        let ledger = ledger_with_wallet(1_000_000);
        assert_eq!(
            ledger.release(USER, BID).unwrap_err(),
            LedgerError::HoldNotFound {
                user_id: USER,
                bid_id: BID
            },
        );
    }

    #[test]
    fn settling_converts_the_hold_into_a_payment_debit() {
        let ledger = ledger_with_wallet(1_200_000);
        ledger.hold(USER, BID, AUCTION, 1_200_000).unwrap();

        assert_eq!(
            ledger.settle_hold(USER, BID).unwrap(),
            SettleOutcome::Paid {
                amount: 1_200_000
            },
        );
        let wallet = ledger.wallet(USER).unwrap();
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.held, 0);

        // Settling again is a no-op, as is a late release of the same hold.
        assert_eq!(
            ledger.settle_hold(USER, BID).unwrap(),
            SettleOutcome::AlreadyPaid,
        );
        assert_eq!(
            ledger.release(USER, BID).unwrap(),
            ReleaseOutcome::AlreadyReleased,
        );
        assert_eq!(wallet.balance, 0);
    }

    #[test]
    fn payout_credit_is_spendable_immediately() {
        let ledger = Ledger::new();
        let seller = UserId::new(8);
        ledger.open_wallet(seller, "VND").unwrap();
        ledger.credit_payout(seller, 990_000, AUCTION, BID).unwrap();
        let wallet = ledger.wallet(seller).unwrap();
        assert_eq!(wallet.balance, 990_000);
        let kinds: Vec<_> = ledger
            .transactions(seller)
            .unwrap()
            .into_iter()
            .map(|tx| tx.kind)
            .collect();
        assert_eq!(kinds, [TransactionKind::PaymentCredit]);
    }

    #[test]
    fn frozen_wallet_rejects_user_operations_but_still_releases() {
        let ledger = ledger_with_wallet(1_000_000);
        ledger.hold(USER, BID, AUCTION, 500_000).unwrap();
        ledger.set_frozen(USER, true).unwrap();

        assert_eq!(
            ledger.deposit(USER, 1).unwrap_err(),
            LedgerError::WalletFrozen {
                user_id: USER
            },
        );
        assert_eq!(
            ledger.hold(USER, BidId::new(101), AUCTION, 1).unwrap_err(),
            LedgerError::WalletFrozen {
                user_id: USER
            },
        );
        // Reserved funds still reach their terminal state.
        assert_eq!(
            ledger.release(USER, BID).unwrap(),
            ReleaseOutcome::Released {
                amount: 500_000
            },
        );
        assert_eq!(ledger.wallet(USER).unwrap().balance, 1_000_000);
    }

    #[test]
    fn ledger_reconciles_after_a_mixed_operation_sequence() {
        let ledger = ledger_with_wallet(2_000_000);
        let second_bid = BidId::new(101);
        ledger.hold(USER, BID, AUCTION, 700_000).unwrap();
        ledger.hold(USER, second_bid, AUCTION, 800_000).unwrap();
        ledger.release(USER, BID).unwrap();
        ledger.withdraw(USER, 200_000).unwrap();
        ledger.settle_hold(USER, second_bid).unwrap();
        ledger.credit_payout(USER, 50_000, AUCTION, second_bid).unwrap();

        let wallet = ledger.wallet(USER).unwrap();
        // 2_000_000 - 700_000 - 800_000 + 700_000 - 200_000 + 50_000
        assert_eq!(wallet.balance, 1_050_000);
        assert_eq!(wallet.held, 0);
    }
}
