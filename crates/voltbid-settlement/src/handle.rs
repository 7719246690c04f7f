//! The operations the settlement core exposes to an embedding presentation
//! layer.
//!
//! A [`Handle`] is cheap to clone and safe to call from any task. Every call
//! trusts the `UserId` it is given; authentication happens upstream.

use std::sync::Arc;

use jiff::Timestamp;

use crate::{
    auction::{
        AuctionSnapshot,
        AuctionStatus,
        AuctionStore,
        Bid,
        CreateAuctionError,
    },
    bidding::{
        BidReceipt,
        Bidding,
        PlaceBidError,
    },
    finalizer::{
        CancelError,
        FinalizeError,
        FinalizeOutcome,
        Finalizer,
    },
    ids::{
        AuctionId,
        ItemId,
        TransactionId,
        UserId,
    },
    ledger::{
        Ledger,
        LedgerError,
        WalletTransaction,
        WalletView,
    },
};

#[derive(Clone)]
pub struct Handle {
    pub(crate) bidding: Arc<Bidding>,
    pub(crate) finalizer: Arc<Finalizer>,
    pub(crate) auctions: Arc<AuctionStore>,
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) currency: String,
}

impl Handle {
    /// Lists a catalog item for auction.
    ///
    /// # Errors
    /// Returns an error if the item does not exist, already has an auction,
    /// or the window or starting price is invalid.
    pub fn create_auction(
        &self,
        item_id: ItemId,
        starting_price: u64,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Result<AuctionSnapshot, CreateAuctionError> {
        self.bidding
            .create_auction(item_id, starting_price, start_time, end_time)
    }

    /// Places a bid on an ongoing auction, holding the full bid amount in
    /// the bidder's wallet.
    ///
    /// # Errors
    /// Returns an error if the auction is unknown or not open, the bid does
    /// not exceed the current price, or the wallet rejects the hold.
    pub fn place_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
        amount: u64,
    ) -> Result<BidReceipt, PlaceBidError> {
        self.bidding.place_bid(auction_id, user_id, amount)
    }

    /// Cancels a scheduled or ongoing auction, releasing all active holds.
    ///
    /// # Errors
    /// Returns an error if the auction is unknown or already closed.
    pub fn cancel_auction(&self, auction_id: AuctionId) -> Result<(), CancelError> {
        self.finalizer.cancel(auction_id)
    }

    /// Finalizes an expired auction out of band. The status updater performs
    /// this automatically; the explicit entry point exists for admin
    /// tooling. Idempotent.
    ///
    /// # Errors
    /// Returns an error if the auction is unknown, has not started, or
    /// settlement failed (in which case it is retried by the updater).
    pub fn finalize_auction(
        &self,
        auction_id: AuctionId,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        self.finalizer.finalize(auction_id)
    }

    pub fn auction(&self, auction_id: AuctionId) -> Option<AuctionSnapshot> {
        self.auctions.get(auction_id).map(|record| record.snapshot())
    }

    pub fn auction_for_item(&self, item_id: ItemId) -> Option<AuctionSnapshot> {
        self.auctions
            .get_by_item(item_id)
            .map(|record| record.snapshot())
    }

    /// All auctions, optionally filtered by status, newest first.
    pub fn auctions(&self, status: Option<AuctionStatus>) -> Vec<AuctionSnapshot> {
        self.auctions.list(status)
    }

    /// The bid history of an auction, newest first.
    pub fn bid_history(&self, auction_id: AuctionId) -> Option<Vec<Bid>> {
        self.auctions.bid_history(auction_id)
    }

    /// Opens a wallet for `user_id` in the service's configured currency.
    ///
    /// # Errors
    /// Returns an error if the user already has a wallet.
    pub fn open_wallet(&self, user_id: UserId) -> Result<WalletView, LedgerError> {
        self.ledger.open_wallet(user_id, &self.currency)
    }

    /// # Errors
    /// Returns an error if the wallet is unknown or frozen, or the amount is
    /// zero.
    pub fn deposit(&self, user_id: UserId, amount: u64) -> Result<TransactionId, LedgerError> {
        self.ledger.deposit(user_id, amount)
    }

    /// # Errors
    /// Returns an error if the wallet is unknown or frozen, or the amount is
    /// zero or exceeds the spendable balance.
    pub fn withdraw(&self, user_id: UserId, amount: u64) -> Result<TransactionId, LedgerError> {
        self.ledger.withdraw(user_id, amount)
    }

    /// # Errors
    /// Returns an error if the wallet is unknown.
    pub fn set_wallet_frozen(&self, user_id: UserId, frozen: bool) -> Result<(), LedgerError> {
        self.ledger.set_frozen(user_id, frozen)
    }

    pub fn wallet(&self, user_id: UserId) -> Option<WalletView> {
        self.ledger.wallet(user_id)
    }

    /// # Errors
    /// Returns an error if the wallet is unknown.
    pub fn wallet_transactions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        self.ledger.transactions(user_id)
    }
}
