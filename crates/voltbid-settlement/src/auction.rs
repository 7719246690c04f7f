//! Auction records, their embedded bid history, and the in-memory store.
//!
//! An auction's mutable state sits behind a per-record mutex, which is the
//! serialization point for the whole bid-placement path: no two bids can be
//! accepted against a stale price, and finalization is serialized against
//! concurrent bids on the same auction. Bids are append-only; the record
//! keeps the full history for audit and for the defensive release pass
//! during finalization.

use std::sync::{
    atomic::{
        AtomicU64,
        Ordering,
    },
    Arc,
    Mutex,
    MutexGuard,
};

use jiff::Timestamp;
use serde::Serialize;
use tracing::instrument;

use crate::ids::{
    AuctionId,
    BidId,
    ItemId,
    UserId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AuctionStatus {
    Scheduled,
    Ongoing,
    Ended,
    Finalized,
    Cancelled,
}

/// An accepted bid. Immutable once recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Bid {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub amount: u64,
    pub placed_at: Timestamp,
}

/// A point-in-time copy of an auction's externally visible state.
#[derive(Clone, Debug, Serialize)]
pub struct AuctionSnapshot {
    pub id: AuctionId,
    pub item_id: ItemId,
    pub seller_id: UserId,
    pub starting_price: u64,
    /// The highest accepted bid, or `starting_price` while no bids exist.
    pub current_price: u64,
    pub total_bids: u64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub status: AuctionStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CreateAuctionError {
    #[error("item `{item_id}` does not exist in the catalog")]
    ItemNotFound { item_id: ItemId },
    #[error("item `{item_id}` already has an auction")]
    ItemAlreadyListed { item_id: ItemId },
    #[error("start time must be earlier than end time")]
    InvalidWindow,
    #[error("starting price must be greater than zero")]
    ZeroStartingPrice,
}

#[derive(Debug)]
pub(crate) struct AuctionState {
    pub(crate) starting_price: u64,
    pub(crate) current_price: u64,
    pub(crate) total_bids: u64,
    pub(crate) start_time: Timestamp,
    pub(crate) end_time: Timestamp,
    pub(crate) status: AuctionStatus,
    pub(crate) bids: Vec<Bid>,
    pub(crate) updated_at: Timestamp,
}

impl AuctionState {
    /// The current price leader: the most recent bid carrying the highest
    /// amount. Accepted bids are strictly increasing, so this is the last
    /// entry, but the scan keeps the definition honest.
    pub(crate) fn leading_bid(&self) -> Option<&Bid> {
        // `max_by` keeps the last of equal maxima, i.e. the most recent bid.
        self.bids.iter().max_by(|a, b| a.amount.cmp(&b.amount))
    }
}

#[derive(Debug)]
pub(crate) struct AuctionRecord {
    id: AuctionId,
    item_id: ItemId,
    seller_id: UserId,
    created_at: Timestamp,
    state: Mutex<AuctionState>,
}

impl AuctionRecord {
    pub(crate) fn id(&self) -> AuctionId {
        self.id
    }

    pub(crate) fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub(crate) fn seller_id(&self) -> UserId {
        self.seller_id
    }

    /// Locks the record's mutable state. This is the per-auction
    /// serialization point; callers must not hold any wallet lock when
    /// acquiring it.
    pub(crate) fn lock(&self) -> MutexGuard<'_, AuctionState> {
        self.state.lock().expect("auction state lock poisoned")
    }

    pub(crate) fn snapshot(&self) -> AuctionSnapshot {
        let state = self.lock();
        AuctionSnapshot {
            id: self.id,
            item_id: self.item_id,
            seller_id: self.seller_id,
            starting_price: state.starting_price,
            current_price: state.current_price,
            total_bids: state.total_bids,
            start_time: state.start_time,
            end_time: state.end_time,
            status: state.status,
            created_at: self.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// The in-memory auction store.
pub(crate) struct AuctionStore {
    auctions: papaya::HashMap<AuctionId, Arc<AuctionRecord>>,
    by_item: papaya::HashMap<ItemId, AuctionId>,
    next_auction_id: AtomicU64,
    next_bid_id: AtomicU64,
}

impl AuctionStore {
    pub(crate) fn new() -> Self {
        Self {
            auctions: papaya::HashMap::new(),
            by_item: papaya::HashMap::new(),
            next_auction_id: AtomicU64::new(1),
            next_bid_id: AtomicU64::new(1),
        }
    }

    /// Creates an auction for `item_id`. At most one auction exists per item.
    ///
    /// The status is `Ongoing` right away if `start_time` has already passed,
    /// otherwise `Scheduled` until the status updater promotes it.
    #[instrument(skip(self), err)]
    pub(crate) fn create(
        &self,
        item_id: ItemId,
        seller_id: UserId,
        starting_price: u64,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Result<Arc<AuctionRecord>, CreateAuctionError> {
        if starting_price == 0 {
            return Err(CreateAuctionError::ZeroStartingPrice);
        }
        if start_time >= end_time {
            return Err(CreateAuctionError::InvalidWindow);
        }
        let id = AuctionId::new(self.next_auction_id.fetch_add(1, Ordering::Relaxed));
        self.by_item
            .pin()
            .try_insert(item_id, id)
            .map_err(|_| CreateAuctionError::ItemAlreadyListed {
                item_id,
            })?;

        let now = Timestamp::now();
        let status = if start_time <= now {
            AuctionStatus::Ongoing
        } else {
            AuctionStatus::Scheduled
        };
        let record = Arc::new(AuctionRecord {
            id,
            item_id,
            seller_id,
            created_at: now,
            state: Mutex::new(AuctionState {
                starting_price,
                current_price: starting_price,
                total_bids: 0,
                start_time,
                end_time,
                status,
                bids: Vec::new(),
                updated_at: now,
            }),
        });
        self.auctions.pin().insert(id, record.clone());
        Ok(record)
    }

    pub(crate) fn get(&self, id: AuctionId) -> Option<Arc<AuctionRecord>> {
        self.auctions.pin().get(&id).cloned()
    }

    pub(crate) fn get_by_item(&self, item_id: ItemId) -> Option<Arc<AuctionRecord>> {
        let id = *self.by_item.pin().get(&item_id)?;
        self.get(id)
    }

    /// Allocates the id for the next accepted bid.
    pub(crate) fn next_bid_id(&self) -> BidId {
        BidId::new(self.next_bid_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Scheduled auctions whose start time has passed.
    pub(crate) fn due_to_start(&self, now: Timestamp) -> Vec<Arc<AuctionRecord>> {
        self.filter(|state| state.status == AuctionStatus::Scheduled && state.start_time <= now)
    }

    /// Expired auctions awaiting finalization. `Ended` is included so that an
    /// auction whose finalization failed mid-way is retried on the next tick.
    pub(crate) fn due_to_finalize(&self, now: Timestamp) -> Vec<Arc<AuctionRecord>> {
        self.filter(|state| {
            matches!(state.status, AuctionStatus::Ongoing | AuctionStatus::Ended)
                && state.end_time < now
        })
    }

    /// Promotes a scheduled auction to ongoing. Returns `false` if the
    /// auction was not in the expected state (already promoted or cancelled).
    pub(crate) fn mark_ongoing(&self, record: &AuctionRecord, now: Timestamp) -> bool {
        let mut state = record.lock();
        if state.status != AuctionStatus::Scheduled || state.start_time > now {
            return false;
        }
        state.status = AuctionStatus::Ongoing;
        state.updated_at = now;
        true
    }

    /// All auctions, optionally filtered by status, newest first.
    pub(crate) fn list(&self, status: Option<AuctionStatus>) -> Vec<AuctionSnapshot> {
        let guard = self.auctions.guard();
        let mut snapshots: Vec<_> = self
            .auctions
            .values(&guard)
            .map(|record| record.snapshot())
            .filter(|snapshot| status.map_or(true, |wanted| snapshot.status == wanted))
            .collect();
        snapshots.sort_by(|a, b| b.id.cmp(&a.id));
        snapshots
    }

    /// The bid history of an auction, newest first.
    pub(crate) fn bid_history(&self, id: AuctionId) -> Option<Vec<Bid>> {
        let record = self.get(id)?;
        let state = record.lock();
        let mut bids = state.bids.clone();
        bids.reverse();
        Some(bids)
    }

    fn filter(&self, predicate: impl Fn(&AuctionState) -> bool) -> Vec<Arc<AuctionRecord>> {
        let guard = self.auctions.guard();
        self.auctions
            .values(&guard)
            .filter(|record| predicate(&record.lock()))
            .cloned()
            .collect()
    }
}
