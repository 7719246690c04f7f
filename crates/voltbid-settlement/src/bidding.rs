//! Bid placement: the synchronous, latency-sensitive path of the core.
//!
//! A bid is validated and recorded under the targeted auction's lock, so all
//! bids on one auction are totally ordered and a bid racing a concurrent
//! higher bid is re-checked against the fresh price and rejected. The fund
//! hold is taken before the bid is recorded; a failed hold therefore leaves
//! no partial state. Publishing the outbid event for the displaced leader
//! happens after the lock is released and never blocks or fails the caller.

use std::sync::Arc;

use jiff::Timestamp;
use tracing::{
    debug,
    error,
    info,
    instrument,
};

use crate::{
    auction::{
        AuctionSnapshot,
        AuctionStatus,
        AuctionStore,
        Bid,
        CreateAuctionError,
    },
    catalog::ItemCatalog,
    ids::{
        AuctionId,
        ItemId,
        UserId,
    },
    ledger::{
        Ledger,
        LedgerError,
    },
    notify::{
        Notification,
        Notifier,
    },
    outbid::{
        OutbidEvent,
        Publisher,
    },
    Metrics,
};

/// Returned to the caller for every accepted bid.
#[derive(Clone, Debug)]
pub struct BidReceipt {
    pub bid_id: crate::ids::BidId,
    pub auction_id: AuctionId,
    pub amount: u64,
    pub total_bids: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaceBidError {
    #[error("auction `{auction_id}` does not exist")]
    AuctionNotFound { auction_id: AuctionId },
    #[error("auction `{auction_id}` is not open for bidding")]
    AuctionNotActive { auction_id: AuctionId },
    #[error("bid must exceed the current price of {current_price}")]
    BidTooLow { current_price: u64 },
    #[error("the bidder's wallet rejected the hold")]
    Wallet(#[source] LedgerError),
}

pub(crate) struct Bidding {
    auctions: Arc<AuctionStore>,
    ledger: Arc<Ledger>,
    publisher: Publisher,
    catalog: Arc<dyn ItemCatalog>,
    notifier: Arc<dyn Notifier>,
    metrics: &'static Metrics,
}

impl Bidding {
    pub(crate) fn new(
        auctions: Arc<AuctionStore>,
        ledger: Arc<Ledger>,
        publisher: Publisher,
        catalog: Arc<dyn ItemCatalog>,
        notifier: Arc<dyn Notifier>,
        metrics: &'static Metrics,
    ) -> Self {
        Self {
            auctions,
            ledger,
            publisher,
            catalog,
            notifier,
            metrics,
        }
    }

    /// Lists `item_id` for auction. The item must exist in the catalog and
    /// must not already have an auction.
    #[instrument(skip(self), err)]
    pub(crate) fn create_auction(
        &self,
        item_id: ItemId,
        starting_price: u64,
        start_time: Timestamp,
        end_time: Timestamp,
    ) -> Result<AuctionSnapshot, CreateAuctionError> {
        let item = self
            .catalog
            .get(item_id)
            .ok_or(CreateAuctionError::ItemNotFound {
                item_id,
            })?;
        let record = self.auctions.create(
            item_id,
            item.seller_id,
            starting_price,
            start_time,
            end_time,
        )?;
        let snapshot = record.snapshot();
        info!(
            auction_id = %snapshot.id,
            item_id = %item_id,
            seller_id = %snapshot.seller_id,
            starting_price,
            status = ?snapshot.status,
            "created auction",
        );
        Ok(snapshot)
    }

    /// Places a bid of `amount` on `auction_id` for `user_id`.
    ///
    /// Either all of {fund hold, bid record, price/count update} commit, or
    /// none do. If the bid displaces a previous leader, an outbid event for
    /// that leader's hold is published fire-and-forget after the update is
    /// committed.
    #[instrument(skip(self), err)]
    pub(crate) fn place_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
        amount: u64,
    ) -> Result<BidReceipt, PlaceBidError> {
        let result = self.try_place_bid(auction_id, user_id, amount);
        match &result {
            Ok(receipt) => {
                self.metrics.increment_bids_accepted_count();
                info!(
                    bid_id = %receipt.bid_id,
                    total_bids = receipt.total_bids,
                    "accepted bid",
                );
            }
            Err(_) => self.metrics.increment_bids_rejected_count(),
        }
        result
    }

    fn try_place_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
        amount: u64,
    ) -> Result<BidReceipt, PlaceBidError> {
        let record = self
            .auctions
            .get(auction_id)
            .ok_or(PlaceBidError::AuctionNotFound {
                auction_id,
            })?;
        let now = Timestamp::now();

        let (receipt, displaced) = {
            let mut state = record.lock();
            if state.status != AuctionStatus::Ongoing
                || now < state.start_time
                || now > state.end_time
            {
                return Err(PlaceBidError::AuctionNotActive {
                    auction_id,
                });
            }
            // Re-checked under the lock: a bid racing a concurrent higher bid
            // fails here and the caller retries with a fresh quote.
            if amount <= state.current_price {
                return Err(PlaceBidError::BidTooLow {
                    current_price: state.current_price,
                });
            }

            let bid_id = self.auctions.next_bid_id();
            self.ledger
                .hold(user_id, bid_id, auction_id, amount)
                .map_err(PlaceBidError::Wallet)?;

            let displaced = state.leading_bid().cloned();
            state.bids.push(Bid {
                id: bid_id,
                auction_id,
                user_id,
                amount,
                placed_at: now,
            });
            state.current_price = amount;
            state.total_bids += 1;
            state.updated_at = now;

            (
                BidReceipt {
                    bid_id,
                    auction_id,
                    amount,
                    total_bids: state.total_bids,
                },
                displaced,
            )
        };

        if let Some(displaced) = displaced {
            self.publish_outbid(&displaced);
        }
        Ok(receipt)
    }

    fn publish_outbid(&self, displaced: &Bid) {
        let event = OutbidEvent {
            auction_id: displaced.auction_id,
            outbid_user_id: displaced.user_id,
            original_bid_id: displaced.id,
            amount_to_release: displaced.amount,
        };
        match self.publisher.publish(&event) {
            Ok(()) => {
                self.metrics.increment_outbid_events_published_count();
                debug!(
                    auction_id = %event.auction_id,
                    outbid_user_id = %event.outbid_user_id,
                    original_bid_id = %event.original_bid_id,
                    amount_to_release = event.amount_to_release,
                    "published outbid event",
                );
            }
            Err(error) => {
                // The bid itself already committed; the displaced hold needs
                // manual reconciliation if this ever fires.
                self.metrics.increment_outbid_publish_failure_count();
                error!(
                    %error,
                    auction_id = %event.auction_id,
                    outbid_user_id = %event.outbid_user_id,
                    original_bid_id = %event.original_bid_id,
                    amount_to_release = event.amount_to_release,
                    "failed to publish outbid event",
                );
            }
        }
        self.notifier.notify(Notification::Outbid {
            auction_id: displaced.auction_id,
            user_id: displaced.user_id,
            amount: displaced.amount,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jiff::ToSpan as _;

    use super::*;
    use crate::{
        catalog::{
            CatalogItem,
            InMemoryCatalog,
        },
        ids::BidId,
        notify::NoopNotifier,
        outbid,
        test_utils::noop_metrics,
    };

    const ITEM: ItemId = ItemId::new(11);
    const SELLER: UserId = UserId::new(1);
    const BIDDER_X: UserId = UserId::new(2);
    const BIDDER_Y: UserId = UserId::new(3);

    struct Fixture {
        bidding: Bidding,
        ledger: Arc<Ledger>,
        auctions: Arc<AuctionStore>,
        consumer: outbid::Consumer,
    }

    fn fixture() -> Fixture {
        let auctions = Arc::new(AuctionStore::new());
        let ledger = Arc::new(Ledger::new());
        let (publisher, consumer, _dead) = outbid::queue(5);
        let catalog = InMemoryCatalog::with_items([CatalogItem {
            item_id: ITEM,
            seller_id: SELLER,
            title: "2021 long-range battery pack".to_string(),
        }]);
        let bidding = Bidding::new(
            auctions.clone(),
            ledger.clone(),
            publisher,
            catalog,
            Arc::new(NoopNotifier),
            noop_metrics(),
        );
        Fixture {
            bidding,
            ledger,
            auctions,
            consumer,
        }
    }

    fn open_auction(fixture: &Fixture, starting_price: u64) -> AuctionId {
        let now = Timestamp::now();
        fixture
            .bidding
            .create_auction(
                ITEM,
                starting_price,
                now - 1.seconds(),
                now + 1.hours(),
            )
            .unwrap()
            .id
    }

    fn fund(fixture: &Fixture, user: UserId, amount: u64) {
        fixture.ledger.open_wallet(user, "VND").unwrap();
        fixture.ledger.deposit(user, amount).unwrap();
    }

    #[test]
    fn first_bid_above_starting_price_is_accepted() {
        let fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 2_000_000);

        let receipt = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_100_000)
            .unwrap();
        assert_eq!(receipt.amount, 1_100_000);
        assert_eq!(receipt.total_bids, 1);

        let snapshot = fixture.auctions.get(auction_id).unwrap().snapshot();
        assert_eq!(snapshot.current_price, 1_100_000);
        assert_eq!(snapshot.total_bids, 1);
        // The full bid amount is held.
        assert_eq!(fixture.ledger.wallet(BIDDER_X).unwrap().balance, 900_000);
        assert_eq!(
            fixture.ledger.active_hold(BIDDER_X, receipt.bid_id),
            Some(1_100_000),
        );
    }

    #[test]
    fn bid_at_or_below_current_price_is_rejected() {
        let fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 2_000_000);

        let err = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_000_000)
            .unwrap_err();
        assert!(matches!(
            err,
            PlaceBidError::BidTooLow {
                current_price: 1_000_000
            }
        ));
        // No partial state: no bid recorded, nothing held.
        assert_eq!(fixture.auctions.get(auction_id).unwrap().snapshot().total_bids, 0);
        assert_eq!(fixture.ledger.wallet(BIDDER_X).unwrap().balance, 2_000_000);
    }

    #[test]
    fn bid_on_a_scheduled_auction_is_rejected() {
        let fixture = fixture();
        let now = Timestamp::now();
        let auction_id = fixture
            .bidding
            .create_auction(ITEM, 1_000_000, now + 1.hours(), now + 2.hours())
            .unwrap()
            .id;
        fund(&fixture, BIDDER_X, 2_000_000);

        let err = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_100_000)
            .unwrap_err();
        assert!(matches!(err, PlaceBidError::AuctionNotActive { .. }));
    }

    #[test]
    fn insufficient_spendable_balance_is_rejected_without_partial_state() {
        let fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 1_000_000);

        let err = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_100_000)
            .unwrap_err();
        assert!(matches!(
            err,
            PlaceBidError::Wallet(LedgerError::InsufficientFunds { .. })
        ));
        let snapshot = fixture.auctions.get(auction_id).unwrap().snapshot();
        assert_eq!(snapshot.total_bids, 0);
        assert_eq!(snapshot.current_price, 1_000_000);
    }

    #[test]
    fn missing_wallet_is_rejected() {
        let fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        let err = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_100_000)
            .unwrap_err();
        assert!(matches!(
            err,
            PlaceBidError::Wallet(LedgerError::WalletNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn displacing_the_leader_publishes_one_outbid_event() {
        let mut fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 2_000_000);
        fund(&fixture, BIDDER_Y, 2_000_000);

        let first = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_100_000)
            .unwrap();
        fixture
            .bidding
            .place_bid(auction_id, BIDDER_Y, 1_200_000)
            .unwrap();

        let delivery = fixture.consumer.recv().await.unwrap();
        let event = delivery.event().unwrap();
        assert_eq!(
            event,
            OutbidEvent {
                auction_id,
                outbid_user_id: BIDDER_X,
                original_bid_id: first.bid_id,
                amount_to_release: 1_100_000,
            },
        );
        delivery.ack();
    }

    #[tokio::test]
    async fn the_first_bid_publishes_no_outbid_event() {
        let mut fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 2_000_000);
        fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_100_000)
            .unwrap();

        // Nothing was published, so the receive must still be pending when
        // the timeout fires.
        assert!(tokio::time::timeout(
            std::time::Duration::from_millis(20),
            fixture.consumer.recv(),
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn raising_ones_own_bid_holds_the_full_new_amount_and_releases_the_old() {
        let mut fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 3_000_000);

        let first = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_100_000)
            .unwrap();
        let second = fixture
            .bidding
            .place_bid(auction_id, BIDDER_X, 1_300_000)
            .unwrap();

        // Both holds are active until the outbid event for the first one is
        // drained by the release worker.
        assert_eq!(
            fixture.ledger.wallet(BIDDER_X).unwrap().held,
            1_100_000 + 1_300_000,
        );
        assert_eq!(fixture.ledger.active_hold(BIDDER_X, second.bid_id), Some(1_300_000));

        let event = fixture.consumer.recv().await.unwrap();
        assert_eq!(event.event().unwrap().original_bid_id, first.bid_id);
        event.ack();
    }

    #[test]
    fn concurrent_bids_at_the_same_amount_accept_exactly_one() {
        let fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        let bidders: Vec<UserId> = (10..18).map(UserId::new).collect();
        for bidder in &bidders {
            fund(&fixture, *bidder, 2_000_000);
        }

        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = bidders
                .iter()
                .map(|bidder| {
                    let bidding = &fixture.bidding;
                    scope.spawn(move || bidding.place_bid(auction_id, *bidder, 1_500_000).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|&accepted| accepted)
                .count()
        });

        assert_eq!(accepted, 1);
        let snapshot = fixture.auctions.get(auction_id).unwrap().snapshot();
        assert_eq!(snapshot.current_price, 1_500_000);
        assert_eq!(snapshot.total_bids, 1);
        // Exactly one wallet carries a hold.
        let held: u64 = bidders
            .iter()
            .map(|bidder| fixture.ledger.wallet(*bidder).unwrap().held)
            .sum();
        assert_eq!(held, 1_500_000);
    }

    #[test]
    fn current_price_never_decreases_under_interleaved_bids() {
        let fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 100_000_000);
        fund(&fixture, BIDDER_Y, 100_000_000);

        let mut last_price = 1_000_000;
        for round in 0..10u64 {
            let bidder = if round % 2 == 0 { BIDDER_X } else { BIDDER_Y };
            let amount = 1_000_000 + (round + 1) * 100_000;
            fixture.bidding.place_bid(auction_id, bidder, amount).unwrap();
            let price = fixture.auctions.get(auction_id).unwrap().snapshot().current_price;
            assert!(price >= last_price);
            last_price = price;
        }
        assert_eq!(last_price, 2_000_000);
    }

    #[test]
    fn unknown_item_cannot_be_listed() {
        let fixture = fixture();
        let now = Timestamp::now();
        let err = fixture
            .bidding
            .create_auction(ItemId::new(999), 1_000_000, now, now + 1.hours())
            .unwrap_err();
        assert!(matches!(err, CreateAuctionError::ItemNotFound { .. }));
    }

    #[test]
    fn bid_ids_are_unique_and_increasing() {
        let fixture = fixture();
        let auction_id = open_auction(&fixture, 1_000_000);
        fund(&fixture, BIDDER_X, 100_000_000);
        let mut last = BidId::new(0);
        for step in 1..=5u64 {
            let receipt = fixture
                .bidding
                .place_bid(auction_id, BIDDER_X, 1_000_000 + step * 50_000)
                .unwrap();
            assert!(receipt.bid_id > last);
            last = receipt.bid_id;
        }
    }
}
