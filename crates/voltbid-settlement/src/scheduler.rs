//! The auction status updater: a single background loop that polls the
//! auction store on a fixed interval, promotes scheduled auctions whose
//! start time has passed, and hands expired ongoing auctions to the
//! finalizer.
//!
//! A failure finalizing one auction is logged and does not affect the other
//! auctions of the same pass, and the failed auction is picked up again on
//! the next tick. The loop only exits on the shutdown signal; a pass in
//! progress runs to completion first.

use std::{
    sync::Arc,
    time::Duration,
};

use jiff::Timestamp;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
};

use voltbid_eyre::eyre;

use crate::{
    auction::AuctionStore,
    finalizer::Finalizer,
    Metrics,
};

pub(crate) struct StatusUpdater {
    pub(crate) auctions: Arc<AuctionStore>,
    pub(crate) finalizer: Arc<Finalizer>,
    pub(crate) poll_interval: Duration,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) metrics: &'static Metrics,
}

impl StatusUpdater {
    pub(crate) async fn run(self) -> eyre::Result<()> {
        info!(
            poll_interval = %humantime::format_duration(self.poll_interval),
            "status updater started",
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            select! {
                biased;

                () = self.shutdown_token.cancelled() => break,

                _ = interval.tick() => self.tick(Timestamp::now()),
            }
        }
        info!("status updater received shutdown signal and is exiting");
        Ok(())
    }

    /// One pass over the auction store at time `now`.
    pub(crate) fn tick(&self, now: Timestamp) {
        for record in self.auctions.due_to_start(now) {
            if self.auctions.mark_ongoing(&record, now) {
                self.metrics.increment_auctions_started_count();
                info!(auction_id = %record.id(), "auction is now open for bids");
            }
        }

        for record in self.auctions.due_to_finalize(now) {
            let auction_id = record.id();
            if let Err(error) = self.finalizer.finalize(auction_id) {
                // Isolated per auction: the rest of the pass continues and
                // this auction is retried next tick.
                self.metrics.increment_finalization_failure_count();
                error!(
                    %error,
                    %auction_id,
                    "failed to finalize expired auction; will retry next tick",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use jiff::ToSpan as _;

    use super::*;
    use crate::{
        auction::AuctionStatus,
        bidding::Bidding,
        catalog::{
            CatalogItem,
            InMemoryCatalog,
        },
        commission::BasisPoints,
        ids::{
            ItemId,
            UserId,
        },
        ledger::Ledger,
        notify::NoopNotifier,
        outbid,
        test_utils::noop_metrics,
    };

    const SELLER: UserId = UserId::new(1);
    const BIDDER: UserId = UserId::new(2);

    struct Fixture {
        bidding: Bidding,
        updater: StatusUpdater,
        ledger: Arc<Ledger>,
        auctions: Arc<AuctionStore>,
    }

    fn fixture(item_count: u64) -> Fixture {
        let auctions = Arc::new(AuctionStore::new());
        let ledger = Arc::new(Ledger::new());
        let (publisher, _consumer, _dead) = outbid::queue(5);
        let catalog = InMemoryCatalog::with_items((1..=item_count).map(|raw| CatalogItem {
            item_id: ItemId::new(raw),
            seller_id: SELLER,
            title: format!("lot {raw}"),
        }));
        let notifier = Arc::new(NoopNotifier);
        let bidding = Bidding::new(
            auctions.clone(),
            ledger.clone(),
            publisher,
            catalog,
            notifier.clone(),
            noop_metrics(),
        );
        let finalizer = Arc::new(Finalizer::new(
            auctions.clone(),
            ledger.clone(),
            Arc::new(BasisPoints::new(0)),
            notifier,
            noop_metrics(),
        ));
        let updater = StatusUpdater {
            auctions: auctions.clone(),
            finalizer,
            poll_interval: Duration::from_millis(5),
            shutdown_token: CancellationToken::new(),
            metrics: noop_metrics(),
        };
        Fixture {
            bidding,
            updater,
            ledger,
            auctions,
        }
    }

    #[test]
    fn tick_promotes_scheduled_auctions_whose_start_time_passed() {
        let fixture = fixture(1);
        let now = Timestamp::now();
        let auction_id = fixture
            .bidding
            .create_auction(ItemId::new(1), 1_000_000, now + 10.seconds(), now + 1.hours())
            .unwrap()
            .id;

        fixture.updater.tick(now);
        assert_eq!(
            fixture.auctions.get(auction_id).unwrap().snapshot().status,
            AuctionStatus::Scheduled,
        );

        fixture.updater.tick(now + 11.seconds());
        assert_eq!(
            fixture.auctions.get(auction_id).unwrap().snapshot().status,
            AuctionStatus::Ongoing,
        );
    }

    #[test]
    fn tick_finalizes_expired_auctions_in_the_same_pass_as_promotion() {
        let fixture = fixture(1);
        let now = Timestamp::now();
        // Scheduled, but both start and end are already in the past by the
        // time the updater looks: promoted and finalized in one pass.
        let auction_id = fixture
            .bidding
            .create_auction(ItemId::new(1), 1_000_000, now + 1.seconds(), now + 2.seconds())
            .unwrap()
            .id;

        fixture.updater.tick(now + 3.seconds());
        assert_eq!(
            fixture.auctions.get(auction_id).unwrap().snapshot().status,
            AuctionStatus::Finalized,
        );
    }

    #[test]
    fn a_failing_auction_does_not_stop_the_rest_of_the_pass() {
        let fixture = fixture(2);
        let now = Timestamp::now();
        let failing = fixture
            .bidding
            .create_auction(ItemId::new(1), 1_000_000, now - 10.seconds(), now + 1.seconds())
            .unwrap()
            .id;
        let healthy = fixture
            .bidding
            .create_auction(ItemId::new(2), 1_000_000, now - 10.seconds(), now + 1.seconds())
            .unwrap()
            .id;

        fixture.ledger.open_wallet(BIDDER, "VND").unwrap();
        fixture.ledger.deposit(BIDDER, 5_000_000).unwrap();
        fixture.bidding.place_bid(failing, BIDDER, 1_100_000).unwrap();
        fixture.bidding.place_bid(healthy, BIDDER, 1_200_000).unwrap();
        // The seller has no wallet, so settling either auction fails at the
        // payout credit.
        assert!(fixture.ledger.wallet(SELLER).is_none());

        fixture.updater.tick(now + 2.seconds());
        // Both were attempted; both failed in isolation and stay pending.
        assert_eq!(
            fixture.auctions.get(failing).unwrap().snapshot().status,
            AuctionStatus::Ended,
        );
        assert_eq!(
            fixture.auctions.get(healthy).unwrap().snapshot().status,
            AuctionStatus::Ended,
        );

        // Opening the seller wallet lets the next tick finish both.
        fixture.ledger.open_wallet(SELLER, "VND").unwrap();
        fixture.updater.tick(now + 3.seconds());
        assert_eq!(
            fixture.auctions.get(failing).unwrap().snapshot().status,
            AuctionStatus::Finalized,
        );
        assert_eq!(
            fixture.auctions.get(healthy).unwrap().snapshot().status,
            AuctionStatus::Finalized,
        );
    }

    #[tokio::test]
    async fn run_exits_on_the_shutdown_signal() {
        let fixture = fixture(0);
        let token = fixture.updater.shutdown_token.clone();
        let task = tokio::spawn(fixture.updater.run());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("updater must exit promptly on shutdown")
            .expect("updater task must not panic")
            .expect("updater must exit cleanly");
    }
}
