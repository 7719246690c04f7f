//! End-to-end flows through the spawned service: real status-updater and
//! release-worker loops, exercised via the public handle.

use std::{
    sync::Arc,
    time::Duration,
};

use jiff::{
    Timestamp,
    ToSpan as _,
};
use telemetry::Metrics as _;
use voltbid_settlement::{
    AuctionStatus,
    BasisPoints,
    CatalogItem,
    Collaborators,
    Config,
    Handle,
    InMemoryCatalog,
    ItemId,
    NoopNotifier,
    Settlement,
    TransactionKind,
    UserId,
};

const ITEM: ItemId = ItemId::new(11);
const SELLER: UserId = UserId::new(1);
const BIDDER_X: UserId = UserId::new(2);
const BIDDER_Y: UserId = UserId::new(3);

fn test_config() -> Config {
    Config {
        poll_interval_ms: 50,
        prefetch_count: 1,
        release_retry_delay_ms: 50,
        max_redeliveries: 5,
        commission_bps: 0,
        currency: "VND".to_string(),
        log: "info".to_string(),
        pretty_print: false,
        no_metrics: true,
        metrics_http_listener_addr: String::new(),
    }
}

fn spawn_settlement() -> Settlement {
    let metrics = Box::leak(Box::new(
        voltbid_settlement::Metrics::noop_metrics(&()).expect("noop metrics always register"),
    ));
    let collaborators = Collaborators {
        catalog: InMemoryCatalog::with_items([CatalogItem {
            item_id: ITEM,
            seller_id: SELLER,
            title: "compact EV, single owner".to_string(),
        }]),
        commission: Arc::new(BasisPoints::new(0)),
        notifier: Arc::new(NoopNotifier),
    };
    Settlement::spawn(test_config(), collaborators, metrics)
        .expect("settlement service must spawn")
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting until {what}",
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn release_count(handle: &Handle, user: UserId) -> usize {
    handle
        .wallet_transactions(user)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::Release)
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn two_bidder_auction_settles_end_to_end() {
    let mut settlement = spawn_settlement();
    let handle = settlement.handle();

    for (user, funds) in [(SELLER, 0), (BIDDER_X, 1_500_000), (BIDDER_Y, 1_500_000)] {
        handle.open_wallet(user).unwrap();
        if funds > 0 {
            handle.deposit(user, funds).unwrap();
        }
    }

    let now = Timestamp::now();
    let auction = handle
        .create_auction(ITEM, 1_000_000, now - 1.seconds(), now + 600.milliseconds())
        .unwrap();
    assert_eq!(auction.status, AuctionStatus::Ongoing);

    let first = handle.place_bid(auction.id, BIDDER_X, 1_100_000).unwrap();
    assert_eq!(handle.wallet(BIDDER_X).unwrap().balance, 400_000);

    handle.place_bid(auction.id, BIDDER_Y, 1_200_000).unwrap();
    assert_eq!(handle.wallet(BIDDER_Y).unwrap().balance, 300_000);

    let snapshot = handle.auction(auction.id).unwrap();
    assert_eq!(snapshot.current_price, 1_200_000);
    assert_eq!(snapshot.total_bids, 2);

    // The release worker drains the outbid event and restores bidder X.
    wait_until("bidder X's hold is released", || {
        handle.wallet(BIDDER_X).unwrap().balance == 1_500_000
    })
    .await;
    let releases: Vec<_> = handle
        .wallet_transactions(BIDDER_X)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::Release)
        .collect();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].ref_id, Some(first.bid_id));
    assert_eq!(releases[0].amount, 1_100_000);

    // The status updater notices the expiry and finalizes.
    wait_until("the auction is finalized", || {
        handle.auction(auction.id).unwrap().status == AuctionStatus::Finalized
    })
    .await;

    // Winner: hold converted into a payment, no release issued.
    let winner = handle.wallet(BIDDER_Y).unwrap();
    assert_eq!(winner.balance, 300_000);
    assert_eq!(winner.held, 0);
    assert_eq!(release_count(&handle, BIDDER_Y), 0);
    let payments: Vec<_> = handle
        .wallet_transactions(BIDDER_Y)
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::PaymentDebit)
        .collect();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, 1_200_000);

    // Seller: the full hammer price at zero commission.
    assert_eq!(handle.wallet(SELLER).unwrap().balance, 1_200_000);

    settlement.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduled_auction_is_promoted_and_closed_without_bids() {
    let mut settlement = spawn_settlement();
    let handle = settlement.handle();
    handle.open_wallet(SELLER).unwrap();

    let now = Timestamp::now();
    let auction = handle
        .create_auction(
            ITEM,
            1_000_000,
            now + 200.milliseconds(),
            now + 500.milliseconds(),
        )
        .unwrap();
    assert_eq!(auction.status, AuctionStatus::Scheduled);

    wait_until("the auction opens", || {
        handle.auction(auction.id).unwrap().status == AuctionStatus::Ongoing
    })
    .await;

    wait_until("the auction is finalized", || {
        handle.auction(auction.id).unwrap().status == AuctionStatus::Finalized
    })
    .await;

    // No bids: not a single ledger entry anywhere.
    assert!(handle.wallet_transactions(SELLER).unwrap().is_empty());
    assert_eq!(handle.auction(auction.id).unwrap().current_price, 1_000_000);

    settlement.shutdown().await.unwrap();
}
