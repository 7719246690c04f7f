//! The voltbid auction bidding and settlement core.
//!
//! The service runs timed auctions over listed catalog items, accepts
//! concurrent bids, and reconciles the resulting money movements (holds,
//! releases, payouts) in user wallets.
//!
//! # Placing a bid
//!
//! Bids enter through [`Handle::place_bid`]. Under the targeted auction's
//! lock the bid is validated against the fresh current price, the full bid
//! amount is held in the bidder's wallet, and the bid is recorded. If the
//! bid displaced a previous price leader, an outbid event is published onto
//! an at-least-once queue after the update commits; the caller never waits
//! for it.
//!
//! # Background processing
//!
//! Two dedicated loops run next to the bid path: the status updater polls
//! the auction store on a fixed interval, promoting scheduled auctions and
//! handing expired ones to finalization (winner settlement, seller payout
//! net of commission, defensive release of straggler holds); the
//! release-funds worker drains outbid events one at a time and credits each
//! displaced hold back to its bidder exactly once, tolerating duplicate and
//! reordered deliveries.
//!
//! # Shutdown
//!
//! [`Settlement::shutdown`] cancels a shared token; the loops finish their
//! current pass or message and exit, with a bounded grace period before
//! remaining tasks are aborted.

use std::{
    future::Future,
    sync::Arc,
    task::Poll,
};

mod auction;
mod bidding;
mod catalog;
mod commission;
pub mod config;
mod engine;
mod finalizer;
mod handle;
mod ids;
mod ledger;
mod metrics;
mod notify;
mod outbid;
mod release_worker;
mod scheduler;

pub use auction::{
    AuctionSnapshot,
    AuctionStatus,
    Bid,
    CreateAuctionError,
};
pub use bidding::{
    BidReceipt,
    PlaceBidError,
};
pub use catalog::{
    CatalogItem,
    InMemoryCatalog,
    ItemCatalog,
};
pub use commission::{
    BasisPoints,
    CommissionPolicy,
};
pub use config::Config;
pub use finalizer::{
    CancelError,
    FinalizeError,
    FinalizeOutcome,
};
pub use handle::Handle;
pub use ids::{
    AuctionId,
    BidId,
    ItemId,
    TransactionId,
    UserId,
    WalletId,
};
pub use ledger::{
    LedgerError,
    TransactionKind,
    WalletStatus,
    WalletTransaction,
    WalletView,
};
pub use metrics::Metrics;
pub use notify::{
    ChannelNotifier,
    NoopNotifier,
    Notification,
    Notifier,
};

use tokio::task::{
    JoinError,
    JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use voltbid_eyre::eyre::{
    self,
    WrapErr as _,
};

/// The external services the settlement core consumes.
pub struct Collaborators {
    pub catalog: Arc<dyn ItemCatalog>,
    pub commission: Arc<dyn CommissionPolicy>,
    pub notifier: Arc<dyn Notifier>,
}

/// The [`Settlement`] service returned by [`Settlement::spawn`].
pub struct Settlement {
    shutdown_token: CancellationToken,
    task: Option<JoinHandle<eyre::Result<()>>>,
    handle: Handle,
}

impl Settlement {
    /// Spawns the [`Settlement`] service.
    ///
    /// # Errors
    /// Returns an error if the service cannot be initialized.
    pub fn spawn(
        cfg: Config,
        collaborators: Collaborators,
        metrics: &'static Metrics,
    ) -> eyre::Result<Self> {
        let shutdown_token = CancellationToken::new();
        let (inner, handle) =
            engine::Inner::new(cfg, collaborators, metrics, shutdown_token.child_token())?;
        let task = tokio::spawn(inner.run());

        Ok(Self {
            shutdown_token,
            task: Some(task),
            handle,
        })
    }

    /// Returns a cheap, cloneable handle to the core's operations.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Shuts the service down, in turn waiting for its components to shut
    /// down.
    ///
    /// # Errors
    /// Returns an error if an error occurred during shutdown.
    ///
    /// # Panics
    /// Panics if called twice.
    #[instrument(skip_all, err)]
    pub async fn shutdown(&mut self) -> eyre::Result<()> {
        self.shutdown_token.cancel();
        flatten_join_result(
            self.task
                .take()
                .expect("shutdown must not be called twice")
                .await,
        )
    }
}

impl Future for Settlement {
    type Output = eyre::Result<()>;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Self::Output> {
        use futures::future::FutureExt as _;

        let task = self
            .task
            .as_mut()
            .expect("settlement must not be polled after shutdown");
        task.poll_unpin(cx).map(flatten_join_result)
    }
}

fn flatten_join_result<T>(res: Result<eyre::Result<T>, JoinError>) -> eyre::Result<T> {
    match res {
        Ok(Ok(val)) => Ok(val),
        Ok(Err(err)) => Err(err).wrap_err("task returned with error"),
        Err(err) => Err(err).wrap_err("task panicked"),
    }
}
