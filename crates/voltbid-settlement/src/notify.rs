//! Fire-and-forget notification signals emitted by the settlement core.
//!
//! Delivery (SSE, push, email) is the notification service's problem; the
//! core only emits. A failing or slow sink must never block or fail a
//! financial operation, so the trait is synchronous and infallible and
//! implementations are expected to hand off immediately.

use tokio::sync::mpsc;
use tracing::debug;

use crate::ids::{
    AuctionId,
    UserId,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The user's leading bid was displaced by a higher one.
    Outbid {
        auction_id: AuctionId,
        user_id: UserId,
        amount: u64,
    },
    /// A previously held amount was credited back to the user's wallet.
    FundsReleased {
        auction_id: AuctionId,
        user_id: UserId,
        amount: u64,
    },
    /// The auction closed with the user as the winner.
    AuctionWon {
        auction_id: AuctionId,
        user_id: UserId,
        amount: u64,
    },
    /// The seller's auction settled; the payout was credited.
    AuctionSettled {
        auction_id: AuctionId,
        seller_id: UserId,
        payout: u64,
    },
    /// The auction expired without a single bid.
    AuctionClosedNoBids {
        auction_id: AuctionId,
        seller_id: UserId,
    },
    /// The auction was cancelled out-of-band.
    AuctionCancelled {
        auction_id: AuctionId,
        seller_id: UserId,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards every notification. Useful for tests and headless deployments.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// Forwards notifications onto an unbounded channel for an embedding
/// presentation layer to drain.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
            },
            rx,
        )
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("notification receiver dropped; discarding notification");
        }
    }
}
