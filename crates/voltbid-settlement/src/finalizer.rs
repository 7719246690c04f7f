//! Terminal processing of ended auctions: winner determination, settlement
//! of the winning hold into a payment, the seller payout, and a defensive
//! release pass over every other hold still active on the auction.
//!
//! Finalization is idempotent. The status updater may observe the same ended
//! auction more than once (clock skew, a failed earlier attempt), so a
//! `Finalized` or `Cancelled` auction is a no-op, a hold that was already
//! consumed is skipped, and at most one payment pair is ever written per
//! auction.

use std::{
    sync::Arc,
    time::Instant,
};

use jiff::Timestamp;
use tracing::{
    info,
    instrument,
    warn,
};

use crate::{
    auction::{
        AuctionStatus,
        AuctionStore,
        Bid,
    },
    commission::CommissionPolicy,
    ids::AuctionId,
    ledger::{
        Ledger,
        LedgerError,
        ReleaseOutcome,
        SettleOutcome,
    },
    notify::{
        Notification,
        Notifier,
    },
    Metrics,
};

#[derive(Debug, PartialEq)]
pub enum FinalizeOutcome {
    /// The auction was already finalized or cancelled; nothing was changed.
    AlreadyFinal,
    /// The auction expired without bids; no money moved.
    NoBids,
    /// The winning hold was settled and the seller payout credited.
    Settled {
        winning_bid: Bid,
        commission: u64,
        payout: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("auction `{auction_id}` does not exist")]
    AuctionNotFound { auction_id: AuctionId },
    #[error("auction `{auction_id}` has not started and cannot be finalized")]
    NotStarted { auction_id: AuctionId },
    #[error("settlement failed; the auction stays pending and will be retried")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("auction `{auction_id}` does not exist")]
    AuctionNotFound { auction_id: AuctionId },
    #[error("auction `{auction_id}` is {status:?} and can no longer be cancelled")]
    AlreadyClosed {
        auction_id: AuctionId,
        status: AuctionStatus,
    },
}

pub(crate) struct Finalizer {
    auctions: Arc<AuctionStore>,
    ledger: Arc<Ledger>,
    commission: Arc<dyn CommissionPolicy>,
    notifier: Arc<dyn Notifier>,
    metrics: &'static Metrics,
}

impl Finalizer {
    pub(crate) fn new(
        auctions: Arc<AuctionStore>,
        ledger: Arc<Ledger>,
        commission: Arc<dyn CommissionPolicy>,
        notifier: Arc<dyn Notifier>,
        metrics: &'static Metrics,
    ) -> Self {
        Self {
            auctions,
            ledger,
            commission,
            notifier,
            metrics,
        }
    }

    /// Finalizes an expired auction. Safe to call more than once.
    ///
    /// On a ledger error the auction is left in `Ended` and picked up again
    /// by the next status-updater tick; the operations already performed are
    /// individually idempotent, so the retry completes the remainder.
    #[instrument(skip(self), err)]
    pub(crate) fn finalize(&self, auction_id: AuctionId) -> Result<FinalizeOutcome, FinalizeError> {
        let started = Instant::now();
        let record = self
            .auctions
            .get(auction_id)
            .ok_or(FinalizeError::AuctionNotFound {
                auction_id,
            })?;
        let seller_id = record.seller_id();
        let now = Timestamp::now();
        let mut notifications = Vec::new();

        let outcome = {
            let mut state = record.lock();
            match state.status {
                AuctionStatus::Finalized | AuctionStatus::Cancelled => {
                    return Ok(FinalizeOutcome::AlreadyFinal);
                }
                AuctionStatus::Scheduled => {
                    return Err(FinalizeError::NotStarted {
                        auction_id,
                    });
                }
                AuctionStatus::Ongoing | AuctionStatus::Ended => {}
            }
            state.status = AuctionStatus::Ended;
            state.updated_at = now;

            if let Some(winning_bid) = state.leading_bid().cloned() {
                let settle = self
                    .ledger
                    .settle_hold(winning_bid.user_id, winning_bid.id)?;
                let commission = self.commission.commission(winning_bid.amount);
                let payout = winning_bid.amount.saturating_sub(commission);

                // On a retry after a partial earlier run the hold is already
                // a payment; only credit the seller if that credit is
                // missing.
                let credit_seller = match settle {
                    SettleOutcome::Paid {
                        ..
                    } => true,
                    SettleOutcome::AlreadyPaid => {
                        !self.ledger.has_payout_credit(seller_id, winning_bid.id)?
                    }
                };
                if credit_seller {
                    self.ledger
                        .credit_payout(seller_id, payout, auction_id, winning_bid.id)?;
                }

                self.release_stragglers(&state.bids, &winning_bid, &mut notifications);

                state.status = AuctionStatus::Finalized;
                state.updated_at = Timestamp::now();

                info!(
                    %auction_id,
                    winner_id = %winning_bid.user_id,
                    winning_bid_id = %winning_bid.id,
                    hammer_price = winning_bid.amount,
                    commission,
                    payout,
                    "finalized auction",
                );
                notifications.push(Notification::AuctionWon {
                    auction_id,
                    user_id: winning_bid.user_id,
                    amount: winning_bid.amount,
                });
                notifications.push(Notification::AuctionSettled {
                    auction_id,
                    seller_id,
                    payout,
                });
                FinalizeOutcome::Settled {
                    winning_bid,
                    commission,
                    payout,
                }
            } else {
                state.status = AuctionStatus::Finalized;
                notifications.push(Notification::AuctionClosedNoBids {
                    auction_id,
                    seller_id,
                });
                info!(%auction_id, "auction ended without bids");
                FinalizeOutcome::NoBids
            }
        };

        self.metrics.increment_auctions_finalized_count();
        self.metrics.record_finalization_duration(started.elapsed());
        for notification in notifications {
            self.notifier.notify(notification);
        }
        Ok(outcome)
    }

    /// Cancels a scheduled or ongoing auction out-of-band, releasing every
    /// hold still active on it.
    #[instrument(skip(self), err)]
    pub(crate) fn cancel(&self, auction_id: AuctionId) -> Result<(), CancelError> {
        let record = self
            .auctions
            .get(auction_id)
            .ok_or(CancelError::AuctionNotFound {
                auction_id,
            })?;
        let seller_id = record.seller_id();
        let mut notifications = Vec::new();

        {
            let mut state = record.lock();
            if !matches!(
                state.status,
                AuctionStatus::Scheduled | AuctionStatus::Ongoing
            ) {
                return Err(CancelError::AlreadyClosed {
                    auction_id,
                    status: state.status,
                });
            }
            for bid in &state.bids {
                match self.ledger.release(bid.user_id, bid.id) {
                    Ok(ReleaseOutcome::Released {
                        amount,
                    }) => notifications.push(Notification::FundsReleased {
                        auction_id,
                        user_id: bid.user_id,
                        amount,
                    }),
                    Ok(ReleaseOutcome::AlreadyReleased) => {}
                    Err(error) => warn!(
                        %error,
                        %auction_id,
                        user_id = %bid.user_id,
                        bid_id = %bid.id,
                        amount = bid.amount,
                        "failed to release hold while cancelling",
                    ),
                }
            }
            state.status = AuctionStatus::Cancelled;
            state.updated_at = Timestamp::now();
        }

        info!(%auction_id, "cancelled auction");
        notifications.push(Notification::AuctionCancelled {
            auction_id,
            seller_id,
        });
        for notification in notifications {
            self.notifier.notify(notification);
        }
        Ok(())
    }

    /// In steady state every displaced hold was already released by the
    /// outbid pipeline; this pass guards against missed outbid events.
    fn release_stragglers(
        &self,
        bids: &[Bid],
        winning_bid: &Bid,
        notifications: &mut Vec<Notification>,
    ) {
        for bid in bids {
            if bid.id == winning_bid.id {
                continue;
            }
            match self.ledger.release(bid.user_id, bid.id) {
                Ok(ReleaseOutcome::Released {
                    amount,
                }) => {
                    warn!(
                        auction_id = %bid.auction_id,
                        user_id = %bid.user_id,
                        bid_id = %bid.id,
                        amount,
                        "released a hold the outbid pipeline had not processed",
                    );
                    notifications.push(Notification::FundsReleased {
                        auction_id: bid.auction_id,
                        user_id: bid.user_id,
                        amount,
                    });
                }
                Ok(ReleaseOutcome::AlreadyReleased) => {}
                Err(error) => warn!(
                    %error,
                    auction_id = %bid.auction_id,
                    user_id = %bid.user_id,
                    bid_id = %bid.id,
                    "failed to release a straggler hold; manual reconciliation required",
                ),
            }
        }
    }
}
