//! The release-funds worker: the consumer side of the outbid queue.
//!
//! One delivery is processed at a time with manual acknowledgment. A
//! malformed payload is rejected without requeue; any failure looking up or
//! crediting the wallet negatively acknowledges the delivery so it is
//! redelivered, with a backoff delay so a transiently failing wallet store
//! is not hammered in a hot loop. The ledger's release operation is
//! idempotent per originating bid, which makes duplicate deliveries and
//! reordered events harmless.

use std::{
    sync::Arc,
    time::Duration,
};

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    warn,
};
use voltbid_eyre::eyre::{
    self,
    bail,
};

use crate::{
    ledger::{
        Ledger,
        ReleaseOutcome,
    },
    notify::{
        Notification,
        Notifier,
    },
    outbid::{
        Consumer,
        Delivery,
        NackOutcome,
        OUTBID_ROUTING_KEY,
    },
    Metrics,
};

pub(crate) struct ReleaseFundsWorker {
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) retry_delay: Duration,
    pub(crate) prefetch_count: u32,
    pub(crate) shutdown_token: CancellationToken,
    pub(crate) metrics: &'static Metrics,
}

impl ReleaseFundsWorker {
    /// Consumes deliveries until the shutdown signal. The delivery being
    /// processed when the signal arrives is settled before the worker exits.
    pub(crate) async fn run(self, mut consumer: Consumer) -> eyre::Result<()> {
        if self.prefetch_count > 1 {
            warn!(
                prefetch_count = self.prefetch_count,
                "the release-funds worker processes strictly sequentially; prefetch above 1 has \
                 no effect",
            );
        }
        info!(
            routing_key = OUTBID_ROUTING_KEY,
            "release-funds worker started; waiting for outbid events",
        );

        loop {
            let delivery = select! {
                biased;

                () = self.shutdown_token.cancelled() => break,

                maybe_delivery = consumer.recv() => match maybe_delivery {
                    Some(delivery) => delivery,
                    None => bail!("the outbid queue closed unexpectedly"),
                },
            };

            if self.handle_delivery(delivery) {
                // Backoff after a transient failure, cut short by shutdown.
                select! {
                    biased;
                    () = self.shutdown_token.cancelled() => break,
                    () = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
        info!("release-funds worker received shutdown signal and is exiting");
        Ok(())
    }

    /// Processes one delivery, returning `true` if the caller should back
    /// off before taking the next one.
    pub(crate) fn handle_delivery(&self, delivery: Delivery) -> bool {
        let event = match delivery.event() {
            Ok(event) => event,
            Err(error) => {
                error!(
                    %error,
                    "failed to deserialize outbid event; rejecting without requeue",
                );
                delivery.reject();
                return false;
            }
        };

        match self
            .ledger
            .release(event.outbid_user_id, event.original_bid_id)
        {
            Ok(ReleaseOutcome::Released {
                amount,
            }) => {
                if amount != event.amount_to_release {
                    warn!(
                        held_amount = amount,
                        event_amount = event.amount_to_release,
                        original_bid_id = %event.original_bid_id,
                        "released hold amount differs from the amount carried by the event",
                    );
                }
                info!(
                    auction_id = %event.auction_id,
                    user_id = %event.outbid_user_id,
                    amount,
                    "released funds for outbid user",
                );
                self.metrics.increment_releases_processed_count();
                delivery.ack();
                self.notifier.notify(Notification::FundsReleased {
                    auction_id: event.auction_id,
                    user_id: event.outbid_user_id,
                    amount,
                });
                false
            }
            Ok(ReleaseOutcome::AlreadyReleased) => {
                info!(
                    original_bid_id = %event.original_bid_id,
                    user_id = %event.outbid_user_id,
                    "funds already released; skipping duplicate delivery",
                );
                self.metrics.increment_releases_skipped_count();
                delivery.ack();
                false
            }
            Err(error) => {
                warn!(
                    %error,
                    auction_id = %event.auction_id,
                    user_id = %event.outbid_user_id,
                    original_bid_id = %event.original_bid_id,
                    amount_to_release = event.amount_to_release,
                    redelivered = delivery.redelivered(),
                    "failed to release funds; negatively acknowledging",
                );
                match delivery.nack() {
                    NackOutcome::Requeued => self.metrics.increment_release_retries_count(),
                    NackOutcome::DeadLettered => error!(
                        auction_id = %event.auction_id,
                        user_id = %event.outbid_user_id,
                        original_bid_id = %event.original_bid_id,
                        amount_to_release = event.amount_to_release,
                        "outbid event exhausted its redeliveries and was dead-lettered",
                    ),
                }
                true
            }
        }
    }
}
