//! The outbid event queue between bid placement and the release-funds
//! worker.
//!
//! Semantics mirror a broker-backed work queue: publishing never blocks the
//! bid path, payloads travel as JSON bytes, delivery is at-least-once, and a
//! delivery must be settled explicitly with [`Delivery::ack`],
//! [`Delivery::nack`] (requeue, bounded by a redelivery limit) or
//! [`Delivery::reject`] (straight to the dead-letter drain). A delivery that
//! is dropped unsettled is requeued, the same way a broker redelivers
//! messages that were in flight when a consumer died.

use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::mpsc;
use tracing::{
    error,
    warn,
};

use crate::ids::{
    AuctionId,
    BidId,
    UserId,
};

/// The routing key under which outbid events are published.
pub(crate) const OUTBID_ROUTING_KEY: &str = "bid.outbid";

/// Signals that a previously leading bid was displaced and its hold must be
/// released back to the outbid user's wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct OutbidEvent {
    pub(crate) auction_id: AuctionId,
    pub(crate) outbid_user_id: UserId,
    pub(crate) original_bid_id: BidId,
    pub(crate) amount_to_release: u64,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PublishError {
    #[error("failed to serialize outbid event")]
    Serialize(#[from] serde_json::Error),
    #[error("the outbid queue is closed")]
    Closed,
}

#[derive(Debug)]
struct Envelope {
    payload: Vec<u8>,
    redelivered: u32,
}

/// Why a message ended up in the dead-letter drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeadLetterReason {
    /// The payload could not be decoded; retrying would never succeed.
    Poison,
    /// The message failed processing more often than the redelivery limit.
    RedeliveriesExhausted,
}

#[derive(Debug)]
pub(crate) struct DeadLetter {
    pub(crate) payload: Vec<u8>,
    pub(crate) redelivered: u32,
    pub(crate) reason: DeadLetterReason,
}

/// Creates the queue, returning the publishing side, the consuming side, and
/// the dead-letter drain.
///
/// A message is dead-lettered once it has been redelivered more than
/// `max_redeliveries` times.
pub(crate) fn queue(max_redeliveries: u32) -> (Publisher, Consumer, DeadLetters) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (dead_tx, dead_rx) = mpsc::unbounded_channel();
    (
        Publisher {
            tx: tx.clone(),
        },
        Consumer {
            rx,
            requeue_tx: tx,
            dead_tx,
            max_redeliveries,
        },
        DeadLetters {
            rx: dead_rx,
        },
    )
}

#[derive(Clone)]
pub(crate) struct Publisher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Publisher {
    /// Serializes `event` and enqueues it. Never blocks.
    pub(crate) fn publish(&self, event: &OutbidEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.tx
            .send(Envelope {
                payload,
                redelivered: 0,
            })
            .map_err(|_| PublishError::Closed)
    }

    /// Enqueues raw bytes, bypassing serialization. Lets tests exercise the
    /// consumer's malformed-payload path.
    #[cfg(test)]
    pub(crate) fn publish_raw(&self, payload: Vec<u8>) {
        self.tx
            .send(Envelope {
                payload,
                redelivered: 0,
            })
            .expect("test queue must be open");
    }
}

pub(crate) struct Consumer {
    rx: mpsc::UnboundedReceiver<Envelope>,
    requeue_tx: mpsc::UnboundedSender<Envelope>,
    dead_tx: mpsc::UnboundedSender<DeadLetter>,
    max_redeliveries: u32,
}

impl Consumer {
    /// Receives the next delivery. Resolves to `None` only if every producer
    /// handle is gone, which cannot happen while the consumer itself holds
    /// the requeue handle.
    pub(crate) async fn recv(&mut self) -> Option<Delivery> {
        let envelope = self.rx.recv().await?;
        Some(Delivery {
            envelope: Some(envelope),
            requeue_tx: self.requeue_tx.clone(),
            dead_tx: self.dead_tx.clone(),
            max_redeliveries: self.max_redeliveries,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum NackOutcome {
    Requeued,
    DeadLettered,
}

/// A single in-flight message. Must be settled via [`Self::ack`],
/// [`Self::nack`] or [`Self::reject`]; dropping it unsettled requeues it.
pub(crate) struct Delivery {
    envelope: Option<Envelope>,
    requeue_tx: mpsc::UnboundedSender<Envelope>,
    dead_tx: mpsc::UnboundedSender<DeadLetter>,
    max_redeliveries: u32,
}

impl Delivery {
    /// Decodes the payload into an [`OutbidEvent`].
    pub(crate) fn event(&self) -> Result<OutbidEvent, serde_json::Error> {
        serde_json::from_slice(&self.envelope.as_ref().expect("delivery already settled").payload)
    }

    /// How often this message was redelivered before the current attempt.
    pub(crate) fn redelivered(&self) -> u32 {
        self.envelope.as_ref().expect("delivery already settled").redelivered
    }

    /// Acknowledges successful processing; the message is done.
    pub(crate) fn ack(mut self) {
        let _ = self.envelope.take();
    }

    /// Negatively acknowledges the message: it is requeued for another
    /// attempt, or dead-lettered once the redelivery limit is exhausted.
    pub(crate) fn nack(mut self) -> NackOutcome {
        let envelope = self.envelope.take().expect("delivery already settled");
        self.requeue_or_bury(envelope)
    }

    /// Rejects the message without requeueing it. Used for poison payloads
    /// that can never be processed.
    pub(crate) fn reject(mut self) {
        let envelope = self.envelope.take().expect("delivery already settled");
        self.bury(envelope, DeadLetterReason::Poison);
    }

    fn requeue_or_bury(&self, envelope: Envelope) -> NackOutcome {
        if envelope.redelivered >= self.max_redeliveries {
            self.bury(envelope, DeadLetterReason::RedeliveriesExhausted);
            return NackOutcome::DeadLettered;
        }
        let requeued = Envelope {
            payload: envelope.payload,
            redelivered: envelope.redelivered.saturating_add(1),
        };
        if self.requeue_tx.send(requeued).is_err() {
            error!("outbid queue closed while requeueing a message; the message is lost");
        }
        NackOutcome::Requeued
    }

    fn bury(&self, envelope: Envelope, reason: DeadLetterReason) {
        let dead = DeadLetter {
            payload: envelope.payload,
            redelivered: envelope.redelivered,
            reason,
        };
        if self.dead_tx.send(dead).is_err() {
            error!("dead-letter drain closed; a poison message is lost");
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            warn!(
                redelivered = envelope.redelivered,
                "delivery dropped without being settled; requeueing"
            );
            let _ = self.requeue_or_bury(envelope);
        }
    }
}

/// The dead-letter drain. Entries here are never retried; they exist for
/// alerting and manual reconciliation.
pub(crate) struct DeadLetters {
    rx: mpsc::UnboundedReceiver<DeadLetter>,
}

impl DeadLetters {
    pub(crate) async fn recv(&mut self) -> Option<DeadLetter> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<DeadLetter> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> OutbidEvent {
        OutbidEvent {
            auction_id: AuctionId::new(1),
            outbid_user_id: UserId::new(2),
            original_bid_id: BidId::new(3),
            amount_to_release: 1_100_000,
        }
    }

    #[tokio::test]
    async fn published_events_round_trip_as_json() {
        let (publisher, mut consumer, _dead) = queue(5);
        publisher.publish(&event()).unwrap();

        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.redelivered(), 0);
        assert_eq!(delivery.event().unwrap(), event());
        delivery.ack();
    }

    #[tokio::test]
    async fn wire_format_uses_plain_integers() {
        let (publisher, mut consumer, _dead) = queue(5);
        publisher.publish(&event()).unwrap();
        let delivery = consumer.recv().await.unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&delivery.envelope.as_ref().unwrap().payload).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "auction_id": 1,
                "outbid_user_id": 2,
                "original_bid_id": 3,
                "amount_to_release": 1_100_000,
            }),
        );
        delivery.ack();
    }

    #[tokio::test]
    async fn nack_requeues_with_incremented_redelivery_count() {
        let (publisher, mut consumer, _dead) = queue(5);
        publisher.publish(&event()).unwrap();

        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.nack(), NackOutcome::Requeued);

        let redelivered = consumer.recv().await.unwrap();
        assert_eq!(redelivered.redelivered(), 1);
        redelivered.ack();
    }

    #[tokio::test]
    async fn nack_beyond_the_limit_dead_letters() {
        let (publisher, mut consumer, mut dead) = queue(1);
        publisher.publish(&event()).unwrap();

        assert_eq!(consumer.recv().await.unwrap().nack(), NackOutcome::Requeued);
        assert_eq!(
            consumer.recv().await.unwrap().nack(),
            NackOutcome::DeadLettered,
        );

        let letter = dead.try_recv().unwrap();
        assert_eq!(letter.reason, DeadLetterReason::RedeliveriesExhausted);
        assert_eq!(letter.redelivered, 1);
    }

    #[tokio::test]
    async fn reject_dead_letters_without_retry() {
        let (publisher, mut consumer, mut dead) = queue(5);
        publisher.publish_raw(b"not json".to_vec());

        let delivery = consumer.recv().await.unwrap();
        assert!(delivery.event().is_err());
        delivery.reject();

        let letter = dead.try_recv().unwrap();
        assert_eq!(letter.reason, DeadLetterReason::Poison);
        assert_eq!(letter.payload, b"not json");
    }

    #[tokio::test]
    async fn dropping_an_unsettled_delivery_requeues_it() {
        let (publisher, mut consumer, _dead) = queue(5);
        publisher.publish(&event()).unwrap();

        drop(consumer.recv().await.unwrap());

        let redelivered = consumer.recv().await.unwrap();
        assert_eq!(redelivered.redelivered(), 1);
        redelivered.ack();
    }
}
