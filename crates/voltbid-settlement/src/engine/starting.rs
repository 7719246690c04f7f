use std::{
    sync::Arc,
    time::Duration,
};

use tokio::{
    select,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::error;
use voltbid_eyre::eyre::{
    self,
    ensure,
};

use super::{
    Running,
    RunState,
};
use crate::{
    auction::AuctionStore,
    bidding::Bidding,
    finalizer::Finalizer,
    ledger::Ledger,
    outbid::{
        self,
        Consumer,
        DeadLetters,
    },
    release_worker::ReleaseFundsWorker,
    scheduler::StatusUpdater,
    Collaborators,
    Config,
    Handle,
    Metrics,
};

pub(super) fn run_state(
    config: Config,
    collaborators: Collaborators,
    shutdown_token: CancellationToken,
    metrics: &'static Metrics,
) -> eyre::Result<(RunState, Handle)> {
    let (starting, handle) = Starting::new(config, collaborators, shutdown_token, metrics)?;
    Ok((starting.into(), handle))
}

pub(super) struct Starting {
    status_updater: StatusUpdater,
    release_worker: ReleaseFundsWorker,
    consumer: Consumer,
    dead_letters: DeadLetters,
    shutdown_token: CancellationToken,
    metrics: &'static Metrics,
}

impl Starting {
    fn new(
        config: Config,
        collaborators: Collaborators,
        shutdown_token: CancellationToken,
        metrics: &'static Metrics,
    ) -> eyre::Result<(Self, Handle)> {
        let Config {
            poll_interval_ms,
            prefetch_count,
            release_retry_delay_ms,
            max_redeliveries,
            currency,
            ..
        } = config;
        ensure!(poll_interval_ms > 0, "poll interval must not be zero");
        ensure!(prefetch_count >= 1, "prefetch count must be at least 1");

        let Collaborators {
            catalog,
            commission,
            notifier,
        } = collaborators;

        let ledger = Arc::new(Ledger::new());
        let auctions = Arc::new(AuctionStore::new());
        let (publisher, consumer, dead_letters) = outbid::queue(max_redeliveries);

        let bidding = Arc::new(Bidding::new(
            auctions.clone(),
            ledger.clone(),
            publisher,
            catalog,
            notifier.clone(),
            metrics,
        ));
        let finalizer = Arc::new(Finalizer::new(
            auctions.clone(),
            ledger.clone(),
            commission,
            notifier.clone(),
            metrics,
        ));

        let status_updater = StatusUpdater {
            auctions: auctions.clone(),
            finalizer: finalizer.clone(),
            poll_interval: Duration::from_millis(poll_interval_ms),
            shutdown_token: shutdown_token.child_token(),
            metrics,
        };
        let release_worker = ReleaseFundsWorker {
            ledger: ledger.clone(),
            notifier,
            retry_delay: Duration::from_millis(release_retry_delay_ms),
            prefetch_count,
            shutdown_token: shutdown_token.child_token(),
            metrics,
        };

        let handle = Handle {
            bidding,
            finalizer,
            auctions,
            ledger,
            currency,
        };
        Ok((
            Self {
                status_updater,
                release_worker,
                consumer,
                dead_letters,
                shutdown_token,
                metrics,
            },
            handle,
        ))
    }

    pub(super) async fn run(self) -> eyre::Result<RunState> {
        let Self {
            status_updater,
            release_worker,
            consumer,
            dead_letters,
            shutdown_token,
            metrics,
        } = self;

        let mut tasks = JoinSet::new();
        tasks.spawn(async move { ("status updater", status_updater.run().await) });
        tasks.spawn(async move { ("release-funds worker", release_worker.run(consumer).await) });
        let drain_token = shutdown_token.child_token();
        tasks.spawn(async move {
            (
                "dead-letter drain",
                drain_dead_letters(dead_letters, drain_token, metrics).await,
            )
        });

        Ok(Running {
            tasks,
            shutdown_token,
        }
        .into())
    }
}

/// Logs every dead-lettered outbid event with enough context for manual
/// reconciliation. Entries here are never retried.
async fn drain_dead_letters(
    mut dead_letters: DeadLetters,
    shutdown_token: CancellationToken,
    metrics: &'static Metrics,
) -> eyre::Result<()> {
    loop {
        select! {
            biased;

            () = shutdown_token.cancelled() => break,

            maybe_letter = dead_letters.recv() => {
                let Some(letter) = maybe_letter else {
                    break;
                };
                metrics.increment_dead_letters_count();
                error!(
                    payload = %String::from_utf8_lossy(&letter.payload),
                    redelivered = letter.redelivered,
                    reason = ?letter.reason,
                    "outbid event dead-lettered; manual reconciliation required",
                );
            }
        }
    }
    Ok(())
}
