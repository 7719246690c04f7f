use std::time::Duration;

use telemetry::{
    metric_names,
    metrics::{
        self,
        BucketBuilder,
        Counter,
        Histogram,
        RegisteringBuilder,
    },
};

const FINALIZATION_DURATION_BUCKETS: &[f64] = &[0.0001, 0.001, 0.01, 0.1, 1.0, 10.0];

pub struct Metrics {
    bids_accepted_count: Counter,
    bids_rejected_count: Counter,
    outbid_events_published_count: Counter,
    outbid_publish_failure_count: Counter,
    releases_processed_count: Counter,
    releases_skipped_count: Counter,
    release_retries_count: Counter,
    dead_letters_count: Counter,
    auctions_started_count: Counter,
    auctions_finalized_count: Counter,
    finalization_failure_count: Counter,
    finalization_duration: Histogram,
}

impl Metrics {
    pub(crate) fn increment_bids_accepted_count(&self) {
        self.bids_accepted_count.increment(1);
    }

    pub(crate) fn increment_bids_rejected_count(&self) {
        self.bids_rejected_count.increment(1);
    }

    pub(crate) fn increment_outbid_events_published_count(&self) {
        self.outbid_events_published_count.increment(1);
    }

    pub(crate) fn increment_outbid_publish_failure_count(&self) {
        self.outbid_publish_failure_count.increment(1);
    }

    pub(crate) fn increment_releases_processed_count(&self) {
        self.releases_processed_count.increment(1);
    }

    pub(crate) fn increment_releases_skipped_count(&self) {
        self.releases_skipped_count.increment(1);
    }

    pub(crate) fn increment_release_retries_count(&self) {
        self.release_retries_count.increment(1);
    }

    pub(crate) fn increment_dead_letters_count(&self) {
        self.dead_letters_count.increment(1);
    }

    pub(crate) fn increment_auctions_started_count(&self) {
        self.auctions_started_count.increment(1);
    }

    pub(crate) fn increment_auctions_finalized_count(&self) {
        self.auctions_finalized_count.increment(1);
    }

    pub(crate) fn increment_finalization_failure_count(&self) {
        self.finalization_failure_count.increment(1);
    }

    pub(crate) fn record_finalization_duration(&self, duration: Duration) {
        self.finalization_duration.record(duration);
    }
}

impl telemetry::Metrics for Metrics {
    type Config = ();

    fn set_buckets(builder: &mut BucketBuilder, _config: &Self::Config) -> Result<(), metrics::Error> {
        builder.set_buckets(FINALIZATION_DURATION, FINALIZATION_DURATION_BUCKETS)
    }

    fn register(
        builder: &mut RegisteringBuilder,
        _config: &Self::Config,
    ) -> Result<Self, metrics::Error> {
        let bids_accepted_count = builder
            .new_counter_factory(
                BIDS_ACCEPTED_COUNT,
                "The number of bids accepted and recorded with a fund hold",
            )?
            .register()?;

        let bids_rejected_count = builder
            .new_counter_factory(
                BIDS_REJECTED_COUNT,
                "The number of bids rejected during validation",
            )?
            .register()?;

        let outbid_events_published_count = builder
            .new_counter_factory(
                OUTBID_EVENTS_PUBLISHED_COUNT,
                "The number of outbid events published to the release queue",
            )?
            .register()?;

        let outbid_publish_failure_count = builder
            .new_counter_factory(
                OUTBID_PUBLISH_FAILURE_COUNT,
                "The number of outbid events that could not be published",
            )?
            .register()?;

        let releases_processed_count = builder
            .new_counter_factory(
                RELEASES_PROCESSED_COUNT,
                "The number of holds released back to outbid users' wallets",
            )?
            .register()?;

        let releases_skipped_count = builder
            .new_counter_factory(
                RELEASES_SKIPPED_COUNT,
                "The number of outbid events skipped because the hold was already released",
            )?
            .register()?;

        let release_retries_count = builder
            .new_counter_factory(
                RELEASE_RETRIES_COUNT,
                "The number of outbid events requeued after a processing failure",
            )?
            .register()?;

        let dead_letters_count = builder
            .new_counter_factory(
                DEAD_LETTERS_COUNT,
                "The number of outbid events moved to the dead-letter drain",
            )?
            .register()?;

        let auctions_started_count = builder
            .new_counter_factory(
                AUCTIONS_STARTED_COUNT,
                "The number of auctions promoted from scheduled to ongoing",
            )?
            .register()?;

        let auctions_finalized_count = builder
            .new_counter_factory(
                AUCTIONS_FINALIZED_COUNT,
                "The number of auctions finalized after expiry",
            )?
            .register()?;

        let finalization_failure_count = builder
            .new_counter_factory(
                FINALIZATION_FAILURE_COUNT,
                "The number of finalization attempts that failed and will be retried",
            )?
            .register()?;

        let finalization_duration = builder
            .new_histogram_factory(
                FINALIZATION_DURATION,
                "The time taken to finalize an ended auction, in seconds",
            )?
            .register()?;

        Ok(Self {
            bids_accepted_count,
            bids_rejected_count,
            outbid_events_published_count,
            outbid_publish_failure_count,
            releases_processed_count,
            releases_skipped_count,
            release_retries_count,
            dead_letters_count,
            auctions_started_count,
            auctions_finalized_count,
            finalization_failure_count,
            finalization_duration,
        })
    }
}

metric_names!(const METRICS_NAMES:
    BIDS_ACCEPTED_COUNT,
    BIDS_REJECTED_COUNT,
    OUTBID_EVENTS_PUBLISHED_COUNT,
    OUTBID_PUBLISH_FAILURE_COUNT,
    RELEASES_PROCESSED_COUNT,
    RELEASES_SKIPPED_COUNT,
    RELEASE_RETRIES_COUNT,
    DEAD_LETTERS_COUNT,
    AUCTIONS_STARTED_COUNT,
    AUCTIONS_FINALIZED_COUNT,
    FINALIZATION_FAILURE_COUNT,
    FINALIZATION_DURATION,
);
