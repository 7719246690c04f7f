use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
/// The single config for creating a voltbid-settlement service.
pub struct Config {
    /// The interval in milliseconds between two status-updater passes over
    /// the auction store.
    pub poll_interval_ms: u64,
    /// The number of unacknowledged outbid events the release-funds worker
    /// takes at a time. The worker processes strictly sequentially; values
    /// above 1 are accepted but have no effect.
    pub prefetch_count: u32,
    /// The delay in milliseconds before the release-funds worker takes the
    /// next delivery after a processing failure.
    pub release_retry_delay_ms: u64,
    /// How often a failed outbid event is redelivered before it is moved to
    /// the dead-letter drain.
    pub max_redeliveries: u32,
    /// The platform commission retained from the hammer price on settlement,
    /// in basis points.
    pub commission_bps: u32,
    /// The currency code wallets are opened with.
    pub currency: String,
    /// Log level for the service.
    pub log: String,
    /// Renders compact human-readable logs instead of JSON when attached to
    /// a tty.
    pub pretty_print: bool,
    /// Set to true to disable the metrics server.
    pub no_metrics: bool,
    /// The endpoint which will be listened on for serving prometheus metrics.
    pub metrics_http_listener_addr: String,
}

impl config::Config for Config {
    const PREFIX: &'static str = "VOLTBID_SETTLEMENT_";
}
