//! Initialize telemetry in all voltbid services.
//!
//! Sets up the global `tracing` subscriber (env-filtered, JSON lines by
//! default, compact output on a tty when pretty printing is requested) and
//! registers the service's metrics with an optional Prometheus exporter.
//!
//! # Examples
//! ```no_run
//! # struct Metrics;
//! # impl voltbid_telemetry::metrics::Metrics for Metrics {
//! #     type Config = ();
//! #     fn register(
//! #         _: &mut voltbid_telemetry::metrics::RegisteringBuilder,
//! #         _: &Self::Config
//! #     ) -> Result<Self, voltbid_telemetry::metrics::Error> { Ok(Self) }
//! # }
//! let metrics_config = ();
//! voltbid_telemetry::configure()
//!     .set_filter_directives("info")
//!     .try_init::<Metrics>(&metrics_config)
//!     .expect("must be able to initialize telemetry");
//! tracing::info!("telemetry initialized");
//! ```
use std::io::IsTerminal as _;

pub use metrics::Metrics;
use tracing_subscriber::{
    filter::{
        LevelFilter,
        ParseError,
    },
    layer::SubscriberExt as _,
    util::{
        SubscriberInitExt as _,
        TryInitError,
    },
    EnvFilter,
    Layer as _,
};

#[cfg(feature = "display")]
pub mod display;
#[doc(hidden)]
pub mod macros;
pub mod metrics;

/// The errors that can occur when initializing telemetry.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn filter_directives(source: ParseError) -> Self {
        Self(ErrorKind::FilterDirectives(source))
    }

    fn init_subscriber(source: TryInitError) -> Self {
        Self(ErrorKind::InitSubscriber(source))
    }
}

impl From<metrics::Error> for Error {
    fn from(source: metrics::Error) -> Self {
        Self(ErrorKind::Metrics(source))
    }
}

#[derive(Debug, thiserror::Error)]
enum ErrorKind {
    #[error("failed to parse filter directives")]
    FilterDirectives(#[source] ParseError),
    #[error("failed installing global tracing subscriber")]
    InitSubscriber(#[source] TryInitError),
    #[error(transparent)]
    Metrics(#[from] metrics::Error),
}

#[must_use = "the telemetry config must be initialized to be useful"]
pub fn configure() -> Config {
    Config::new()
}

pub struct Config {
    filter_directives: String,
    pretty_print: bool,
    metrics_config_builder: Option<metrics::ConfigBuilder>,
}

impl Config {
    #[must_use = "telemetry must be initialized to be useful"]
    fn new() -> Self {
        Self {
            filter_directives: String::new(),
            pretty_print: false,
            metrics_config_builder: None,
        }
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_filter_directives(mut self, filter_directives: &str) -> Self {
        self.filter_directives = filter_directives.to_string();
        self
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_metrics(mut self, listening_addr: &str, service_name: &str) -> Self {
        let config_builder = metrics::ConfigBuilder::new()
            .set_service_name(service_name)
            .set_listening_address(listening_addr);
        self.metrics_config_builder = Some(config_builder);
        self
    }

    /// Initialize telemetry, consuming the config.
    ///
    /// The returned metrics object is leaked so that it can be shared freely
    /// between the service's long lived tasks.
    ///
    /// # Errors
    /// Fails if the filter directives could not be parsed, if the global
    /// tracing subscriber could not be installed, or if metrics registration
    /// failed.
    pub fn try_init<T: Metrics>(self, config: &T::Config) -> Result<&'static T, Error> {
        let Self {
            filter_directives,
            pretty_print,
            metrics_config_builder,
        } = self;

        let env_filter = {
            let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
            builder
                .parse(filter_directives)
                .map_err(Error::filter_directives)?
        };

        let fmt_layer = if pretty_print && std::io::stdout().is_terminal() {
            tracing_subscriber::fmt::layer().compact().boxed()
        } else {
            tracing_subscriber::fmt::layer().json().boxed()
        };

        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(env_filter)
            .try_init()
            .map_err(Error::init_subscriber)?;

        let metrics = match metrics_config_builder {
            Some(config_builder) => config_builder.build(config)?.0,
            None => T::noop_metrics(config)?,
        };

        Ok(Box::leak(Box::new(metrics)))
    }
}
