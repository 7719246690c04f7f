use std::{
    process::ExitCode,
    sync::Arc,
};

use tokio::{
    select,
    signal::unix::{
        signal,
        SignalKind,
    },
};
use tracing::{
    error,
    info,
    instrument,
    warn,
};
use voltbid_eyre::eyre::{
    self,
    eyre,
    WrapErr as _,
};
use voltbid_settlement::{
    BasisPoints,
    Collaborators,
    Config,
    InMemoryCatalog,
    NoopNotifier,
    Settlement,
};

#[tokio::main]
async fn main() -> ExitCode {
    voltbid_eyre::install().expect("voltbid eyre hook must be the first hook installed");

    let cfg: Config = match config::get() {
        Err(err) => {
            eprintln!("failed to read configuration:\n{err:?}");
            return ExitCode::FAILURE;
        }
        Ok(cfg) => cfg,
    };
    eprintln!(
        "starting with configuration:\n{}",
        telemetry::display::json(&cfg),
    );

    let mut telemetry_conf = telemetry::configure()
        .set_filter_directives(&cfg.log)
        .set_pretty_print(cfg.pretty_print);

    if !cfg.no_metrics {
        telemetry_conf =
            telemetry_conf.set_metrics(&cfg.metrics_http_listener_addr, env!("CARGO_PKG_NAME"));
    }

    let metrics = match telemetry_conf
        .try_init::<voltbid_settlement::Metrics>(&())
        .wrap_err("failed to setup telemetry")
    {
        Err(e) => {
            eprintln!("initializing settlement service failed:\n{e:?}");
            return ExitCode::FAILURE;
        }
        Ok(metrics) => metrics,
    };

    info!(
        config = serde_json::to_string(&cfg).expect("serializing to a string cannot fail"),
        "initializing settlement service"
    );

    // The standalone binary runs against an empty in-memory catalog and a
    // discarding notification sink; a deployment embeds the library and
    // wires its real catalog and notification collaborators instead.
    let collaborators = Collaborators {
        catalog: Arc::new(InMemoryCatalog::new()),
        commission: Arc::new(BasisPoints::new(cfg.commission_bps)),
        notifier: Arc::new(NoopNotifier),
    };

    let mut settlement = match Settlement::spawn(cfg, collaborators, metrics) {
        Ok(settlement) => settlement,
        Err(error) => {
            error!(%error, "failed initializing settlement service");
            return ExitCode::FAILURE;
        }
    };

    let mut sigterm = signal(SignalKind::terminate())
        .expect("setting a SIGTERM listener should always work on Unix");

    let exit_reason = select! {
        _ = sigterm.recv() => Ok("received shutdown signal"),
        res = &mut settlement => {
            res.and_then(|()| Err(eyre!("settlement task exited unexpectedly")))
        }
    };

    shutdown(exit_reason, settlement).await
}

#[instrument(skip_all)]
async fn shutdown(reason: eyre::Result<&'static str>, mut service: Settlement) -> ExitCode {
    let message = "shutting down";
    let exit_code = match reason {
        Ok(reason) => {
            info!(reason, message);
            if let Err(error) = service.shutdown().await {
                warn!(%error, "encountered errors during shutdown");
            };
            ExitCode::SUCCESS
        }
        Err(reason) => {
            error!(%reason, message);
            ExitCode::FAILURE
        }
    };
    info!("shutdown target reached");
    exit_code
}
