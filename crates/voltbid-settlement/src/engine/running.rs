use std::time::Duration;

use tokio::{
    select,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    error,
    info,
    instrument,
    warn,
};
use voltbid_eyre::eyre::{
    self,
    eyre,
};

use super::RunState;

pub(super) struct Running {
    pub(super) tasks: JoinSet<(&'static str, eyre::Result<()>)>,
    pub(super) shutdown_token: CancellationToken,
}

impl Running {
    pub(super) async fn run(mut self) -> eyre::Result<RunState> {
        let reason = select! {
            biased;

            () = self.shutdown_token.clone().cancelled_owned() => {
                Ok("received shutdown signal")
            },

            res = self.tasks.join_next() => {
                Err(task_exit_report(res))
            }
        };

        self.shutdown(reason).await
    }

    #[instrument(skip_all)]
    async fn shutdown(mut self, reason: eyre::Result<&'static str>) -> eyre::Result<RunState> {
        const WAIT_BEFORE_ABORT: Duration = Duration::from_secs(25);

        // Necessary if we got here because of another reason than receiving
        // an external shutdown signal.
        self.shutdown_token.cancel();

        let message = format!(
            "waiting {} for all constituent tasks to shutdown before aborting",
            humantime::format_duration(WAIT_BEFORE_ABORT),
        );
        match &reason {
            Ok(reason) => info!(%reason, message),
            Err(reason) => error!(%reason, message),
        };

        let deadline = tokio::time::sleep(WAIT_BEFORE_ABORT);
        tokio::pin!(deadline);
        loop {
            select! {
                () = &mut deadline => {
                    warn!("timed out waiting for tasks to shut down; aborting them");
                    self.tasks.shutdown().await;
                    break;
                }

                maybe_task = self.tasks.join_next() => {
                    match maybe_task {
                        Some(Ok((name, Ok(())))) => info!(task = name, "task exited cleanly"),
                        Some(Ok((name, Err(error)))) => {
                            warn!(task = name, %error, "task exited with an error during shutdown");
                        }
                        Some(Err(join_error)) => {
                            warn!(%join_error, "task panicked during shutdown");
                        }
                        None => break,
                    }
                }
            }
        }

        info!("all constituent tasks are shut down");
        reason.map(|_| RunState::Cancelled)
    }
}

fn task_exit_report(
    res: Option<Result<(&'static str, eyre::Result<()>), tokio::task::JoinError>>,
) -> eyre::Report {
    match res {
        Some(Ok((name, Ok(())))) => eyre!("task `{name}` exited unexpectedly"),
        Some(Ok((name, Err(error)))) => error.wrap_err(format!("task `{name}` failed")),
        Some(Err(join_error)) => eyre::Report::new(join_error).wrap_err("a task panicked"),
        None => eyre!("all background tasks are gone"),
    }
}
