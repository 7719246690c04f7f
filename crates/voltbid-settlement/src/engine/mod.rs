//! The engine owns the settlement core's background tasks (status updater,
//! release-funds worker, dead-letter drain) and drives them through a small
//! run-state machine: `Starting` wires the components together and spawns
//! the tasks, `Running` supervises them until shutdown or an unexpected
//! task exit.

use tokio_util::sync::CancellationToken;
use voltbid_eyre::eyre::{
    self,
    WrapErr as _,
};

use crate::{
    Collaborators,
    Config,
    Handle,
    Metrics,
};

mod running;
mod starting;

use running::Running;
use starting::Starting;

pub(crate) struct Inner {
    run_state: RunState,
}

impl Inner {
    /// Creates the engine from a [`Config`] and the external collaborators,
    /// returning it together with the [`Handle`] exposing the core's
    /// operations.
    pub(crate) fn new(
        cfg: Config,
        collaborators: Collaborators,
        metrics: &'static Metrics,
        shutdown_token: CancellationToken,
    ) -> eyre::Result<(Self, Handle)> {
        let (run_state, handle) = starting::run_state(cfg, collaborators, shutdown_token, metrics)
            .wrap_err("failed initializing in starting state")?;
        Ok((
            Self {
                run_state,
            },
            handle,
        ))
    }

    /// Runs the engine until it receives an exit signal, or one of the
    /// constituent tasks either ends unexpectedly or returns an error.
    pub(crate) async fn run(self) -> eyre::Result<()> {
        let Self {
            mut run_state,
        } = self;

        loop {
            match run_state {
                RunState::Cancelled => break Ok(()),
                RunState::Starting(starting) => match starting.run().await {
                    Ok(new_state) => run_state = new_state,
                    Err(err) => break Err(err).wrap_err("failed during startup"),
                },
                RunState::Running(running) => match running.run().await {
                    Ok(new_state) => run_state = new_state,
                    Err(err) => break Err(err).wrap_err("failed during execution"),
                },
            }
        }
    }
}

enum RunState {
    Cancelled,
    Starting(Starting),
    Running(Running),
}

impl From<Running> for RunState {
    fn from(value: Running) -> Self {
        Self::Running(value)
    }
}

impl From<Starting> for RunState {
    fn from(value: Starting) -> Self {
        Self::Starting(value)
    }
}
