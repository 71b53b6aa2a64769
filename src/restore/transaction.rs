// erpload/src/restore/transaction.rs
//! Staged restore with an atomic swap.
//!
//! The dump is restored into `<target>_<pid>`; only once that succeeded (and
//! the copy was sanitized) is the old target dropped and the staging copy
//! renamed over it. Any failure before the rename drops the staging copy and
//! leaves the target as it was.

use tokio_util::sync::CancellationToken;

use super::sanitize::Sanitizer;
use crate::archive::Payload;
use crate::engine::{CreateOptions, Engine, terminate_connections};
use crate::errors::{AppError, Result};
use crate::utils::naming::staging_name;
use crate::utils::progress::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    StagingCreated,
    Restoring,
    Sanitizing,
    PreSwapCleanup,
    Swapped,
    RollingBack,
    RolledBack,
}

pub struct SwapTransaction<'a> {
    engine: &'a dyn Engine,
    target: String,
    staging: String,
    create_options: CreateOptions,
    sanitizer: Option<&'a Sanitizer>,
    reporter: &'a Reporter,
    cancel: &'a CancellationToken,
    state: SwapState,
    history: Vec<SwapState>,
    target_dropped: bool,
}

impl<'a> SwapTransaction<'a> {
    pub fn new(
        engine: &'a dyn Engine,
        target: &str,
        reporter: &'a Reporter,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            engine,
            target: target.to_string(),
            staging: staging_name(target, std::process::id()),
            create_options: CreateOptions::default(),
            sanitizer: None,
            reporter,
            cancel,
            state: SwapState::Idle,
            history: vec![SwapState::Idle],
            target_dropped: false,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: &'a Sanitizer) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    pub fn with_create_options(mut self, options: CreateOptions) -> Self {
        self.create_options = options;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> SwapState {
        self.state
    }

    #[cfg(test)]
    pub fn history(&self) -> &[SwapState] {
        &self.history
    }

    fn enter(&mut self, state: SwapState) {
        tracing::debug!("{}: {:?} -> {:?}", self.target, self.state, state);
        self.state = state;
        self.history.push(state);
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AppError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Runs the whole transaction. On error the staging database has been
    /// removed before this returns.
    pub async fn run(&mut self, payload: Payload) -> Result<()> {
        self.check_cancel()?;
        self.reporter.say(format!("Creating staging database {}", self.staging));
        self.engine
            .create_database(&self.staging, &self.create_options)
            .await?;
        self.enter(SwapState::StagingCreated);

        match self.restore_and_swap(payload).await {
            Ok(()) => {
                self.reporter.say(format!("✓ {} is now live", self.target));
                Ok(())
            }
            Err(e) => {
                self.roll_back(&e).await;
                Err(e)
            }
        }
    }

    async fn restore_and_swap(&mut self, payload: Payload) -> Result<()> {
        self.check_cancel()?;
        self.enter(SwapState::Restoring);
        self.reporter.say(format!("Restoring {} into {}", payload.name, self.staging));
        self.engine
            .restore_from_dump(&self.staging, payload, self.reporter, self.cancel)
            .await?;

        self.check_cancel()?;
        self.enter(SwapState::Sanitizing);
        if let Some(sanitizer) = self.sanitizer {
            sanitizer
                .run(self.engine, &self.staging, self.reporter, self.cancel)
                .await?;
        }

        self.check_cancel()?;
        // From here on the swap runs to completion even if interrupted.
        self.enter(SwapState::PreSwapCleanup);
        terminate_connections(self.engine, &self.target).await?;
        if self.engine.database_exists(&self.target).await? {
            self.reporter.say(format!("Dropping previous database {}", self.target));
            self.engine.drop_database(&self.target).await?;
            self.target_dropped = true;
        }

        terminate_connections(self.engine, &self.staging).await?;
        self.reporter.say(format!("Renaming {} to {}", self.staging, self.target));
        self.engine.rename_database(&self.staging, &self.target).await?;
        self.enter(SwapState::Swapped);
        Ok(())
    }

    async fn roll_back(&mut self, cause: &AppError) {
        tracing::debug!("{}: rolling back after {:?}", self.target, self.history);
        self.enter(SwapState::RollingBack);
        self.reporter.say(format!("Rolling back {}: {}", self.staging, cause));
        if self.target_dropped {
            tracing::error!(
                "{} was dropped but {} could not be renamed over it",
                self.target,
                self.staging
            );
            self.reporter.say(format!(
                "Warning: {} no longer exists; the restore failed after it was dropped",
                self.target
            ));
        }

        if let Err(e) = terminate_connections(self.engine, &self.staging).await {
            tracing::warn!("could not terminate connections to {}: {}", self.staging, e);
        }
        match self.engine.drop_database(&self.staging).await {
            Ok(()) => self.reporter.say(format!("Dropped staging database {}", self.staging)),
            Err(e) => {
                tracing::error!("could not drop staging database {}: {}", self.staging, e);
                self.reporter.say(format!(
                    "Could not drop staging database {}: {}",
                    self.staging, e
                ));
            }
        }
        self.enter(SwapState::RolledBack);
    }
}
