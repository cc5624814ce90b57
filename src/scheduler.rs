use crate::prelude::*;

use crate::error::panic_message;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work the scheduler fires once per interval.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self);
}

pub struct Scheduler {
    interval: Duration,
    check_interval: Duration,
    run_on_start: bool,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval: config.interval(),
            check_interval: config.check_interval(),
            run_on_start: config.run_on_start(),
            clock,
        }
    }

    /// Polls the clock every `check_interval` and runs `job` whenever a full
    /// interval has passed since the previous run started. The job is awaited
    /// before the next check, so runs never overlap, and windows missed while
    /// a run overran are dropped rather than queued.
    ///
    /// Returns once `shutdown` fires; an in-flight run is abandoned at that
    /// point.
    pub async fn start(&self, job: &dyn Job, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            "scheduler running every {:?} (checking every {:?})",
            self.interval, self.check_interval
        );

        let mut last_start = if self.run_on_start {
            None
        } else {
            Some(self.clock.now())
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = self.tick(job, &mut last_start) => {}
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    async fn tick(&self, job: &dyn Job, last_start: &mut Option<Instant>) {
        let now = self.clock.now();
        if self.is_due(*last_start, now) {
            *last_start = Some(now);

            if let Err(panic) = AssertUnwindSafe(job.run()).catch_unwind().await {
                error!("scheduled job faulted: {}", panic_message(panic.as_ref()));
            }
        }

        self.clock.sleep(self.check_interval).await;
    }

    fn is_due(&self, last_start: Option<Instant>, now: Instant) -> bool {
        match last_start {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }
}
