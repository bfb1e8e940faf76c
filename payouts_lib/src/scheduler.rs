// Copyright (C) 2024-2026 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

//! Drives payment cycles for one coin.
//!
//! The next cycle is armed only once the previous one has finished, so at
//! most one cycle per coin is ever in flight. A halted cycle stops the
//! scheduler for good; the process has to be restarted after an audit.

use crate::payments::{CycleOutcome, PaymentProcessor};
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Terminal, a cycle reported that funds may have moved unrecorded
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    AlreadyRunning,
    Halted,
}

impl Error for SchedulerError {}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::AlreadyRunning => write!(f, "A payment cycle is already running"),
            SchedulerError::Halted => write!(f, "Payment processing is halted"),
        }
    }
}

/// One unit of scheduled work.
#[async_trait]
pub trait PaymentCycle: Send + Sync {
    fn name(&self) -> &str;

    async fn run_cycle(&self) -> CycleOutcome;
}

#[async_trait]
impl PaymentCycle for PaymentProcessor {
    fn name(&self) -> &str {
        &self.settings().coin
    }

    async fn run_cycle(&self) -> CycleOutcome {
        PaymentProcessor::run_cycle(self).await
    }
}

pub struct CycleScheduler<C> {
    cycle: Arc<C>,
    interval: Duration,
    state: watch::Sender<SchedulerState>,
}

impl<C: PaymentCycle> CycleScheduler<C> {
    pub fn new(cycle: Arc<C>, interval: Duration) -> Self {
        Self {
            cycle,
            interval,
            state: watch::Sender::new(SchedulerState::Idle),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch state transitions, e.g. to stop the process when a coin halts.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn begin(&self) -> Result<(), SchedulerError> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| match *state {
            SchedulerState::Idle => {
                *state = SchedulerState::Running;
                true
            }
            SchedulerState::Running => {
                result = Err(SchedulerError::AlreadyRunning);
                false
            }
            SchedulerState::Halted => {
                result = Err(SchedulerError::Halted);
                false
            }
        });
        result
    }

    fn finish(&self, outcome: &CycleOutcome) {
        let next = match outcome {
            CycleOutcome::Halted(_) => SchedulerState::Halted,
            CycleOutcome::Completed(_) | CycleOutcome::Aborted(_) => SchedulerState::Idle,
        };
        self.state.send_replace(next);
    }

    /// Run a single cycle to completion.
    pub async fn run_once(&self) -> Result<CycleOutcome, SchedulerError> {
        self.begin()?;
        let outcome = self.cycle.run_cycle().await;
        self.finish(&outcome);
        Ok(outcome)
    }

    /// Run cycles until shutdown is signalled or a cycle halts.
    ///
    /// Shutdown is only observed between cycles. A cycle that has started
    /// always runs to completion. Returns the final state.
    pub async fn run<T>(&self, mut shutdown: watch::Receiver<T>) -> SchedulerState {
        let name = self.cycle.name().to_string();
        info!(
            "{}: payment processing every {}s",
            name,
            self.interval.as_secs()
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("{}: payment scheduler stopping", name);
                    break;
                }
            }
            match self.run_once().await {
                Ok(CycleOutcome::Halted(e)) => {
                    error!("{}: payment scheduler halted: {}", name, e);
                    break;
                }
                Ok(_) => {}
                Err(SchedulerError::Halted) => break,
                Err(e) => warn!("{}: skipping cycle: {}", name, e),
            }
        }
        self.state()
    }
}
