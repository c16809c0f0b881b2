//! GPU completion fence built on an event query.
//!
//! The fence is an explicit `Idle -> Pending -> Signaled` state machine.
//! [`CompletionFence::wait`] polls the query and yields the calling thread
//! between polls instead of sleeping, so the added latency is whatever the
//! GPU actually takes. A [`PollBudget`] bounds the loop so a lost device (or a
//! test double that never signals) cannot spin forever.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::backend::GpuBackend;

/// Where the fence is in its per-frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    /// Nothing submitted since creation or since the last signal was observed
    /// and consumed.
    Idle,
    /// Query ended and flushed, GPU has not reported completion yet.
    Pending,
    /// GPU reported completion of everything submitted before the query.
    Signaled,
}

/// Upper bound on a fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub max_polls: Option<u64>,
    pub timeout: Option<Duration>,
}

impl PollBudget {
    /// Poll until signaled, however long it takes.
    pub const fn unbounded() -> Self {
        Self {
            max_polls: None,
            timeout: None,
        }
    }

    /// At most `n` polls.
    pub const fn polls(n: u64) -> Self {
        Self {
            max_polls: Some(n),
            timeout: None,
        }
    }

    /// Give up after `timeout` of wall-clock time.
    pub const fn timeout(timeout: Duration) -> Self {
        Self {
            max_polls: None,
            timeout: Some(timeout),
        }
    }

    fn exhausted(&self, polls: u64, start: Instant) -> bool {
        self.max_polls.is_some_and(|max| polls >= max)
            || self.timeout.is_some_and(|t| start.elapsed() >= t)
    }
}

impl Default for PollBudget {
    /// Half a second: far beyond any real copy, short enough that a removed
    /// device doesn't hang the render thread.
    fn default() -> Self {
        Self::timeout(Duration::from_millis(500))
    }
}

/// Result of [`CompletionFence::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled { polls: u64 },
    Exhausted { polls: u64 },
}

impl WaitOutcome {
    pub fn is_signaled(&self) -> bool {
        matches!(self, Self::Signaled { .. })
    }
}

/// Reusable completion fence scoped to one device.
pub struct CompletionFence<B: GpuBackend> {
    query: Option<B::Query>,
    /// Device the query was created on. A different device means a new query.
    device: Option<B::Device>,
    state: FenceState,
    /// Creation already failed for `device`; don't retry every frame.
    creation_failed: bool,
}

impl<B: GpuBackend> Default for CompletionFence<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> CompletionFence<B> {
    /// An empty fence. No query is created until [`Self::ensure`].
    pub fn new() -> Self {
        Self {
            query: None,
            device: None,
            state: FenceState::Idle,
            creation_failed: false,
        }
    }

    /// Make sure a query exists for `device`, creating it on first use.
    ///
    /// Creation is attempted once per device. After a failure every call
    /// returns an error until the device changes or [`Self::release`] runs.
    pub fn ensure(&mut self, backend: &B, device: &B::Device) -> Result<()> {
        let same_device = self
            .device
            .as_ref()
            .is_some_and(|d| backend.same_device(d, device));

        if same_device {
            if self.query.is_some() {
                return Ok(());
            }
            if self.creation_failed {
                return Err(anyhow!("event query unavailable on this device"));
            }
        }

        self.release();
        self.device = Some(device.clone());
        match backend.create_event_query(device) {
            Ok(query) => {
                debug!("Completion fence created");
                self.query = Some(query);
                Ok(())
            }
            Err(e) => {
                self.creation_failed = true;
                Err(e.context("failed to create event query"))
            }
        }
    }

    pub fn is_created(&self) -> bool {
        self.query.is_some()
    }

    /// Whether creation was attempted and failed for the current device.
    pub fn creation_failed(&self) -> bool {
        self.creation_failed
    }

    pub fn state(&self) -> FenceState {
        self.state
    }

    /// End the query after already-recorded work and flush so the GPU
    /// actually sees both.
    pub fn signal(&mut self, backend: &B, context: &B::Context) -> Result<()> {
        let query = self
            .query
            .as_ref()
            .ok_or_else(|| anyhow!("fence signaled before creation"))?;
        backend.end_query(context, query);
        backend.flush(context);
        self.state = FenceState::Pending;
        Ok(())
    }

    /// One non-blocking check.
    pub fn poll(&mut self, backend: &B, context: &B::Context) -> Result<FenceState> {
        if self.state != FenceState::Pending {
            return Ok(self.state);
        }
        let query = self
            .query
            .as_ref()
            .ok_or_else(|| anyhow!("fence polled before creation"))?;
        if backend.query_signaled(context, query)? {
            self.state = FenceState::Signaled;
        }
        Ok(self.state)
    }

    /// Poll until signaled or `budget` runs out, yielding between polls.
    ///
    /// A signaled wait consumes the signal and leaves the fence `Idle`. An
    /// exhausted wait leaves it `Pending`; the next [`Self::signal`] re-arms it.
    pub fn wait(
        &mut self,
        backend: &B,
        context: &B::Context,
        budget: PollBudget,
    ) -> Result<WaitOutcome> {
        if self.state == FenceState::Idle {
            return Ok(WaitOutcome::Signaled { polls: 0 });
        }

        let start = Instant::now();
        let mut polls = 0u64;
        loop {
            polls += 1;
            if self.poll(backend, context)? == FenceState::Signaled {
                self.state = FenceState::Idle;
                return Ok(WaitOutcome::Signaled { polls });
            }
            if budget.exhausted(polls, start) {
                warn!(
                    "Completion fence not signaled after {} polls ({:?})",
                    polls,
                    start.elapsed()
                );
                return Ok(WaitOutcome::Exhausted { polls });
            }
            std::thread::yield_now();
        }
    }

    /// Drop the query and forget the device.
    pub fn release(&mut self) {
        self.query = None;
        self.device = None;
        self.state = FenceState::Idle;
        self.creation_failed = false;
    }
}
