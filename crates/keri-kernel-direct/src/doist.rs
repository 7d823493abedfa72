//! Cooperative tick scheduler.
//!
//! A [`Doist`] advances a logical clock by `tock` per tick and, on every
//! tick, gives each live [`Doer`] one turn. Doers are explicit state objects:
//! each turn does a bounded amount of work and returns. Stopping a doer is
//! just not calling it again. A doer whose turn fails is logged and retired;
//! the others keep running.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::Result;

/// What a doer wants after its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

/// A resumable unit of work.
pub trait Doer {
    /// Take one turn at logical tick `tick`.
    fn tick(&mut self, tick: u64) -> Result<Step>;
}

/// Summary of one scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoistReport {
    /// Ticks executed.
    pub ticks: u64,
    /// Whether every doer finished before the limit.
    pub all_done: bool,
    /// Doers retired because their turn returned an error.
    pub failed: usize,
}

/// Runs doers on a fixed logical tick.
#[derive(Debug, Clone)]
pub struct Doist {
    tock: Duration,
    limit: Duration,
    tick: u64,
    failed: usize,
}

impl Doist {
    /// `tock` is the logical time per tick; `limit` bounds the total.
    pub fn new(tock: Duration, limit: Duration) -> Self {
        Self {
            tock,
            limit,
            tick: 0,
            failed: 0,
        }
    }

    pub fn tock(&self) -> Duration {
        self.tock
    }

    /// Current logical tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Logical time elapsed.
    pub fn tyme(&self) -> Duration {
        self.tock.saturating_mul(u32::try_from(self.tick).unwrap_or(u32::MAX))
    }

    /// Ticks that fit in `limit`, at least one.
    pub fn max_ticks(&self) -> u64 {
        if self.tock.is_zero() {
            return 1;
        }
        let ticks = self.limit.as_nanos() / self.tock.as_nanos();
        u64::try_from(ticks).unwrap_or(u64::MAX).max(1)
    }

    /// Run to completion or the limit on the logical clock alone.
    pub fn run(&mut self, doers: &mut [&mut dyn Doer]) -> Result<DoistReport> {
        let mut done = vec![false; doers.len()];
        let start = self.tick;
        self.failed = 0;
        while self.tick - start < self.max_ticks() {
            if self.turn(doers, &mut done) {
                break;
            }
        }
        Ok(self.report(start, &done))
    }

    /// Like [`Doist::run`], but paces ticks with a tokio interval of `tock`.
    pub async fn run_realtime(&mut self, doers: &mut [&mut dyn Doer]) -> Result<DoistReport> {
        let mut done = vec![false; doers.len()];
        let start = self.tick;
        self.failed = 0;
        let mut interval = tokio::time::interval(self.tock.max(Duration::from_millis(1)));
        while self.tick - start < self.max_ticks() {
            interval.tick().await;
            if self.turn(doers, &mut done) {
                break;
            }
        }
        Ok(self.report(start, &done))
    }

    /// One tick over every live doer. Returns true once all are done.
    fn turn(&mut self, doers: &mut [&mut dyn Doer], done: &mut [bool]) -> bool {
        trace!(tick = self.tick, "tick");
        for (index, (doer, finished)) in doers.iter_mut().zip(done.iter_mut()).enumerate() {
            if *finished {
                continue;
            }
            match doer.tick(self.tick) {
                Ok(Step::Continue) => {}
                Ok(Step::Done) => *finished = true,
                Err(error) => {
                    warn!(tick = self.tick, doer = index, %error, "doer failed, retiring it");
                    self.failed += 1;
                    *finished = true;
                }
            }
        }
        self.tick += 1;
        done.iter().all(|d| *d)
    }

    fn report(&self, start: u64, done: &[bool]) -> DoistReport {
        let report = DoistReport {
            ticks: self.tick - start,
            all_done: done.iter().all(|d| *d),
            failed: self.failed,
        };
        debug!(
            ticks = report.ticks,
            all_done = report.all_done,
            failed = report.failed,
            "doist finished"
        );
        report
    }
}
