//! Fixed-period cycle scheduling with cooperative shutdown.
//!
//! Cycles run one at a time. Start times follow a fixed grid
//! (`first_start + n * interval`) so a slow cycle does not push later ones
//! back; grid slots that pass while a cycle is still running are skipped.
//! The shutdown flag is polled during sleeps and before each cycle, never
//! in the middle of one.

use crate::config::ScheduleConfig;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What the scheduler should do after a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleControl {
    Continue,
    /// Stop the process with this reason
    Halt(String),
}

/// Work executed once per scheduled cycle.
#[async_trait]
pub trait CycleJob: Send {
    async fn run_once(&mut self, cycle: u64) -> Result<CycleControl>;
}

/// Drives a [`CycleJob`] on a fixed period.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    error_backoff: Duration,
    poll: Duration,
    max_cycles: Option<u64>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: &ScheduleConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self::with_durations(
            Duration::from_secs(config.scan_interval_secs),
            Duration::from_secs(config.error_backoff_secs),
            Duration::from_millis(config.shutdown_poll_ms),
            shutdown,
        )
    }

    pub fn with_durations(
        interval: Duration,
        error_backoff: Duration,
        poll: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let min = Duration::from_millis(1);
        Self {
            interval: interval.max(min),
            error_backoff,
            poll: poll.max(min),
            max_cycles: None,
            shutdown,
        }
    }

    /// Stop after `cycles` cycles (used for single-shot runs).
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until shutdown, the cycle limit, or a halt.
    ///
    /// Returns the number of cycles started. A halt is returned as `Err`.
    pub async fn run<J: CycleJob + ?Sized>(&self, job: &mut J) -> Result<u64> {
        let mut cycle = 0u64;
        let mut next_start = Instant::now();

        while !self.shutdown_requested() {
            if self.max_cycles.is_some_and(|max| cycle >= max) {
                break;
            }

            cycle += 1;
            let started = Instant::now();

            let deadline = match job.run_once(cycle).await {
                Ok(CycleControl::Continue) => {
                    debug!(
                        cycle,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Cycle finished"
                    );
                    self.next_slot(next_start, Instant::now())
                }
                Ok(CycleControl::Halt(reason)) => {
                    error!(cycle, %reason, "Cycle requested halt");
                    bail!("halted after cycle {cycle}: {reason}");
                }
                Err(e) => {
                    error!(
                        cycle,
                        error = %format!("{e:#}"),
                        backoff_secs = self.error_backoff.as_secs(),
                        "Cycle failed, backing off"
                    );
                    Instant::now() + self.error_backoff
                }
            };
            next_start = deadline;

            if self.max_cycles.is_some_and(|max| cycle >= max) {
                break;
            }
            if !self.sleep_until(next_start).await {
                break;
            }
        }

        if self.shutdown_requested() {
            info!(cycles = cycle, "Shutdown requested, scheduler stopped");
        }
        Ok(cycle)
    }

    /// Next grid slot strictly after `now`.
    fn next_slot(&self, previous: Instant, now: Instant) -> Instant {
        let mut next = previous + self.interval;
        if next > now {
            return next;
        }

        let behind = now.duration_since(next);
        let missed = (behind.as_nanos() / self.interval.as_nanos()) as u32 + 1;
        next += self.interval * missed;
        warn!(missed, "Cycle overran its interval, skipping missed slots");
        next
    }

    /// Sleep in short chunks. Returns false if shutdown was requested.
    async fn sleep_until(&self, deadline: Instant) -> bool {
        loop {
            if self.shutdown_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(self.poll)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct CountingJob {
        runs: Vec<u64>,
        fail_on: Option<u64>,
        halt_on: Option<u64>,
        shutdown_on: Option<(u64, Arc<AtomicBool>)>,
    }

    impl CountingJob {
        fn new() -> Self {
            Self {
                runs: Vec::new(),
                fail_on: None,
                halt_on: None,
                shutdown_on: None,
            }
        }
    }

    #[async_trait]
    impl CycleJob for CountingJob {
        async fn run_once(&mut self, cycle: u64) -> Result<CycleControl> {
            self.runs.push(cycle);
            if let Some((at, flag)) = &self.shutdown_on {
                if *at == cycle {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            if self.fail_on == Some(cycle) {
                return Err(anyhow!("price fetch failed"));
            }
            if self.halt_on == Some(cycle) {
                return Ok(CycleControl::Halt("hard stop streak".into()));
            }
            Ok(CycleControl::Continue)
        }
    }

    fn scheduler(shutdown: Arc<AtomicBool>) -> Scheduler {
        Scheduler::with_durations(
            Duration::from_millis(5),
            Duration::from_millis(5),
            Duration::from_millis(1),
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_runs_until_cycle_limit() {
        let mut job = CountingJob::new();
        let cycles = scheduler(Arc::new(AtomicBool::new(false)))
            .with_max_cycles(3)
            .run(&mut job)
            .await
            .unwrap();

        assert_eq!(cycles, 3);
        assert_eq!(job.runs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_error_backs_off_and_continues() {
        let mut job = CountingJob::new();
        job.fail_on = Some(1);

        let cycles = scheduler(Arc::new(AtomicBool::new(false)))
            .with_max_cycles(2)
            .run(&mut job)
            .await
            .unwrap();

        assert_eq!(cycles, 2);
    }

    #[tokio::test]
    async fn test_halt_stops_with_error() {
        let mut job = CountingJob::new();
        job.halt_on = Some(2);

        let result = scheduler(Arc::new(AtomicBool::new(false)))
            .with_max_cycles(10)
            .run(&mut job)
            .await;

        assert!(result.unwrap_err().to_string().contains("hard stop streak"));
        assert_eq!(job.runs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_runs_nothing() {
        let mut job = CountingJob::new();
        let cycles = scheduler(Arc::new(AtomicBool::new(true)))
            .run(&mut job)
            .await
            .unwrap();

        assert_eq!(cycles, 0);
        assert!(job.runs.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_cycle_completes_before_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut job = CountingJob::new();
        job.shutdown_on = Some((2, shutdown.clone()));

        let cycles = scheduler(shutdown).run(&mut job).await.unwrap();
        assert_eq!(cycles, 2);
        assert_eq!(job.runs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown_observed_during_long_sleep() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let scheduler = Scheduler::with_durations(
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            Duration::from_millis(5),
            shutdown.clone(),
        );

        let flag = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let mut job = CountingJob::new();
        let result =
            tokio::time::timeout(Duration::from_secs(5), scheduler.run(&mut job)).await;

        assert_eq!(result.unwrap().unwrap(), 1);
    }

    #[test]
    fn test_next_slot_skips_missed_intervals() {
        let scheduler = Scheduler::with_durations(
            Duration::from_secs(10),
            Duration::from_secs(1),
            Duration::from_millis(100),
            Arc::new(AtomicBool::new(false)),
        );
        let start = Instant::now();

        // On time: next grid slot
        assert_eq!(
            scheduler.next_slot(start, start + Duration::from_secs(3)),
            start + Duration::from_secs(10)
        );
        // Overran by 25s: slots at 10s and 20s are skipped
        assert_eq!(
            scheduler.next_slot(start, start + Duration::from_secs(25)),
            start + Duration::from_secs(30)
        );
    }
}
