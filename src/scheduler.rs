//! Periodic trigger for the background processing pass.
//!
//! Explicit start/stop lifecycle, injected job, and a guard that skips a
//! tick while the previous run is still in flight. An interval of zero
//! disables scheduling entirely. The first run waits out a small random
//! startup delay so several instances sharing a catalog do not start
//! hammering it in lockstep.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crate::config::SchedulerConfig;

/// Granularity of the shutdown check while sleeping between ticks.
const POLL_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub in_flight: bool,
    pub interval_secs: u64,
    pub next_run: Option<SystemTime>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    next_run: Arc<Mutex<Option<SystemTime>>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            next_run: Arc::new(Mutex::new(None)),
            handle: None,
        }
    }

    /// Starts the periodic loop. Idempotent while running; a disabled
    /// interval makes this a no-op.
    pub fn start<F>(&mut self, job: F)
    where
        F: Fn() + Send + 'static,
    {
        if self.config.interval_secs == 0 {
            tracing::info!("Scheduler disabled (interval is 0)");
            return;
        }
        if self.handle.is_some() {
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let in_flight = Arc::clone(&self.in_flight);
        let next_run = Arc::clone(&self.next_run);
        let interval = Duration::from_secs(self.config.interval_secs);
        let jitter_bound = self.config.startup_jitter_secs;

        let set_next = move |delay: Duration| {
            let mut guard = next_run.lock().unwrap_or_else(|p| p.into_inner());
            *guard = Some(SystemTime::now() + delay);
        };

        self.handle = Some(std::thread::spawn(move || {
            let jitter = if jitter_bound == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::thread_rng().gen_range(0..jitter_bound * 1000))
            };
            tracing::info!(
                "Scheduler started: every {:?}, first run in {:?}",
                interval,
                jitter
            );
            set_next(jitter);
            if !interruptible_sleep(&running, jitter) {
                return;
            }

            while running.load(Ordering::SeqCst) {
                if in_flight.swap(true, Ordering::SeqCst) {
                    tracing::warn!("Previous processing run still in flight, skipping tick");
                } else {
                    job();
                    in_flight.store(false, Ordering::SeqCst);
                }
                set_next(interval);
                if !interruptible_sleep(&running, interval) {
                    return;
                }
            }
        }));
    }

    /// Signals the loop to stop and waits for it. A run already in flight
    /// finishes; only future ticks are cancelled.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("Scheduler stopped");
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.handle.is_some() && self.running.load(Ordering::SeqCst);
        SchedulerStatus {
            enabled: self.config.interval_secs > 0,
            running,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            interval_secs: self.config.interval_secs,
            next_run: if running {
                *self
                    .next_run
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
            } else {
                None
            },
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleeps in short steps so stop() takes effect promptly. Returns false
/// when the scheduler was stopped during the sleep.
fn interruptible_sleep(running: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(POLL_STEP.min(deadline.saturating_duration_since(Instant::now())));
    }
    running.load(Ordering::SeqCst)
}
