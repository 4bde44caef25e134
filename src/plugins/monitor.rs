//! Scheduler liveness monitor
//!
//! Runs on its own OS thread, apart from the cooperative scheduler that
//! executes all host and plugin logic. Every check interval it submits a
//! trivial task through the runtime handle and waits up to the block
//! threshold for it to come back. A late round trip means the scheduler is
//! stuck; the monitor reports what it was executing and suppresses repeats
//! while the same activity stays on the CPU. Purely diagnostic; it never
//! intervenes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use crate::application::messaging::{ActivitySnapshot, ActivityTracker};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_BLOCK_THRESHOLD: Duration = Duration::from_secs(1);

/// Counters for observing monitor behavior
#[derive(Debug, Default)]
pub struct MonitorStats {
    blocked_reports: AtomicU64,
    recovered_reports: AtomicU64,
}

impl MonitorStats {
    pub fn blocked_reports(&self) -> u64 {
        self.blocked_reports.load(Ordering::SeqCst)
    }

    pub fn recovered_reports(&self) -> u64 {
        self.recovered_reports.load(Ordering::SeqCst)
    }
}

/// Watchdog thread detecting scheduler unresponsiveness
pub struct StackMonitor {
    handle: tokio::runtime::Handle,
    activity: ActivityTracker,
    check_interval: Duration,
    block_threshold: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<MonitorStats>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StackMonitor {
    pub fn new(handle: tokio::runtime::Handle, activity: ActivityTracker) -> Self {
        Self::with_timing(handle, activity, DEFAULT_CHECK_INTERVAL, DEFAULT_BLOCK_THRESHOLD)
    }

    pub fn with_timing(
        handle: tokio::runtime::Handle,
        activity: ActivityTracker,
        check_interval: Duration,
        block_threshold: Duration,
    ) -> Self {
        Self {
            handle,
            activity,
            check_interval,
            block_threshold,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(MonitorStats::default()),
            thread: None,
        }
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        self.stats.clone()
    }

    /// Spawn the watchdog thread. Idempotent.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let handle = self.handle.clone();
        let activity = self.activity.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();
        let check_interval = self.check_interval;
        let block_threshold = self.block_threshold;

        self.thread = Some(
            std::thread::Builder::new()
                .name("strix-loop-monitor".to_string())
                .spawn(move || {
                    let mut probe = Probe::new(handle, activity, block_threshold, stats, running.clone());
                    while running.load(Ordering::SeqCst) {
                        probe.run_once();
                        std::thread::sleep(check_interval);
                    }
                })
                .expect("failed to spawn monitor thread"),
        );
    }

    /// Stop the watchdog and join its thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StackMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Probe {
    handle: tokio::runtime::Handle,
    activity: ActivityTracker,
    block_threshold: Duration,
    stats: Arc<MonitorStats>,
    running: Arc<AtomicBool>,
    last_snapshot: Option<ActivitySnapshot>,
    blocked: bool,
}

impl Probe {
    fn new(
        handle: tokio::runtime::Handle,
        activity: ActivityTracker,
        block_threshold: Duration,
        stats: Arc<MonitorStats>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            handle,
            activity,
            block_threshold,
            stats,
            running,
            last_snapshot: None,
            blocked: false,
        }
    }

    /// Submit a no-op through the scheduler's threadsafe entry point and
    /// wait for the round trip.
    fn run_once(&mut self) {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.handle.spawn(async move {
            let _ = tx.send(());
        });

        let outcome = rx.recv_timeout(self.block_threshold);
        if !self.running.load(Ordering::SeqCst) {
            // Shutting down; a probe stranded by the stopping runtime is
            // not a diagnosis.
            return;
        }
        match outcome {
            Ok(()) => self.on_healthy(),
            Err(RecvTimeoutError::Timeout) => self.on_blocked(),
            // Runtime shut down underneath us; nothing to report.
            Err(RecvTimeoutError::Disconnected) => {}
        }
    }

    fn on_healthy(&mut self) {
        if self.blocked {
            tracing::warn!("No longer blocked");
            self.stats.recovered_reports.fetch_add(1, Ordering::SeqCst);
            self.blocked = false;
        }
        self.last_snapshot = None;
    }

    fn on_blocked(&mut self) {
        self.stats.blocked_reports.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.activity.snapshot();

        // The same activity still on the CPU: suppress the redundant full
        // report.
        if self.blocked && snapshot == self.last_snapshot {
            tracing::warn!("Still blocked...");
            return;
        }
        self.blocked = true;

        match &snapshot {
            Some(activity) => tracing::warn!(
                "Probe took longer than {:?} to return; scheduler is executing {}",
                self.block_threshold,
                activity.label
            ),
            None => tracing::warn!(
                "Probe took longer than {:?} to return; no listener activity recorded",
                self.block_threshold
            ),
        }
        self.last_snapshot = snapshot;
    }
}
