//! Stale reader-slot reclamation
//!
//! LMDB tracks every read snapshot in a fixed-size reader table. Slots
//! left behind by crashed processes or abandoned threads stay occupied
//! until cleared, and once the table fills no new reader can start.
//! The reclaimer clears stale slots once at startup and then on a fixed
//! interval for as long as the environment is open.

use heed::Env;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Reclamation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Interval between passes in milliseconds (0 disables periodic passes)
    pub periodic_interval_ms: u64,
    /// Run one pass when the reclaimer is created
    pub run_on_start: bool,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            periodic_interval_ms: crate::config::RECLAIM_INTERVAL_MS,
            run_on_start: true,
        }
    }
}

/// Periodic stale reader-slot reclamation for one environment
pub struct ReaderLockReclaimer {
    config: ReclaimConfig,
    shared: Arc<Shared>,
    task: Mutex<Option<ReclaimTask>>,
}

struct Shared {
    env: Mutex<Option<Env>>,
    passes: AtomicU64,
    reclaimed: AtomicU64,
}

struct ReclaimTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Shared {
    fn reclaim(&self) {
        // Never hold the lock across the engine call
        let env = match self.env.lock().clone() {
            Some(env) => env,
            None => return,
        };

        match env.clear_stale_readers() {
            Ok(cleared) => {
                self.passes.fetch_add(1, Ordering::Relaxed);
                self.reclaimed.fetch_add(cleared as u64, Ordering::Relaxed);
                if cleared > 0 {
                    info!("Reclaimed {} stale reader slots", cleared);
                } else {
                    trace!("No stale reader slots to reclaim");
                }
            }
            Err(e) => warn!("Reader slot reclamation failed: {}", e),
        }
    }
}

impl ReaderLockReclaimer {
    /// Create a reclaimer, running the startup pass and starting the timer
    /// as configured
    pub fn new(env: Env, config: ReclaimConfig) -> Self {
        let reclaimer = Self {
            config,
            shared: Arc::new(Shared {
                env: Mutex::new(Some(env)),
                passes: AtomicU64::new(0),
                reclaimed: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        };

        if reclaimer.config.run_on_start {
            reclaimer.reclaim_once();
        }
        if reclaimer.config.periodic_interval_ms > 0 {
            reclaimer.start();
        }
        reclaimer
    }

    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    /// Run one best-effort pass; failures are logged, never returned
    pub fn reclaim_once(&self) {
        self.shared.reclaim();
    }

    /// Start the periodic timer; no-op if already running
    ///
    /// Needs a current tokio runtime. Each pass runs on the blocking pool;
    /// the task never keeps the runtime alive on its own.
    pub fn start(&self) {
        if self.config.periodic_interval_ms == 0 {
            debug!("Periodic reader slot reclamation disabled");
            return;
        }

        let mut task = self.task.lock();
        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() && !running.cancel.is_cancelled() {
                return;
            }
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime available, periodic reader slot reclamation not started");
                return;
            }
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let period = Duration::from_millis(self.config.periodic_interval_ms);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // The engine call scans the lock file; keep it off the
                        // async workers
                        let pass = Arc::clone(&shared);
                        if let Err(e) = tokio::task::spawn_blocking(move || pass.reclaim()).await {
                            warn!("Reader slot reclamation pass panicked: {}", e);
                        }
                    }
                }
            }
        });

        debug!(
            "Started reader slot reclamation every {}ms",
            self.config.periodic_interval_ms
        );
        *task = Some(ReclaimTask { cancel, handle });
    }

    /// Cancel the periodic timer; no-op if not running
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel.cancel();
            task.handle.abort();
            debug!("Stopped reader slot reclamation");
        }
    }

    /// True while a periodic timer is scheduled
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.handle.is_finished() && !task.cancel.is_cancelled())
    }

    /// Number of completed passes
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::Relaxed)
    }

    /// Total stale slots cleared
    pub fn reclaimed(&self) -> u64 {
        self.shared.reclaimed.load(Ordering::Relaxed)
    }

    /// Stop and release the environment reference
    pub(crate) fn shutdown(&self) {
        self.stop();
        self.shared.env.lock().take();
    }
}

impl Drop for ReaderLockReclaimer {
    fn drop(&mut self) {
        self.stop();
    }
}
