pub mod cms;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use self::cms::{Cms, SketchError};

/// Reset periods at or below this are coerced to 0 (no reset worker).
pub const MIN_RESET_PERIOD_MS: u64 = 100;

/// An ordered bank of Count-Min Sketches, one per behavior profile, with a
/// cancellable reset worker per sketch that has a non-zero reset period.
///
/// The sketch vector is fixed at construction; the index is the stable
/// public identifier used by extraction requests. Hot reload replaces the
/// whole bank: the previous bank's workers are cancelled and drained before
/// the new bank spawns its own.
pub struct SketchBank {
    sketches: Vec<Arc<Cms>>,
    /// Reset period per sketch; `Duration::ZERO` means never reset.
    periods: Vec<Duration>,
    cancel: CancellationToken,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SketchBank {
    /// Builds a bank from sketches and their reset periods (milliseconds,
    /// already coerced by config parsing; a second coercion here keeps the
    /// bank safe against direct construction with a sub-threshold period).
    pub fn new(sketches: Vec<Cms>, reset_periods_ms: &[u64]) -> Self {
        let periods = sketches
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let ms = reset_periods_ms.get(i).copied().unwrap_or(0);
                if ms > MIN_RESET_PERIOD_MS {
                    Duration::from_millis(ms)
                } else {
                    Duration::ZERO
                }
            })
            .collect();

        Self {
            sketches: sketches.into_iter().map(Arc::new).collect(),
            periods,
            cancel: CancellationToken::new(),
            workers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sketches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sketches.is_empty()
    }

    /// Bounds-checked sketch access.
    pub fn get(&self, index: usize) -> Option<&Arc<Cms>> {
        self.sketches.get(index)
    }

    /// Spawns one reset worker per sketch with a non-zero period. Must be
    /// called from within a tokio runtime; calling more than once spawns
    /// duplicate workers, so the plugin only calls it on a fresh bank.
    pub fn start(&self) {
        for (i, period) in self.periods.iter().copied().enumerate() {
            if period.is_zero() {
                continue;
            }

            let cms = Arc::clone(&self.sketches[i]);
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // Consume the immediate first tick so the first reset lands
                // one full period after start.
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(sketch = i, "reset worker stopped");
                            return;
                        }
                        _ = ticker.tick() => {
                            cms.reset();
                            debug!(sketch = i, period_ms = period.as_millis() as u64, "sketch counts reset");
                        }
                    }
                }
            });

            self.workers.lock().push(handle);
        }
    }

    /// Signals all reset workers to stop. They observe the cancellation at
    /// their next select point, within one period.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Waits for every reset worker to exit. Call [`shutdown`] first; the
    /// workers observe the cancellation at their next select point.
    ///
    /// [`shutdown`]: SketchBank::shutdown
    pub async fn wait_for_shutdown(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "reset worker join failed");
            }
        }
    }

    /// Number of reset workers currently tracked (drops to 0 once
    /// `wait_for_shutdown` has drained them).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }
}

impl std::fmt::Debug for SketchBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SketchBank")
            .field("sketches", &self.sketches.len())
            .field("periods", &self.periods)
            .finish()
    }
}
