//! Per-target trailing-edge debouncing.
//!
//! Each trigger for a target restarts that target's quiet-period timer;
//! when the timer completes the most recent input is emitted once on the
//! channel returned by [`Debouncer::new`]. Targets are independent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::config::{ConfigHandle, MAX_DEBOUNCE_INTERVAL};

/// A debounced input whose quiet period elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<T> {
    /// Target the input was triggered for.
    pub target: String,
    /// The last input received before the quiet period.
    pub input: T,
}

struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;
type IntervalFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Coalesces rapid triggers per target into a single trailing emission.
///
/// Must be used from within a Tokio runtime. Dropping the debouncer cancels
/// every pending timer.
pub struct Debouncer<T> {
    interval: IntervalFn,
    sink: mpsc::UnboundedSender<Fired<T>>,
    slots: Slots,
    next_generation: AtomicU64,
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Debouncer<T> {
    /// Creates a debouncer whose quiet period is read from `interval` on
    /// every trigger.
    pub fn new(
        interval: impl Fn() -> Duration + Send + Sync + 'static,
    ) -> (Self, mpsc::UnboundedReceiver<Fired<T>>) {
        let (sink, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            interval: Arc::new(interval),
            sink,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        };
        (debouncer, rx)
    }

    /// Creates a debouncer using the configured debounce interval.
    pub fn from_config(config: ConfigHandle) -> (Self, mpsc::UnboundedReceiver<Fired<T>>) {
        Self::new(move || config.snapshot().debounce_interval())
    }

    /// Records `input` for `target` and restarts its timer.
    ///
    /// Any input still waiting for `target` is discarded. Intervals longer
    /// than [`MAX_DEBOUNCE_INTERVAL`] are clamped to it.
    pub fn trigger(&self, target: impl Into<String>, input: T) {
        let target = target.into();
        let interval = (self.interval)().min(MAX_DEBOUNCE_INTERVAL);
        let deadline = tokio::time::Instant::now() + interval;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let slots = Arc::clone(&self.slots);
        let sink = self.sink.clone();
        let fired_target = target.clone();

        let mut guard = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
                match slots.get(&fired_target) {
                    Some(slot) if slot.generation == generation => {
                        slots.remove(&fired_target);
                    }
                    _ => return,
                }
            }
            trace!(target = %fired_target, "debounce interval elapsed");
            if sink
                .send(Fired {
                    target: fired_target,
                    input,
                })
                .is_err()
            {
                trace!("debounce receiver dropped");
            }
        });

        if let Some(previous) = guard.insert(target, Slot { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drops the pending input for `target`. Returns whether one was pending.
    pub fn cancel(&self, target: &str) -> bool {
        let removed = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(target);
        match removed {
            Some(slot) => {
                slot.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `target` has an input waiting to fire.
    pub fn is_pending(&self, target: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(target)
    }
}

impl<T> Debouncer<T> {
    /// Number of targets with a pending input.
    pub fn pending_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for (_, slot) in slots.drain() {
            slot.handle.abort();
        }
    }
}
