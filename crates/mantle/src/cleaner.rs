//! Background maintenance for a mantle.
//!
//! Every engine runs two loops, one trimming and one unloading. Each loop
//! splits the process-wide plate limit by the number of active engines and
//! sleeps `TARGET_CYCLE / engines` minus the time its pass took, so the whole
//! process converges toward one pass per engine per second.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use strata_core::panic_message;
use tracing::{debug, info, warn};

use crate::{EngineRegistry, Mantle, MantleError};

/// Period each engine's loops aim for when passes cost nothing.
pub const TARGET_CYCLE: Duration = Duration::from_millis(1000);

/// Budget handed to one pass: the engine's share of `limit`, at least 1.
pub fn pass_budget(limit: usize, engines: usize) -> usize {
    (limit / engines.max(1)).max(1)
}

/// Sleep after a pass that took `elapsed`: `TARGET_CYCLE / engines - elapsed`,
/// floored at zero.
pub fn pass_delay(engines: usize, elapsed: Duration) -> Duration {
    let share = TARGET_CYCLE / engines.max(1).min(u32::MAX as usize) as u32;
    share.saturating_sub(elapsed)
}

/// Anything a cleaner can keep within budget.
pub trait Maintainable: Send + Sync {
    /// Compact up to `budget` entries; returns work done.
    fn trim(&self, budget: usize) -> Result<usize, MantleError>;
    /// Evict down to `budget` entries; returns entries removed.
    fn unload(&self, budget: usize) -> Result<usize, MantleError>;
}

impl Maintainable for Mantle {
    fn trim(&self, budget: usize) -> Result<usize, MantleError> {
        Ok(Mantle::trim(self, budget))
    }

    fn unload(&self, budget: usize) -> Result<usize, MantleError> {
        Mantle::unload(self, budget)
    }
}

/// Lifecycle of one maintenance loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No thread running.
    Stopped,
    /// Thread is performing passes.
    Running,
    /// Termination was requested; the thread has not finished yet.
    AwaitingExit,
}

/// How a cleaner is named and sized.
#[derive(Debug, Clone)]
pub struct CleanerSettings {
    /// Prefix for the loop thread names.
    pub name: String,
    /// Process-wide plate limit shared by all engines.
    pub limit: usize,
    /// Preview mode; loops stay off unless `trim_in_studio` is set.
    pub studio: bool,
    /// Run maintenance even in studio mode.
    pub trim_in_studio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Trim,
    Unload,
}

impl Pass {
    fn name(self) -> &'static str {
        match self {
            Pass::Trim => "trim",
            Pass::Unload => "unload",
        }
    }

    fn run(self, target: &dyn Maintainable, budget: usize) -> Result<usize, MantleError> {
        match self {
            Pass::Trim => target.trim(budget),
            Pass::Unload => target.unload(budget),
        }
    }
}

/// Wakeable stop flag.
#[derive(Default)]
struct StopSignal {
    raised: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.raised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn raise(&self) {
        *self.lock() = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        *self.lock() = false;
    }

    fn is_raised(&self) -> bool {
        *self.lock()
    }

    /// Sleep up to `timeout`; returns true if the signal was raised.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

struct LoopSlot {
    pass: Pass,
    state: Arc<Mutex<LoopState>>,
    handle: Option<JoinHandle<()>>,
}

impl LoopSlot {
    fn new(pass: Pass) -> Self {
        Self {
            pass,
            state: Arc::new(Mutex::new(LoopState::Stopped)),
            handle: None,
        }
    }

    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

fn set_state(state: &Mutex<LoopState>, value: LoopState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Move `state` from `from` to `to`; any other current state is kept.
fn transition(state: &Mutex<LoopState>, from: LoopState, to: LoopState) -> bool {
    let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
    if *current != from {
        return false;
    }
    *current = to;
    true
}

/// Owns the trim and unload loops of one engine.
pub struct MantleCleaner {
    target: Arc<dyn Maintainable>,
    closed: Arc<AtomicBool>,
    registry: EngineRegistry,
    settings: CleanerSettings,
    stop: Arc<StopSignal>,
    loops: Mutex<[LoopSlot; 2]>,
}

impl MantleCleaner {
    /// Create a stopped cleaner. `closed` is the owning engine's closed flag.
    pub fn new(
        target: Arc<dyn Maintainable>,
        closed: Arc<AtomicBool>,
        registry: EngineRegistry,
        settings: CleanerSettings,
    ) -> Self {
        Self {
            target,
            closed,
            registry,
            settings,
            stop: Arc::new(StopSignal::default()),
            loops: Mutex::new([LoopSlot::new(Pass::Trim), LoopSlot::new(Pass::Unload)]),
        }
    }

    /// Start any loop that is not already running. Returns the number started.
    pub fn enable(&self) -> usize {
        if self.settings.studio && !self.settings.trim_in_studio {
            info!(cleaner = %self.settings.name, "Mantle maintenance disabled in studio mode");
            return 0;
        }

        let mut loops = self.lock_loops();
        // Reap loops that were told to stop before clearing the signal they
        // are still waking up on.
        for slot in loops.iter_mut() {
            let running = slot.is_alive()
                && *slot.state.lock().unwrap_or_else(PoisonError::into_inner) == LoopState::Running;
            if running {
                continue;
            }
            if let Some(handle) = slot.handle.take() {
                if handle.join().is_err() {
                    warn!(cleaner = %self.settings.name, pass = slot.pass.name(), "Maintenance loop had panicked");
                }
            }
        }

        self.stop.reset();
        let mut started = 0;
        for slot in loops.iter_mut() {
            if slot.handle.is_some() {
                continue;
            }

            set_state(&slot.state, LoopState::Running);
            let worker = LoopWorker {
                pass: slot.pass,
                target: Arc::clone(&self.target),
                closed: Arc::clone(&self.closed),
                registry: self.registry.clone(),
                limit: self.settings.limit,
                stop: Arc::clone(&self.stop),
                state: Arc::clone(&slot.state),
            };
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.settings.name, slot.pass.name()))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => {
                    slot.handle = Some(handle);
                    started += 1;
                }
                Err(err) => {
                    set_state(&slot.state, LoopState::Stopped);
                    warn!(cleaner = %self.settings.name, pass = slot.pass.name(), %err, "Failed to spawn maintenance loop");
                }
            }
        }
        started
    }

    /// Ask both loops to stop.
    ///
    /// The regular path blocks until both threads exited. A hotload only wakes
    /// the loops and returns; they finish on their own.
    pub fn disable(&self, hotload: bool) {
        self.stop.raise();
        let handles: Vec<(Pass, Arc<Mutex<LoopState>>, JoinHandle<()>)> = {
            let mut loops = self.lock_loops();
            for slot in loops.iter() {
                transition(&slot.state, LoopState::Running, LoopState::AwaitingExit);
            }
            if hotload {
                return;
            }
            loops
                .iter_mut()
                .filter_map(|slot| {
                    let handle = slot.handle.take()?;
                    Some((slot.pass, Arc::clone(&slot.state), handle))
                })
                .collect()
        };

        for (pass, state, handle) in handles {
            if handle.join().is_err() {
                warn!(cleaner = %self.settings.name, pass = pass.name(), "Maintenance loop panicked");
            }
            set_state(&state, LoopState::Stopped);
        }
        info!(cleaner = %self.settings.name, "Mantle maintenance stopped");
    }

    /// Current state of the trim and unload loops.
    pub fn states(&self) -> (LoopState, LoopState) {
        let loops = self.lock_loops();
        let read = |slot: &LoopSlot| *slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        (read(&loops[0]), read(&loops[1]))
    }

    fn lock_loops(&self) -> MutexGuard<'_, [LoopSlot; 2]> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MantleCleaner {
    fn drop(&mut self) {
        self.disable(false);
    }
}

struct LoopWorker {
    pass: Pass,
    target: Arc<dyn Maintainable>,
    closed: Arc<AtomicBool>,
    registry: EngineRegistry,
    limit: usize,
    stop: Arc<StopSignal>,
    state: Arc<Mutex<LoopState>>,
}

impl LoopWorker {
    fn run(self) {
        let pass = self.pass.name();
        info!(pass, limit = self.limit, "Mantle maintenance loop started");
        loop {
            if self.closed.load(Ordering::Acquire) || self.stop.is_raised() {
                break;
            }

            let engines = self.registry.active().max(1);
            let budget = pass_budget(self.limit, engines);
            let started = Instant::now();
            let target = &*self.target;
            match panic::catch_unwind(AssertUnwindSafe(|| self.pass.run(target, budget))) {
                Ok(Ok(work)) => debug!(pass, budget, work, "Maintenance pass done"),
                Ok(Err(err)) => warn!(pass, budget, error = %err, "Maintenance pass failed"),
                Err(payload) => {
                    warn!(pass, budget, panic = %panic_message(&*payload), "Maintenance pass panicked")
                }
            }

            if self.closed.load(Ordering::Acquire) {
                break;
            }
            if self.stop.wait(pass_delay(engines, started.elapsed())) {
                break;
            }
        }

        set_state(&self.state, LoopState::AwaitingExit);
        info!(pass, "Mantle maintenance loop exiting");
        set_state(&self.state, LoopState::Stopped);
    }
}
