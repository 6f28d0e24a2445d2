//! Debug Single-Step Gate
//!
//! Frame-by-frame inspection of the evolution loop: when enabled, the
//! simulation thread parks after the integration phase until a controlling
//! thread releases it. Disabled gates cost one uncontended lock per step.
//!
//! # Handshake
//!
//! ```text
//! simulation thread                 controlling thread
//! -----------------                 ------------------
//! pause()  -> "step ready" ------>  wait_until_paused()
//!          <-- "step consumed" ---  release()
//! ```
//!
//! Disabling the gate releases a parked step and turns later pauses into no-ops.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

// gate state guarded by the mutex
#[derive(Debug, Default)]
struct GateState {
    enabled: bool,
    // simulation thread is parked in `pause`
    paused: bool,
    // releases granted ahead of the next pause
    permits: usize,
    // completed pause/release round trips
    steps: u64,
}

/// Two-sided rendezvous between the simulation thread and a debugger
#[derive(Debug, Default)]
pub struct SubstepGate {
    state: Mutex<GateState>,
    cvar: Condvar,
}

impl SubstepGate {
    /// Disabled gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn single-stepping on or off
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if !enabled {
            state.permits = 0;
        }
        self.cvar.notify_all();
    }

    /// Whether single-stepping is on
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Whether the simulation thread is currently parked
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Completed pause/release round trips
    pub fn steps(&self) -> u64 {
        self.state.lock().steps
    }

    /// Simulation side: signal "step ready" and block until released
    ///
    /// Returns immediately when the gate is disabled. Returns `true` when the
    /// step was actually held.
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock();
        if !state.enabled {
            return false;
        }
        state.paused = true;
        self.cvar.notify_all();
        while state.enabled && state.permits == 0 {
            self.cvar.wait(&mut state);
        }
        if state.permits > 0 {
            state.permits -= 1;
        }
        state.paused = false;
        state.steps += 1;
        self.cvar.notify_all();
        true
    }

    /// Controller side: signal "step consumed", letting one paused step continue
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.enabled {
            state.permits += 1;
            // the next wait_until_paused must see a fresh pause
            state.paused = false;
            self.cvar.notify_all();
        }
    }

    /// Controller side: block until the simulation thread is parked
    ///
    /// Returns `false` if the gate is disabled (nothing will ever park).
    pub fn wait_until_paused(&self) -> bool {
        let mut state = self.state.lock();
        while state.enabled && !state.paused {
            self.cvar.wait(&mut state);
        }
        state.paused
    }

    /// Like [`wait_until_paused`](Self::wait_until_paused) with a deadline
    pub fn wait_until_paused_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.enabled && !state.paused {
            if self.cvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.paused
    }
}
