//! Step Profiling
//!
//! Per-step counters and wall-clock stage timers for the evolution loop.
//!
//! # Profiled Stages
//!
//! - Broad phase (BVH build and candidate pairs)
//! - Narrow phase (per-pair contact evaluation)
//! - Graph update (islands, levels, colors)
//! - Integrate (forces and predicted poses)
//! - Apply (velocity passes)
//! - Push-out (position passes)
//! - Sleep reconciliation

use std::time::{Duration, Instant};

/// A single stage timer
#[derive(Clone, Debug)]
pub struct ProfileEntry {
    /// Stage name
    pub name: &'static str,
    /// Total accumulated nanoseconds
    pub total_nanos: u64,
    /// Number of recorded runs
    pub call_count: u64,
    /// Last run
    pub last_nanos: u64,
    /// Slowest run
    pub peak_nanos: u64,
}

impl ProfileEntry {
    /// Empty timer
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            total_nanos: 0,
            call_count: 0,
            last_nanos: 0,
            peak_nanos: 0,
        }
    }

    /// Average nanoseconds per run
    #[inline]
    pub fn average_nanos(&self) -> u64 {
        if self.call_count == 0 {
            0
        } else {
            self.total_nanos / self.call_count
        }
    }

    /// Record one run
    pub fn record(&mut self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos = self.total_nanos.saturating_add(nanos);
        self.call_count += 1;
        self.last_nanos = nanos;
        self.peak_nanos = self.peak_nanos.max(nanos);
    }

    /// Reset all counters
    pub fn reset(&mut self) {
        self.total_nanos = 0;
        self.call_count = 0;
        self.last_nanos = 0;
        self.peak_nanos = 0;
    }
}

/// Counters of one evolution step
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepStats {
    /// Broad-phase candidates tested
    pub candidate_pairs: usize,
    /// Pairs that passed the box filter
    pub narrow_phase_pairs: usize,
    /// Contacts kept after the narrow phase
    pub contacts: usize,
    /// Islands after the graph update
    pub islands: usize,
    /// Islands recomputed by the graph update
    pub recomputed_islands: usize,
    /// Islands asleep at the end of the step
    pub sleeping_islands: usize,
    /// Islands that fell asleep this step
    pub islands_slept: usize,
    /// Dynamic bodies that were integrated
    pub active_bodies: usize,
    /// Velocity sweeps over all islands
    pub solver_sweeps: usize,
    /// Largest push-out iteration count over all islands
    pub push_out_iterations: usize,
    /// Push-out corrections applied
    pub push_out_corrections: usize,
}

/// Stage timers plus the counters of the last step
#[derive(Clone, Debug)]
pub struct PhysicsProfiler {
    entries: Vec<ProfileEntry>,
    /// Counters of the last step
    pub stats: StepStats,
    /// Steps recorded
    pub frame_count: u64,
    /// Whether timers are recorded
    pub enabled: bool,
}

/// Broad-phase stage index
pub const STAGE_BROAD_PHASE: usize = 0;
/// Narrow-phase stage index
pub const STAGE_NARROW_PHASE: usize = 1;
/// Graph-update stage index
pub const STAGE_GRAPH_UPDATE: usize = 2;
/// Integration stage index
pub const STAGE_INTEGRATE: usize = 3;
/// Velocity-pass stage index
pub const STAGE_APPLY: usize = 4;
/// Push-out stage index
pub const STAGE_PUSH_OUT: usize = 5;
/// Sleep-reconciliation stage index
pub const STAGE_SLEEP: usize = 6;
/// Whole step stage index
pub const STAGE_TOTAL_STEP: usize = 7;

impl PhysicsProfiler {
    /// Profiler with one timer per evolution stage
    pub fn new() -> Self {
        let entries = vec![
            ProfileEntry::new("broad_phase"),
            ProfileEntry::new("narrow_phase"),
            ProfileEntry::new("graph_update"),
            ProfileEntry::new("integrate"),
            ProfileEntry::new("apply"),
            ProfileEntry::new("push_out"),
            ProfileEntry::new("sleep"),
            ProfileEntry::new("total_step"),
        ];
        Self {
            entries,
            stats: StepStats::default(),
            frame_count: 0,
            enabled: true,
        }
    }

    /// Record a stage duration (ignored when disabled)
    #[inline]
    pub fn record(&mut self, stage: usize, elapsed: Duration) {
        if self.enabled {
            if let Some(entry) = self.entries.get_mut(stage) {
                entry.record(elapsed);
            }
        }
    }

    /// Record the time since `start`
    #[inline]
    pub fn record_since(&mut self, stage: usize, start: Instant) {
        self.record(stage, start.elapsed());
    }

    /// Start a new step: bump the frame counter and clear the counters
    pub fn begin_frame(&mut self) {
        self.frame_count += 1;
        self.stats = StepStats::default();
    }

    /// Timer of one stage
    pub fn get(&self, stage: usize) -> Option<&ProfileEntry> {
        self.entries.get(stage)
    }

    /// Last duration of a stage
    pub fn last(&self, stage: usize) -> Duration {
        self.entries
            .get(stage)
            .map_or(Duration::ZERO, |e| Duration::from_nanos(e.last_nanos))
    }

    /// Average duration of a stage
    pub fn average(&self, stage: usize) -> Duration {
        self.entries
            .get(stage)
            .map_or(Duration::ZERO, |e| Duration::from_nanos(e.average_nanos()))
    }

    /// Reset every timer and counter
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.reset();
        }
        self.stats = StepStats::default();
        self.frame_count = 0;
    }

    /// `(name, last, average, peak)` in nanoseconds for every stage
    pub fn summary(&self) -> Vec<(&'static str, u64, u64, u64)> {
        self.entries
            .iter()
            .map(|e| (e.name, e.last_nanos, e.average_nanos(), e.peak_nanos))
            .collect()
    }
}

impl Default for PhysicsProfiler {
    fn default() -> Self {
        Self::new()
    }
}
