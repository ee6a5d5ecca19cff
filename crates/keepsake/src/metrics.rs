//! Performance counters for one runtime.
//!
//! Counters are plain atomics bumped with `Relaxed` ordering; a snapshot is
//! not a consistent cut across counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct RuntimeStats {
    // Stack
    pushes: AtomicU64,
    pops: AtomicU64,
    max_depth_seen: AtomicU64,

    // Frames
    frames_allocated: AtomicU64,
    frames_recycled: AtomicU64,
    frames_freed: AtomicU64,

    // Cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    keeps_registered: AtomicU64,
    pointer_hops: AtomicU64,

    // Evaluation
    computations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub pushes: u64,
    pub pops: u64,
    pub max_depth_seen: u64,
    pub frames_allocated: u64,
    pub frames_recycled: u64,
    pub frames_freed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub keeps_registered: u64,
    pub pointer_hops: u64,
    pub computations: u64,
}

impl RuntimeStats {
    pub fn record_push(&self, depth: usize, recycled: bool) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        self.max_depth_seen.fetch_max(depth as u64, Ordering::Relaxed);
        self.record_frame(recycled);
    }

    pub fn record_frame(&self, recycled: bool) {
        self.frames_allocated.fetch_add(1, Ordering::Relaxed);
        if recycled {
            self.frames_recycled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_pop(&self) {
        self.pops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_freed(&self, frames: usize) {
        if frames > 0 {
            self.frames_freed.fetch_add(frames as u64, Ordering::Relaxed);
        }
    }

    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_keep(&self) {
        self.keeps_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pointer_hops(&self, hops: usize) {
        if hops > 0 {
            self.pointer_hops.fetch_add(hops as u64, Ordering::Relaxed);
        }
    }

    pub fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pushes: self.pushes.load(Ordering::Relaxed),
            pops: self.pops.load(Ordering::Relaxed),
            max_depth_seen: self.max_depth_seen.load(Ordering::Relaxed),
            frames_allocated: self.frames_allocated.load(Ordering::Relaxed),
            frames_recycled: self.frames_recycled.load(Ordering::Relaxed),
            frames_freed: self.frames_freed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            keeps_registered: self.keeps_registered.load(Ordering::Relaxed),
            pointer_hops: self.pointer_hops.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.pushes,
            &self.pops,
            &self.max_depth_seen,
            &self.frames_allocated,
            &self.frames_recycled,
            &self.frames_freed,
            &self.cache_hits,
            &self.cache_misses,
            &self.keeps_registered,
            &self.pointer_hops,
            &self.computations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn log_summary(&self) {
        let stats = self.snapshot();
        log::info!(
            "[keepsake-stats] Stack: pushes={}, pops={}, max_depth={}",
            stats.pushes,
            stats.pops,
            stats.max_depth_seen
        );
        log::info!(
            "[keepsake-stats] Frames: allocated={}, recycled={}, freed={}",
            stats.frames_allocated,
            stats.frames_recycled,
            stats.frames_freed
        );
        log::info!(
            "[keepsake-stats] Cache: hits={}, misses={}, keeps={}, pointer_hops={}",
            stats.cache_hits,
            stats.cache_misses,
            stats.keeps_registered,
            stats.pointer_hops
        );
        log::info!("[keepsake-stats] Evaluator: computations={}", stats.computations);
    }
}
