//! Per-process state maintained by the engine (§3, §4.5).
//!
//! `TrackTable` owns every `ProcessTrack` and is the only place eviction
//! policy lives: the engine never reaches into individual tracks to decide
//! whether one should be removed.

use std::collections::HashMap;

use crate::metadata::ProcessMeta;
use crate::pattern::Pattern;

/// Per-(track, pattern) cursor (§3).
#[derive(Debug, Clone, Default)]
pub struct ProgressSlot {
    pub current_step_index: usize,
    pub current_step_match_count: u32,
    pub first_match_ns_in_step: u64,
    pub last_match_ns: u64,
    pub pattern_started_ns: u64,
    /// Has this slot ever advanced past its initial state?
    pub started: bool,
    /// Permanently disabled because the track was whitelisted for this
    /// pattern at creation time (§4.5 step 2). Never re-evaluated.
    pub disabled: bool,
    /// Syscalls observed so far in the current attempt, for `MatchResult`.
    pub step_trace: Vec<(u32, u64)>,
}

impl ProgressSlot {
    fn reset(&mut self) {
        self.current_step_index = 0;
        self.current_step_match_count = 0;
        self.first_match_ns_in_step = 0;
        self.last_match_ns = 0;
        self.pattern_started_ns = 0;
        self.started = false;
        self.step_trace.clear();
    }
}

/// Per-PID state (§3). `slots` is indexed in parallel with the global
/// pattern table.
pub struct ProcessTrack {
    pub pid: u32,
    pub meta: Option<ProcessMeta>,
    pub slots: Vec<ProgressSlot>,
    /// Most recent timestamp at which any pattern on this track progressed,
    /// or the track's creation time if nothing has progressed yet. Drives
    /// LRU eviction (§4.5).
    most_recent_activity_ns: u64,
}

impl ProcessTrack {
    fn new(pid: u32, pattern_count: usize, created_at_ns: u64) -> Self {
        Self {
            pid,
            meta: None,
            slots: vec![ProgressSlot::default(); pattern_count],
            most_recent_activity_ns: created_at_ns,
        }
    }

    pub fn touch(&mut self, at_ns: u64) {
        if at_ns > self.most_recent_activity_ns {
            self.most_recent_activity_ns = at_ns;
        }
    }

    pub fn reset_slot(&mut self, pattern_index: usize) {
        if let Some(slot) = self.slots.get_mut(pattern_index) {
            slot.reset();
        }
    }
}

impl Clone for ProgressSlot {
    fn clone(&self) -> Self {
        Self {
            current_step_index: self.current_step_index,
            current_step_match_count: self.current_step_match_count,
            first_match_ns_in_step: self.first_match_ns_in_step,
            last_match_ns: self.last_match_ns,
            pattern_started_ns: self.pattern_started_ns,
            started: self.started,
            disabled: self.disabled,
            step_trace: self.step_trace.clone(),
        }
    }
}

/// Owns every live `ProcessTrack`, capped at `capacity` entries (§3: default
/// 16 384).
pub struct TrackTable {
    tracks: HashMap<u32, ProcessTrack>,
    capacity: usize,
}

impl TrackTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            tracks: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessTrack> {
        self.tracks.get(&pid)
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut ProcessTrack> {
        self.tracks.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: u32) -> Option<ProcessTrack> {
        self.tracks.remove(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.tracks.contains_key(&pid)
    }

    /// Get the track for `pid`, creating it (and reporting `true`) if it
    /// doesn't exist yet. Never silently drops an existing track.
    pub fn get_or_create(&mut self, pid: u32, pattern_count: usize, now_ns: u64) -> (&mut ProcessTrack, bool) {
        let created = !self.tracks.contains_key(&pid);
        let track = self
            .tracks
            .entry(pid)
            .or_insert_with(|| ProcessTrack::new(pid, pattern_count, now_ns));
        (track, created)
    }

    pub fn is_over_capacity(&self) -> bool {
        self.tracks.len() > self.capacity
    }

    /// Evict the least-recently-active track, skipping any track with an
    /// in-flight, unexpired progressing slot (§4.5 Eviction). Returns the
    /// evicted PID, or `None` if every track is protected.
    pub fn evict_lru(&mut self, patterns: &[Pattern], now_ns: u64) -> Option<u32> {
        let victim = self
            .tracks
            .iter()
            .filter(|(_, track)| !has_protected_progress(track, patterns, now_ns))
            .min_by_key(|(_, track)| track.most_recent_activity_ns)
            .map(|(pid, _)| *pid)?;

        self.tracks.remove(&victim);
        Some(victim)
    }
}

/// A track is protected from eviction if any of its slots has progressed
/// past step 0 and that pattern's overall window has not yet expired.
fn has_protected_progress(track: &ProcessTrack, patterns: &[Pattern], now_ns: u64) -> bool {
    track.slots.iter().enumerate().any(|(i, slot)| {
        if slot.disabled || !slot.started || slot.current_step_index == 0 {
            return false;
        }
        let Some(pattern) = patterns.get(i) else {
            return false;
        };
        let expired = pattern.window_ns != 0
            && now_ns.saturating_sub(slot.pattern_started_ns) > pattern.window_ns;
        !expired
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Pattern, Severity};

    fn pattern(window_ns: u64) -> Pattern {
        Pattern {
            id: 1,
            name: "p",
            severity: Severity::Low,
            steps: &[],
            window_ns,
            whitelist_process_names: &[],
            whitelist_binary_path_prefixes: &[],
            whitelist_namespace_inums: &[],
            path_prefixes: &[],
        }
    }

    #[test]
    fn creates_track_once() {
        let mut table = TrackTable::new(10);
        let (_, created) = table.get_or_create(100, 1, 0);
        assert!(created);
        let (_, created_again) = table.get_or_create(100, 1, 0);
        assert!(!created_again);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn evicts_least_recently_active_track() {
        let mut table = TrackTable::new(10);
        table.get_or_create(1, 1, 100);
        table.get_or_create(2, 1, 200);
        table.get_or_create(3, 1, 50);

        let patterns = [pattern(0)];
        let victim = table.evict_lru(&patterns, 1_000).expect("a track is evictable");
        assert_eq!(victim, 3);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn protects_in_flight_progressing_track() {
        let mut table = TrackTable::new(10);
        let (track, _) = table.get_or_create(1, 1, 0);
        track.slots[0].started = true;
        track.slots[0].current_step_index = 1;
        track.slots[0].pattern_started_ns = 0;
        table.get_or_create(2, 1, 500);

        let patterns = [pattern(1_000_000)]; // window not yet expired at now=100
        let victim = table.evict_lru(&patterns, 100).expect("track 2 is evictable");
        assert_eq!(victim, 2);
    }

    #[test]
    fn allows_eviction_of_expired_in_flight_track() {
        let mut table = TrackTable::new(10);
        let (track, _) = table.get_or_create(1, 1, 0);
        track.slots[0].started = true;
        track.slots[0].current_step_index = 1;
        track.slots[0].pattern_started_ns = 0;

        let patterns = [pattern(10)]; // window of 10ns, long expired by now=1000
        let victim = table.evict_lru(&patterns, 1_000).expect("expired track is evictable");
        assert_eq!(victim, 1);
    }
}
