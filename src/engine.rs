//! The core per-event pipeline (§4.5): track lookup, lazy whitelist
//! evaluation, step advancement, and terminal-step match emission.

use crate::constraint::all_hold;
use crate::event::SyscallEvent;
use crate::metadata::{MetadataResolver, ProcessMeta};
use crate::pattern::Pattern;
use crate::track::{ProcessTrack, TrackTable};

/// A completed attack signature, ready for enforcement and logging (§4.6).
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub pattern_id: u64,
    pub pattern_name: &'static str,
    pub severity: crate::pattern::Severity,
    pub pid: u32,
    pub meta: ProcessMeta,
    pub matched_at_ns: u64,
    pub step_trace: Vec<(u32, u64)>,
}

pub struct PatternEngine {
    patterns: &'static [Pattern],
    tracks: TrackTable,
    resolver: MetadataResolver,
    tracks_evicted: u64,
}

impl PatternEngine {
    pub fn new(patterns: &'static [Pattern], resolver: MetadataResolver, track_capacity: usize) -> Self {
        Self {
            patterns,
            tracks: TrackTable::new(track_capacity),
            resolver,
            tracks_evicted: 0,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Tracks evicted under capacity pressure so far (§7 shutdown summary).
    pub fn tracks_evicted(&self) -> u64 {
        self.tracks_evicted
    }

    /// Feed one observed event through every enabled pattern for its track,
    /// returning every terminal-step match produced. An exit notification
    /// simply drops the track (§4.4/§B) and produces no matches.
    pub fn process_event(&mut self, event: &SyscallEvent) -> Vec<MatchResult> {
        if event.is_exit_notification() {
            self.tracks.remove(event.pid);
            return Vec::new();
        }

        let now = event.timestamp_ns;
        let pattern_count = self.patterns.len();
        let (track, created) = self.tracks.get_or_create(event.pid, pattern_count, now);

        if created && !resolve_and_apply_whitelist(track, &self.resolver, self.patterns) {
            // §4.4: a process whose /proc entry vanishes mid-resolution is
            // treated as exited; the track is scheduled for deletion rather
            // than kept alive with every pattern silently left enabled.
            self.tracks.remove(event.pid);
            return Vec::new();
        }

        let mut results = Vec::new();
        for index in 0..pattern_count {
            if track.slots[index].disabled {
                continue;
            }
            let pattern = &self.patterns[index];
            advance_slot(track, index, pattern, event, &self.resolver, &mut results);
        }
        track.touch(now);

        if self.tracks.is_over_capacity() {
            if self.tracks.evict_lru(self.patterns, now).is_some() {
                self.tracks_evicted += 1;
            }
        }

        results
    }
}

/// Resolve the track's process metadata once and permanently disable every
/// pattern it whitelists (§4.5 step 2). Returns `false` on resolution
/// failure, signaling the caller to delete the track (§4.4): there is
/// nothing to whitelist against a process that's already gone, and §7's
/// default-deny stance means "unknown" never grants an exemption in the
/// meantime either.
fn resolve_and_apply_whitelist(track: &mut ProcessTrack, resolver: &MetadataResolver, patterns: &[Pattern]) -> bool {
    match resolver.resolve(track.pid) {
        Ok(meta) => {
            for (index, pattern) in patterns.iter().enumerate() {
                if pattern.is_whitelisted(&meta) {
                    track.slots[index].disabled = true;
                }
            }
            track.meta = Some(meta);
            true
        }
        Err(_) => false,
    }
}

/// Advance one (track, pattern) slot against `event`, appending to `results`
/// if the step sequence reaches a terminal step. `retry` is set on the
/// second call made after a mid-sequence reset (window or max-distance
/// expiry), per §4.5's "re-evaluate the event against step 0 (one retry)":
/// it prevents that retry from chaining into a third attempt.
fn advance_slot(
    track: &mut ProcessTrack,
    pattern_index: usize,
    pattern: &'static Pattern,
    event: &SyscallEvent,
    resolver: &MetadataResolver,
    results: &mut Vec<MatchResult>,
) {
    advance_slot_inner(track, pattern_index, pattern, event, resolver, results, false)
}

fn advance_slot_inner(
    track: &mut ProcessTrack,
    pattern_index: usize,
    pattern: &'static Pattern,
    event: &SyscallEvent,
    resolver: &MetadataResolver,
    results: &mut Vec<MatchResult>,
    retry: bool,
) {
    let now = event.timestamp_ns;

    {
        let slot = &track.slots[pattern_index];
        let expired = slot.started
            && pattern.window_ns != 0
            && now.saturating_sub(slot.pattern_started_ns) > pattern.window_ns;
        if expired {
            track.reset_slot(pattern_index);
            if !retry {
                return advance_slot_inner(track, pattern_index, pattern, event, resolver, results, true);
            }
        }
    }

    let Some(step) = pattern.steps.get(track.slots[pattern_index].current_step_index) else {
        return;
    };

    if !step.match_kind.matches(event.syscall_nr) {
        return;
    }
    if !all_hold(step.constraints, event) {
        return;
    }
    if let Some(path_constraint) = step.path_constraint {
        let prefix = pattern.path_prefixes.get(path_constraint.prefix_index).copied().unwrap_or("");
        let resolved = resolver.read_cwd(event.pid);
        if !path_constraint.holds(resolved.as_deref(), prefix) {
            return;
        }
    }

    let slot = &mut track.slots[pattern_index];

    if !slot.started {
        slot.started = true;
        slot.pattern_started_ns = now;
        slot.first_match_ns_in_step = now;
    } else if slot.current_step_match_count == 0
        && step.max_distance_ns != 0
        && now.saturating_sub(slot.last_match_ns) > step.max_distance_ns
    {
        // max_distance_ns only bounds the gap from the prior step's
        // completion to *this* step's first match (§3); once the step has
        // its first match, later matches toward `min_count` aren't re-gated
        // by it.
        drop(slot);
        track.reset_slot(pattern_index);
        if !retry {
            return advance_slot_inner(track, pattern_index, pattern, event, resolver, results, true);
        }
        return;
    }

    let slot = &mut track.slots[pattern_index];
    slot.current_step_match_count += 1;
    slot.last_match_ns = now;
    slot.step_trace.push((event.syscall_nr, now));

    if step.max_count != 0 && slot.current_step_match_count > step.max_count {
        drop(slot);
        track.reset_slot(pattern_index);
        return;
    }

    if slot.current_step_match_count < step.min_count {
        return;
    }

    if step.terminal {
        let meta = track.meta.clone().unwrap_or_else(|| ProcessMeta {
            basename: String::new(),
            exe_path: String::new(),
            ns_inum: event.ns_inum,
            container: event.ns_inum != resolver.init_pid_ns_inum(),
        });
        let step_trace = std::mem::take(&mut track.slots[pattern_index].step_trace);
        results.push(MatchResult {
            pattern_id: pattern.id,
            pattern_name: pattern.name,
            severity: pattern.severity,
            pid: event.pid,
            meta,
            matched_at_ns: now,
            step_trace,
        });
        track.reset_slot(pattern_index);
    } else {
        let slot = &mut track.slots[pattern_index];
        slot.current_step_index += 1;
        slot.current_step_match_count = 0;
        // step_trace accumulates across the whole attempt (§6): the
        // terminal branch above mem::takes it, and reset_slot clears it on
        // a full restart, so there's nothing to clear here.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{ArgConstraint, ArgOp};
    use crate::pattern::{Severity, Step, StepMatch};

    /// A resolver whose `resolve` always succeeds, for tests that track a
    /// synthetic PID across several events. Real production PIDs always
    /// resolve (the engine only ever sees a PID after observing a real
    /// syscall from it); test PIDs like 100/200/300 have no real process
    /// behind them, so without this they'd hit the vanished-process path on
    /// their very first event and never accumulate progress.
    fn test_resolver() -> MetadataResolver {
        MetadataResolver::with_init_ns_inum(0).with_fixed_meta("/usr/bin/test_proc", 0)
    }

    const STEPS: [Step; 2] = [
        Step {
            match_kind: StepMatch::Exact(1),
            constraints: &[],
            path_constraint: None,
            min_count: 1,
            max_count: 0,
            max_distance_ns: 0,
            terminal: false,
        },
        Step {
            match_kind: StepMatch::Exact(2),
            constraints: &[],
            path_constraint: None,
            min_count: 1,
            max_count: 0,
            max_distance_ns: 1_000,
            terminal: true,
        },
    ];

    static PATTERNS: [Pattern; 1] = [
        Pattern {
            id: 42,
            name: "two_step_test",
            severity: Severity::High,
            steps: &STEPS,
            window_ns: 1_000_000,
            whitelist_process_names: &["whitelisted_proc"],
            whitelist_binary_path_prefixes: &[],
            whitelist_namespace_inums: &[],
            path_prefixes: &[],
        },
    ];

    const HOST_NS: u32 = 4_026_531_836;
    const CONTAINER_NS: u32 = 4_026_532_999;

    fn event(pid: u32, syscall_nr: u32, ts: u64) -> SyscallEvent {
        event_in_ns(pid, syscall_nr, ts, 0)
    }

    fn event_in_ns(pid: u32, syscall_nr: u32, ts: u64, ns_inum: u32) -> SyscallEvent {
        SyscallEvent {
            syscall_nr,
            pid,
            timestamp_ns: ts,
            args: [0; 6],
            ns_inum,
            flags: 0,
        }
    }

    #[test]
    fn two_step_sequence_emits_match() {
        let resolver = test_resolver();
        let mut engine = PatternEngine::new(&PATTERNS, resolver, 16);

        let r1 = engine.process_event(&event(100, 1, 0));
        assert!(r1.is_empty());
        let r2 = engine.process_event(&event(100, 2, 500));
        assert_eq!(r2.len(), 1);
        assert_eq!(r2[0].pattern_id, 42);
        assert_eq!(r2[0].step_trace, vec![(1, 0), (2, 500)]);
    }

    #[test]
    fn exceeding_max_distance_disqualifies_attempt() {
        let resolver = test_resolver();
        let mut engine = PatternEngine::new(&PATTERNS, resolver, 16);

        engine.process_event(&event(100, 1, 0));
        // step 2's max_distance_ns is 1000; arriving at 5000 is too late.
        let r2 = engine.process_event(&event(100, 2, 5_000));
        assert!(r2.is_empty());
    }

    #[test]
    fn exit_notification_drops_track() {
        let resolver = test_resolver();
        let mut engine = PatternEngine::new(&PATTERNS, resolver, 16);
        engine.process_event(&event(100, 1, 0));
        assert_eq!(engine.track_count(), 1);

        let exit_event = SyscallEvent {
            syscall_nr: crate::oracle::EXIT_SENTINEL,
            pid: 100,
            timestamp_ns: 10,
            args: [0; 6],
            ns_inum: 0,
            flags: 0,
        };
        let results = engine.process_event(&exit_event);
        assert!(results.is_empty());
        assert_eq!(engine.track_count(), 0);
    }

    #[test]
    fn window_expiry_restarts_attempt() {
        let resolver = test_resolver();
        let mut engine = PatternEngine::new(&PATTERNS, resolver, 16);

        engine.process_event(&event(100, 1, 0));
        // window_ns is 1_000_000; arriving far past it resets to step 0.
        let r = engine.process_event(&event(100, 2, 2_000_000));
        assert!(r.is_empty());
    }

    #[test]
    fn max_distance_reset_retries_the_same_event_against_step_zero() {
        // §4.5: a max-distance reset gets one retry of the *same* event
        // against step 0. Here step 0 matches syscall 1, so an event that
        // arrives too late for step 1 (syscall 2) and also doesn't match
        // step 0 produces no progress at all after the retry.
        let resolver = test_resolver();
        let mut engine = PatternEngine::new(&PATTERNS, resolver, 16);

        engine.process_event(&event(200, 1, 0));
        engine.process_event(&event(200, 2, 5_000)); // too late, resets + retries against step 0
        // A fresh syscall-1 event now starts a brand new attempt from step 0.
        let r1 = engine.process_event(&event(200, 1, 5_100));
        assert!(r1.is_empty());
        let r2 = engine.process_event(&event(200, 2, 5_200));
        assert_eq!(r2.len(), 1);
    }

    const MULTI_MATCH_STEPS: [Step; 2] = [
        Step {
            match_kind: StepMatch::Exact(1),
            constraints: &[],
            path_constraint: None,
            min_count: 1,
            max_count: 0,
            max_distance_ns: 0,
            terminal: false,
        },
        Step {
            match_kind: StepMatch::Exact(2),
            constraints: &[],
            path_constraint: None,
            min_count: 2,
            max_count: 0,
            max_distance_ns: 1_000,
            terminal: true,
        },
    ];

    static MULTI_MATCH_PATTERNS: [Pattern; 1] = [
        Pattern {
            id: 43,
            name: "multi_match_test",
            severity: Severity::High,
            steps: &MULTI_MATCH_STEPS,
            window_ns: 1_000_000,
            whitelist_process_names: &[],
            whitelist_binary_path_prefixes: &[],
            whitelist_namespace_inums: &[],
            path_prefixes: &[],
        },
    ];

    #[test]
    fn max_distance_only_gates_a_steps_first_match() {
        let resolver = test_resolver();
        let mut engine = PatternEngine::new(&MULTI_MATCH_PATTERNS, resolver, 16);

        engine.process_event(&event(300, 1, 0));
        // Step 1's first match arrives within max_distance_ns of step 0.
        let r1 = engine.process_event(&event(300, 2, 500));
        assert!(r1.is_empty());
        // The step's second match arrives 5000ns after the first, well past
        // max_distance_ns, but that bound only gates a step's first match
        // (§3), so the attempt must still reach its terminal step.
        let r2 = engine.process_event(&event(300, 2, 5_500));
        assert_eq!(r2.len(), 1);
    }

    #[test]
    fn resolution_failure_deletes_the_track() {
        // No with_fixed_meta: pid 100 has no real process behind it, so
        // resolve() genuinely fails here, exercising §4.4's track-deletion
        // path rather than the test-only success override.
        let resolver = MetadataResolver::with_init_ns_inum(0);
        let mut engine = PatternEngine::new(&PATTERNS, resolver, 16);

        let r1 = engine.process_event(&event(100, 1, 0));
        assert!(r1.is_empty());
        assert_eq!(engine.track_count(), 0, "an unresolvable PID's track must not survive creation");

        // Progress never accumulates: each event recreates and immediately
        // deletes the track, so the sequence never reaches its terminal step.
        let r2 = engine.process_event(&event(100, 2, 500));
        assert!(r2.is_empty());
        assert_eq!(engine.track_count(), 0);
    }

    #[test]
    fn terminal_match_fallback_meta_derives_container_from_event_ns() {
        // Exercises the `track.meta == None` fallback in `advance_slot_inner`
        // directly: with resolution failure now deleting the track (§4.4),
        // this branch is no longer reachable through `process_event` at all,
        // but it stays as a defensive fallback and must still compute
        // `container` correctly if it's ever exercised.
        let resolver = MetadataResolver::with_init_ns_inum(HOST_NS);
        let mut tracks = TrackTable::new(16);
        let (track, _created) = tracks.get_or_create(100, PATTERNS.len(), 0);
        assert!(track.meta.is_none());

        let mut results = Vec::new();
        advance_slot(track, 0, &PATTERNS[0], &event(100, 1, 0), &resolver, &mut results);
        advance_slot(track, 0, &PATTERNS[0], &event_in_ns(100, 2, 500, CONTAINER_NS), &resolver, &mut results);

        assert_eq!(results.len(), 1);
        assert!(results[0].meta.container);
    }

    #[test]
    fn eviction_count_increments_when_over_capacity() {
        let resolver = test_resolver();
        let mut engine = PatternEngine::new(&PATTERNS, resolver, 2);

        engine.process_event(&event(1, 99, 0));
        engine.process_event(&event(2, 99, 10));
        assert_eq!(engine.tracks_evicted(), 0);

        // A third distinct track pushes the table over its capacity of 2.
        engine.process_event(&event(3, 99, 20));
        assert_eq!(engine.track_count(), 2);
        assert_eq!(engine.tracks_evicted(), 1);
    }
}
