//! Attack signatures: `Pattern`, `Step`, severities, and whitelist matching
//! (§3, §4.5, §9). Patterns are compile-time constants living in `'static`
//! storage, never boxed, never cloned into a stack frame, so a
//! `MatchResult` can safely carry a `&'static Pattern` for its entire
//! process lifetime (base spec §9's documented "stack-copy reference"
//! source bug is structurally impossible here: there is no code path that
//! produces anything but a reference into `PATTERNS`).

use crate::constraint::{ArgConstraint, PathConstraint};
use crate::metadata::ProcessMeta;

/// How a step recognizes a candidate syscall. Modeled as a discriminated
/// value per base spec §9 ("Polymorphism") rather than a dispatch table.
#[derive(Debug, Clone, Copy)]
pub enum StepMatch {
    /// Matches only this exact syscall number.
    Exact(u32),
    /// Matches any syscall whose classifier bitmask intersects this mask.
    Class(u32),
}

impl StepMatch {
    pub fn matches(&self, syscall_nr: u32) -> bool {
        match *self {
            StepMatch::Exact(nr) => syscall_nr == nr,
            StepMatch::Class(mask) => crate::classifier::classify(syscall_nr).intersects(mask),
        }
    }
}

/// Severity of a pattern, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// One element of a pattern (§3).
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub match_kind: StepMatch,
    pub constraints: &'static [ArgConstraint],
    pub path_constraint: Option<PathConstraint>,
    /// Matching syscalls required before this step is satisfied.
    pub min_count: u32,
    /// 0 = unbounded. Exceeding this disqualifies the current attempt (§4.5).
    pub max_count: u32,
    /// Nanoseconds allowed between the prior step's completion and this
    /// step's first match. 0 = unbounded.
    pub max_distance_ns: u64,
    /// Reaching this step with its count satisfied constitutes a match.
    pub terminal: bool,
}

/// A compile-time-constant attack signature (§3).
#[derive(Debug)]
pub struct Pattern {
    pub id: u64,
    pub name: &'static str,
    pub severity: Severity,
    pub steps: &'static [Step],
    pub window_ns: u64,
    /// Process (comm/basename) names that disable this pattern on a track.
    pub whitelist_process_names: &'static [&'static str],
    /// Binary path prefixes that disable this pattern on a track.
    pub whitelist_binary_path_prefixes: &'static [&'static str],
    /// PID-namespace inodes that disable this pattern on a track (§4.5 step
    /// 2's third whitelist dimension: namespace scope).
    pub whitelist_namespace_inums: &'static [u32],
    /// Path prefixes indexed by `PathConstraint::prefix_index`.
    pub path_prefixes: &'static [&'static str],
}

impl Pattern {
    /// Whitelist check performed once, at track creation (§4.5 step 2). A
    /// pattern that matches any whitelist entry is permanently disabled on
    /// that track, default-deny on any resolution failure (§7): an
    /// unresolved `meta` cannot whitelist anything.
    pub fn is_whitelisted(&self, meta: &ProcessMeta) -> bool {
        if self
            .whitelist_process_names
            .iter()
            .any(|name| meta.basename == *name)
        {
            return true;
        }

        if self
            .whitelist_binary_path_prefixes
            .iter()
            .any(|prefix| meta.exe_path.starts_with(prefix))
        {
            return true;
        }

        self.whitelist_namespace_inums
            .iter()
            .any(|inum| meta.ns_inum == *inum)
    }
}

/// FNV-1a over the pattern name, computed at compile time so `Pattern::id`
/// never depends on a runtime hasher (and so two builds of the same pattern
/// table always agree on ids for log correlation).
pub const fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ProcessMeta;

    fn meta(basename: &str, exe_path: &str) -> ProcessMeta {
        meta_in_ns(basename, exe_path, 0)
    }

    fn meta_in_ns(basename: &str, exe_path: &str, ns_inum: u32) -> ProcessMeta {
        ProcessMeta {
            basename: basename.to_string(),
            exe_path: exe_path.to_string(),
            ns_inum,
            container: false,
        }
    }

    const P: Pattern = Pattern {
        id: fnv1a64(b"test_pattern"),
        name: "test_pattern",
        severity: Severity::Low,
        steps: &[],
        window_ns: 0,
        whitelist_process_names: &["sudo"],
        whitelist_binary_path_prefixes: &["/usr/bin/make"],
        whitelist_namespace_inums: &[4_026_531_836],
        path_prefixes: &[],
    };

    #[test]
    fn whitelist_by_process_name() {
        assert!(P.is_whitelisted(&meta("sudo", "/usr/bin/sudo")));
        assert!(!P.is_whitelisted(&meta("bash", "/bin/bash")));
    }

    #[test]
    fn whitelist_by_binary_prefix() {
        assert!(P.is_whitelisted(&meta("make", "/usr/bin/make")));
        assert!(!P.is_whitelisted(&meta("make", "/opt/make")));
    }

    #[test]
    fn whitelist_by_namespace_inum() {
        assert!(P.is_whitelisted(&meta_in_ns("bash", "/bin/bash", 4_026_531_836)));
        assert!(!P.is_whitelisted(&meta_in_ns("bash", "/bin/bash", 4_026_532_999)));
    }

    #[test]
    fn fnv_hash_is_stable_and_distinct() {
        assert_eq!(fnv1a64(b"a"), fnv1a64(b"a"));
        assert_ne!(fnv1a64(b"a"), fnv1a64(b"b"));
    }

    #[test]
    fn step_match_exact_vs_class() {
        let exact = StepMatch::Exact(59);
        assert!(exact.matches(59));
        assert!(!exact.matches(60));

        let class = StepMatch::Class(crate::classifier::SyscallClass::NETWORK);
        assert!(class.matches(crate::classifier::syscalls::CONNECT));
        assert!(!class.matches(crate::classifier::syscalls::EXECVE));
    }
}
