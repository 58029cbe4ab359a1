//! Interfaces exposed by Guardian Shield's other two layers. Neither
//! Inquisitor (the kernel-space execution arbiter) nor Warden (the
//! LD_PRELOAD interposer) is implemented here: only the surface Grimoire
//! observes or calls into.

/// Inquisitor's blocked-execname set: basenames it vetoes at
/// `bprm_check_security`. Grimoire doesn't enforce against this set itself,
/// but a match against an already-blocked name is worth a distinct log
/// annotation rather than a silent duplicate alert.
pub trait BlockedExecnames {
    fn is_blocked(&self, basename: &str) -> bool;
}

/// A static, in-memory stand-in for Inquisitor's set, useful for tests and
/// for a Grimoire instance running without a live Inquisitor attached.
#[derive(Debug, Default)]
pub struct StaticBlockedExecnames {
    names: Vec<String>,
}

impl StaticBlockedExecnames {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }
}

impl BlockedExecnames for StaticBlockedExecnames {
    fn is_blocked(&self, basename: &str) -> bool {
        self.names.iter().any(|n| n == basename)
    }
}

/// Warden's policy-decision hook: given a syscall Warden has intercepted in
/// the target process's address space, should it be allowed to proceed?
/// Grimoire never calls this: it's the shape Warden expects its host
/// application to implement, reproduced here only so the boundary between
/// the two layers is explicit in code, not just in prose.
pub trait PolicyDecision {
    fn allow(&self, pid: u32, syscall_nr: u32) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_blocked_execnames_matches_by_exact_basename() {
        let set = StaticBlockedExecnames::new(vec!["ncat".to_string(), "socat".to_string()]);
        assert!(set.is_blocked("ncat"));
        assert!(!set.is_blocked("bash"));
    }
}
