//! Startup capability check (SPEC_FULL §A). Grimoire refuses to start
//! without the capabilities its eBPF producer needs: failing fast here is
//! cheaper than discovering a silent load failure later.

use caps::{CapSet, Capability};

const REQUIRED: &[Capability] = &[
    Capability::CAP_BPF,
    Capability::CAP_PERFMON,
    Capability::CAP_SYS_PTRACE,
];

#[derive(Debug)]
pub struct MissingCapabilities(pub Vec<Capability>);

impl std::fmt::Display for MissingCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|&c| cap_name(c)).collect();
        write!(f, "missing required capabilities: {}", names.join(", "))
    }
}

fn cap_name(cap: Capability) -> &'static str {
    match cap {
        Capability::CAP_BPF => "CAP_BPF",
        Capability::CAP_PERFMON => "CAP_PERFMON",
        Capability::CAP_SYS_PTRACE => "CAP_SYS_PTRACE",
        _ => "CAP_UNKNOWN",
    }
}

impl std::error::Error for MissingCapabilities {}

/// Check that the running process holds every capability Grimoire's eBPF
/// producer needs (CAP_BPF, CAP_PERFMON for loading/attaching; CAP_SYS_PTRACE
/// for `/proc/<pid>/exe` resolution of processes we don't own). Does not
/// drop or raise anything: read-only, per §6.
pub fn check_required_capabilities() -> Result<(), MissingCapabilities> {
    let mut missing = Vec::new();
    for &cap in REQUIRED {
        match caps::has_cap(None, CapSet::Effective, cap) {
            Ok(true) => {}
            Ok(false) | Err(_) => missing.push(cap),
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingCapabilities(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_capabilities_display_lists_names() {
        let err = MissingCapabilities(vec![Capability::CAP_BPF, Capability::CAP_PERFMON]);
        let msg = err.to_string();
        assert!(msg.contains("CAP_BPF"));
        assert!(msg.contains("CAP_PERFMON"));
    }
}
