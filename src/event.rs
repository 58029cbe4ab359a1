//! The ring-buffer wire record (§3, §6).
//!
//! Field order and types must stay byte-for-byte identical to
//! `grimoire-ebpf`'s `SyscallEvent`: the eBPF side writes this struct
//! directly into the ring buffer with no serialization step. Base spec §9
//! (open question d) flags the discrepancy between its "64-byte" framing and
//! its own explicit six-argument field list (which sums to 72 bytes); this
//! implementation keeps all six arguments, since `ArgConstraint::arg_index`
//! ranges over 0..=5 and several seed patterns (connect, dup2, execve)
//! constrain arguments past index 3.

use crate::oracle::EXIT_SENTINEL;

/// The raw record read off the ring buffer, one per observed syscall (or one
/// synthetic exit notification, see `is_exit_notification`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallEvent {
    pub syscall_nr: u32,
    /// Host-namespace PID. Always host-scope unless `degraded()` is true,
    /// in which case it is the naive (possibly container-local) PID and
    /// must be treated as host-scope per §4.1.
    pub pid: u32,
    pub timestamp_ns: u64,
    pub args: [u64; 6],
    pub ns_inum: u32,
    pub flags: u32,
}

/// Bit 0 of `flags`: host-PID resolution fell back to the naive PID.
const FLAG_DEGRADED: u32 = 1 << 0;

impl SyscallEvent {
    pub fn degraded(&self) -> bool {
        self.flags & FLAG_DEGRADED != 0
    }

    /// True for the synthetic process-exit notification emitted by the
    /// producer's `sched_process_exit` hook (SPEC_FULL §B).
    pub fn is_exit_notification(&self) -> bool {
        self.syscall_nr == EXIT_SENTINEL
    }
}

/// Marker trait implemented only when the `ebpf` feature is active, so the
/// aya map types can treat `SyscallEvent` as a plain-old-data record without
/// pulling `aya::Pod` into builds that never touch a BPF map.
#[cfg(feature = "ebpf")]
unsafe impl aya::Pod for SyscallEvent {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_size_matches_producer() {
        // 4 + 4 + 8 + 48 + 4 + 4 = 72 bytes; see module docs.
        assert_eq!(std::mem::size_of::<SyscallEvent>(), 72);
    }

    #[test]
    fn degraded_flag_roundtrips() {
        let mut ev = SyscallEvent {
            syscall_nr: 59,
            pid: 100,
            timestamp_ns: 0,
            args: [0; 6],
            ns_inum: 0,
            flags: 0,
        };
        assert!(!ev.degraded());
        ev.flags |= FLAG_DEGRADED;
        assert!(ev.degraded());
    }

    #[test]
    fn exit_sentinel_is_recognized() {
        let ev = SyscallEvent {
            syscall_nr: EXIT_SENTINEL,
            pid: 1,
            timestamp_ns: 0,
            args: [0; 6],
            ns_inum: 0,
            flags: 0,
        };
        assert!(ev.is_exit_notification());
    }
}
