//! Syscall classifier: pure mapping from a syscall number to the set of
//! behavioral classes it belongs to (§4.2).
//!
//! Each class is a bit in `SyscallClass`; a step matches "by class" when
//! `step.class & classify(nr) != 0`. Numbers are x86_64 syscall numbers,
//! matching the convention already used by the teacher's eBPF `syscall_name`
//! lookup in `ebpf/loader.rs`.

/// A bitmask grouping of syscall numbers by behavioral category.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallClass(pub u32);

impl SyscallClass {
    pub const NONE: u32 = 0;
    pub const NETWORK: u32 = 1 << 0;
    pub const FILE_READ: u32 = 1 << 1;
    pub const FILE_WRITE: u32 = 1 << 2;
    pub const PROCESS_CREATE: u32 = 1 << 3;
    pub const FD_DUP: u32 = 1 << 4;
    pub const PRIVILEGE: u32 = 1 << 5;
    pub const KERNEL_MODULE: u32 = 1 << 6;
    pub const MEMORY_MAP: u32 = 1 << 7;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn intersects(self, other: u32) -> bool {
        (self.0 & other) != 0
    }
}

/// x86_64 syscall numbers for every syscall named in base spec §4.2.
mod nr {
    pub const READ: u32 = 0;
    pub const WRITE: u32 = 1;
    pub const OPEN: u32 = 2;
    pub const PREAD64: u32 = 17;
    pub const READV: u32 = 19;
    pub const WRITEV: u32 = 20;
    pub const PWRITE64: u32 = 18;
    pub const SOCKET: u32 = 41;
    pub const CONNECT: u32 = 42;
    pub const ACCEPT: u32 = 43;
    pub const SENDTO: u32 = 44;
    pub const RECVFROM: u32 = 45;
    pub const BIND: u32 = 49;
    pub const MMAP: u32 = 9;
    pub const MPROTECT: u32 = 10;
    pub const MREMAP: u32 = 25;
    pub const FTRUNCATE: u32 = 77;
    pub const DUP: u32 = 32;
    pub const DUP2: u32 = 33;
    pub const DUP3: u32 = 292;
    pub const CLONE: u32 = 56;
    pub const FORK: u32 = 57;
    pub const VFORK: u32 = 58;
    pub const EXECVE: u32 = 59;
    pub const EXECVEAT: u32 = 322;
    pub const SETUID: u32 = 105;
    pub const SETGID: u32 = 106;
    pub const SETREUID: u32 = 113;
    pub const SETRESUID: u32 = 117;
    pub const CAPSET: u32 = 126;
    pub const INIT_MODULE: u32 = 175;
    pub const FINIT_MODULE: u32 = 313;
    pub const DELETE_MODULE: u32 = 176;
    pub const OPENAT: u32 = 257;
}

/// Classify a syscall number into the set of behavioral classes it belongs
/// to. A syscall may belong to more than one class (e.g. `openat` with
/// `O_CREAT|O_WRONLY` is both a read and write path in practice, but here we
/// classify by the syscall's primary intent as base spec §4.2 lists it).
pub fn classify(syscall_nr: u32) -> SyscallClass {
    use nr::*;

    let bits = match syscall_nr {
        SOCKET | CONNECT | BIND | ACCEPT | SENDTO | RECVFROM => SyscallClass::NETWORK,
        OPEN | OPENAT | READ | PREAD64 | READV => SyscallClass::FILE_READ,
        WRITE | PWRITE64 | WRITEV | FTRUNCATE => SyscallClass::FILE_WRITE,
        CLONE | FORK | VFORK | EXECVE | EXECVEAT => SyscallClass::PROCESS_CREATE,
        DUP | DUP2 | DUP3 => SyscallClass::FD_DUP,
        SETUID | SETGID | SETREUID | SETRESUID | CAPSET => SyscallClass::PRIVILEGE,
        INIT_MODULE | FINIT_MODULE | DELETE_MODULE => SyscallClass::KERNEL_MODULE,
        MMAP | MREMAP | MPROTECT => SyscallClass::MEMORY_MAP,
        _ => SyscallClass::NONE,
    };

    SyscallClass::new(bits)
}

/// Syscall numbers referenced by name elsewhere in the crate (built-in
/// patterns, scenario tests). Re-exported so callers don't hardcode magic
/// numbers a second time.
pub mod syscalls {
    pub use super::nr::*;
}

/// Every syscall number this crate knows how to classify. Used to expand a
/// class-based step into the concrete set of syscall numbers the producer
/// needs to pre-filter on (§4.2's monitored-syscalls map is populated from
/// names, not classes).
pub const ALL_KNOWN: &[u32] = &[
    nr::READ,
    nr::WRITE,
    nr::OPEN,
    nr::PREAD64,
    nr::READV,
    nr::WRITEV,
    nr::PWRITE64,
    nr::SOCKET,
    nr::CONNECT,
    nr::ACCEPT,
    nr::SENDTO,
    nr::RECVFROM,
    nr::BIND,
    nr::MMAP,
    nr::MPROTECT,
    nr::MREMAP,
    nr::FTRUNCATE,
    nr::DUP,
    nr::DUP2,
    nr::DUP3,
    nr::CLONE,
    nr::FORK,
    nr::VFORK,
    nr::EXECVE,
    nr::EXECVEAT,
    nr::SETUID,
    nr::SETGID,
    nr::SETREUID,
    nr::SETRESUID,
    nr::CAPSET,
    nr::INIT_MODULE,
    nr::FINIT_MODULE,
    nr::DELETE_MODULE,
    nr::OPENAT,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_syscalls() {
        let c = classify(syscalls::CONNECT);
        assert!(c.intersects(SyscallClass::NETWORK));
        assert!(!c.intersects(SyscallClass::FILE_READ));
    }

    #[test]
    fn classifies_process_create() {
        let c = classify(syscalls::EXECVE);
        assert!(c.intersects(SyscallClass::PROCESS_CREATE));
    }

    #[test]
    fn unknown_syscall_has_no_class() {
        let c = classify(999_999);
        assert_eq!(c.bits(), SyscallClass::NONE);
    }

    #[test]
    fn fd_dup_and_privilege_are_distinct() {
        let dup = classify(syscalls::DUP2);
        let priv_ = classify(syscalls::SETUID);
        assert!(dup.intersects(SyscallClass::FD_DUP));
        assert!(!dup.intersects(SyscallClass::PRIVILEGE));
        assert!(priv_.intersects(SyscallClass::PRIVILEGE));
        assert!(!priv_.intersects(SyscallClass::FD_DUP));
    }
}
