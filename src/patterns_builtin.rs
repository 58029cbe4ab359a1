//! The shipped attack signatures (§8). Five patterns covering the seed
//! scenarios; every id is derived from the pattern's name so it's stable
//! across rebuilds without a hand-maintained number.

use crate::classifier::{syscalls, SyscallClass};
use crate::constraint::{ArgConstraint, ArgOp, PathConstraint};
use crate::pattern::{fnv1a64, Pattern, Severity, Step, StepMatch};

// -- reverse_shell_classic -------------------------------------------------
//
// socket() -> connect() -> dup2() (x3, stdin/stdout/stderr) -> execve()
// within a 2-second window. The dup2 step requires three matches (one per
// standard fd) before advancing.

const REVERSE_SHELL_STEPS: [Step; 4] = [
    Step {
        match_kind: StepMatch::Exact(syscalls::SOCKET),
        constraints: &[],
        path_constraint: None,
        min_count: 1,
        max_count: 0,
        max_distance_ns: 0,
        terminal: false,
    },
    Step {
        match_kind: StepMatch::Exact(syscalls::CONNECT),
        constraints: &[],
        path_constraint: None,
        min_count: 1,
        max_count: 0,
        max_distance_ns: 500_000_000,
        terminal: false,
    },
    Step {
        match_kind: StepMatch::Class(SyscallClass::FD_DUP),
        constraints: &[],
        path_constraint: None,
        min_count: 3,
        max_count: 3,
        max_distance_ns: 200_000_000,
        terminal: false,
    },
    Step {
        match_kind: StepMatch::Exact(syscalls::EXECVE),
        constraints: &[],
        path_constraint: None,
        min_count: 1,
        max_count: 0,
        max_distance_ns: 300_000_000,
        terminal: true,
    },
];

// -- fork_bomb_rapid --------------------------------------------------------
//
// 200 or more fork/clone/vfork syscalls from the same PID inside 100ms (§8.2
// seed scenario). One step, high count, tight window; whitelists
// interpreters that legitimately fork a lot (build tools, shells running
// test suites). Constrained to `clone` calls with `CLONE_VM` clear (§8.2),
// since a `clone(CLONE_VM)` call creates a thread sharing the caller's
// address space, not a new process; a legitimate rapidly-multithreading
// program would otherwise falsely match.

/// `clone(2)`'s `CLONE_VM` flag: the new task shares the caller's memory
/// space. Set for threads, clear for a real `fork`/`vfork`/plain `clone`.
const CLONE_VM: u64 = 0x100;

const FORK_BOMB_STEPS: [Step; 1] = [Step {
    match_kind: StepMatch::Class(SyscallClass::PROCESS_CREATE),
    constraints: &[ArgConstraint::new(0, ArgOp::BitmaskClear, CLONE_VM)],
    path_constraint: None,
    min_count: 200,
    max_count: 0,
    max_distance_ns: 0,
    terminal: true,
}];

// -- privesc_setuid_root ----------------------------------------------------
//
// §8.3 seed scenario: a read of /etc/shadow, then setuid(0) (the argument
// constraint that the target uid is exactly 0: the resolver doesn't track
// live uid, so the meaningful signal is "asked to become root"), then
// execve, all within 500ms.

const PRIVESC_STEPS: [Step; 3] = [
    Step {
        match_kind: StepMatch::Class(SyscallClass::FILE_READ),
        constraints: &[],
        path_constraint: Some(PathConstraint::new(1, 0)),
        min_count: 1,
        max_count: 0,
        max_distance_ns: 0,
        terminal: false,
    },
    Step {
        match_kind: StepMatch::Exact(syscalls::SETUID),
        constraints: &[ArgConstraint::new(0, ArgOp::Equals, 0)],
        path_constraint: None,
        min_count: 1,
        max_count: 0,
        max_distance_ns: 500_000_000,
        terminal: false,
    },
    Step {
        match_kind: StepMatch::Exact(syscalls::EXECVE),
        constraints: &[],
        path_constraint: None,
        min_count: 1,
        max_count: 0,
        max_distance_ns: 500_000_000,
        terminal: true,
    },
];

// -- cred_exfil_ssh_key -----------------------------------------------------
//
// A read against a path under ~/.ssh followed by a network send, inside 5
// seconds (§8.4 seed scenario). Path matching is resolved against the
// process's cwd by the engine at match time (§4.3); `path_prefixes[0]` is
// matched as a path component anywhere in the resolved cwd, covering the
// common case of a script run from (or under) the victim's `.ssh` directory.

const CRED_EXFIL_STEPS: [Step; 2] = [
    Step {
        match_kind: StepMatch::Class(SyscallClass::FILE_READ),
        constraints: &[],
        path_constraint: Some(PathConstraint::new(1, 0)),
        min_count: 1,
        max_count: 0,
        max_distance_ns: 0,
        terminal: false,
    },
    Step {
        match_kind: StepMatch::Class(SyscallClass::NETWORK),
        constraints: &[],
        path_constraint: None,
        min_count: 1,
        max_count: 0,
        max_distance_ns: 5_000_000_000,
        terminal: true,
    },
];

// -- rootkit_module_load ----------------------------------------------------
//
// A single init_module/finit_module call is the whole pattern: kernel
// module loading by an unprivileged-looking process is significant enough
// on its own, not a sequence. Whitelists the host's own module-loading
// tooling.

const ROOTKIT_STEPS: [Step; 1] = [Step {
    match_kind: StepMatch::Class(SyscallClass::KERNEL_MODULE),
    constraints: &[],
    path_constraint: None,
    min_count: 1,
    max_count: 0,
    max_distance_ns: 0,
    terminal: true,
}];

/// The full shipped pattern table, in the order patterns are evaluated for
/// each track. Index stability matters: `ProcessTrack::slots` is indexed in
/// parallel with this slice.
pub static PATTERNS: [Pattern; 5] = [
    Pattern {
        id: fnv1a64(b"reverse_shell_classic"),
        name: "reverse_shell_classic",
        severity: Severity::Critical,
        steps: &REVERSE_SHELL_STEPS,
        window_ns: 2_000_000_000,
        whitelist_process_names: &["sshd", "ssh"],
        whitelist_binary_path_prefixes: &["/usr/sbin/sshd"],
        whitelist_namespace_inums: &[],
        path_prefixes: &[],
    },
    Pattern {
        id: fnv1a64(b"fork_bomb_rapid"),
        name: "fork_bomb_rapid",
        severity: Severity::High,
        steps: &FORK_BOMB_STEPS,
        window_ns: 100_000_000,
        whitelist_process_names: &["make", "ninja", "cargo", "pytest"],
        whitelist_binary_path_prefixes: &["/usr/bin/make", "/usr/bin/cargo"],
        whitelist_namespace_inums: &[],
        path_prefixes: &[],
    },
    Pattern {
        id: fnv1a64(b"privesc_setuid_root"),
        name: "privesc_setuid_root",
        severity: Severity::Critical,
        steps: &PRIVESC_STEPS,
        window_ns: 500_000_000,
        whitelist_process_names: &["sudo", "su", "systemd", "login"],
        whitelist_binary_path_prefixes: &["/usr/bin/sudo", "/bin/su", "/usr/lib/systemd"],
        whitelist_namespace_inums: &[],
        path_prefixes: &["shadow"],
    },
    Pattern {
        id: fnv1a64(b"cred_exfil_ssh_key"),
        name: "cred_exfil_ssh_key",
        severity: Severity::High,
        steps: &CRED_EXFIL_STEPS,
        window_ns: 5_000_000_000,
        whitelist_process_names: &["ssh", "scp", "rsync", "git"],
        whitelist_binary_path_prefixes: &["/usr/bin/ssh", "/usr/bin/git"],
        whitelist_namespace_inums: &[],
        path_prefixes: &[".ssh"],
    },
    Pattern {
        id: fnv1a64(b"rootkit_module_load"),
        name: "rootkit_module_load",
        severity: Severity::Critical,
        steps: &ROOTKIT_STEPS,
        window_ns: 1_000_000_000,
        whitelist_process_names: &["modprobe", "insmod", "kmod"],
        whitelist_binary_path_prefixes: &["/usr/sbin/modprobe", "/sbin/insmod"],
        whitelist_namespace_inums: &[],
        path_prefixes: &[],
    },
];
