//! Grimoire's eBPF producer: raw syscall tracepoint + host-PID resolution.
//!
//! Attaches to `raw_syscalls/sys_enter` for every syscall the pattern table
//! cares about (pre-filtered via `GRIMOIRE_MONITORED_SYSCALLS`, populated once
//! from userspace) and to `sched/sched_process_exit` unconditionally so the
//! engine can evict a process track the moment its subject exits, even when
//! `exit`/`exit_group` never appear in a pattern's steps.
//!
//! Host-namespace PID resolution uses `bpf_get_ns_current_pid_tgid` against
//! the init PID namespace's (dev, inode) pair, which userspace resolves once
//! at startup from `/proc/1/ns/pid` and publishes into `INIT_NS_ID`. Kernels
//! without the helper (pre-5.7) cause the call to fail at runtime; the event
//! falls back to the naive container-local PID and is tagged degraded so
//! consumers can treat it as host-scope without translation.

#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::bpf_pidns_info,
    helpers::{
        bpf_get_current_pid_tgid, bpf_get_current_task, bpf_get_ns_current_pid_tgid,
        bpf_ktime_get_ns, bpf_probe_read_kernel,
    },
    macros::{map, tracepoint},
    maps::{Array, HashMap, RingBuf},
    programs::TracePointContext,
};

/// Maximum distinct syscall numbers the pattern table can ask us to watch.
const MAX_MONITORED_SYSCALLS: u32 = 512;

/// Ring buffer capacity in bytes. Must be a power of two, >= 512 KiB (§6).
const EVENTS_RING_SIZE: u32 = 1024 * 1024;

/// Reserved syscall_nr value meaning "this record is a process-exit
/// notification, not a real syscall" (see module docs and SPEC_FULL §B).
pub const EXIT_SENTINEL: u32 = u32::MAX;

/// Bit 0 of `SyscallEvent::flags`: host-PID resolution fell back to the
/// naive (container-local) PID because `bpf_get_ns_current_pid_tgid` failed.
pub const FLAG_DEGRADED: u32 = 1 << 0;

/// Wire record shared with userspace. Kept in sync with
/// `grimoire::event::SyscallEvent`: any discrepancy is a bug, not a design
/// choice (base spec §9, open question d).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SyscallEvent {
    pub syscall_nr: u32,
    pub pid: u32,
    pub timestamp_ns: u64,
    pub args: [u64; 6],
    pub ns_inum: u32,
    pub flags: u32,
}

/// (dev, ino) pair identifying the init PID namespace, written once by
/// userspace at startup from `stat("/proc/1/ns/pid")`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NsId {
    pub dev: u64,
    pub ino: u64,
}

/// Byte offsets of the fields `current_pid_ns_inum` walks, resolved once by
/// the loader against the running kernel's BTF and published here. These
/// offsets aren't stable ABI and drift across kernel versions; hardcoding
/// them would silently corrupt the walk on a kernel this binary wasn't built
/// against.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TaskFieldOffsets {
    /// `task_struct::nsproxy`
    pub nsproxy: u64,
    /// `nsproxy::pid_ns_for_children`
    pub pid_ns_for_children: u64,
    /// `pid_namespace::ns.inum` (the `ns_common` embedded in `pid_namespace`)
    pub ns_inum: u64,
}

/// User-populated set of syscall numbers appearing in any loaded pattern's
/// steps (the union, including class expansion for class-only steps).
#[map]
static GRIMOIRE_MONITORED_SYSCALLS: HashMap<u32, u8> =
    HashMap::with_max_entries(MAX_MONITORED_SYSCALLS, 0);

/// Single-entry config map holding the init PID namespace identity.
#[map]
static INIT_NS_ID: Array<NsId> = Array::with_max_entries(1, 0);

/// Single-entry config map holding the CO-RE-relocated task_struct field
/// offsets `current_pid_ns_inum` needs.
#[map]
static TASK_FIELD_OFFSETS: Array<TaskFieldOffsets> = Array::with_max_entries(1, 0);

/// The event ring buffer itself. Name and sizing fixed by §6.
#[map]
static GRIMOIRE_EVENTS: RingBuf = RingBuf::with_byte_size(EVENTS_RING_SIZE, 0);

/// Count of events dropped due to ring-buffer reservation failure
/// (overrun). Monotonically non-decreasing per §8.
#[map]
static GRIMOIRE_DROPPED: Array<u64> = Array::with_max_entries(1, 0);

#[tracepoint]
pub fn sys_enter(ctx: TracePointContext) -> u32 {
    match try_sys_enter(&ctx) {
        Ok(ret) => ret,
        Err(_) => 0,
    }
}

fn try_sys_enter(ctx: &TracePointContext) -> Result<u32, i64> {
    // Common tracepoint format for raw_syscalls/sys_enter: id at offset 8,
    // the six syscall arguments starting at offset 16.
    let syscall_nr: u32 = unsafe { ctx.read_at(8)? };

    if unsafe { GRIMOIRE_MONITORED_SYSCALLS.get(&syscall_nr) }.is_none() {
        return Ok(0);
    }

    let mut args = [0u64; 6];
    for (i, slot) in args.iter_mut().enumerate() {
        *slot = unsafe { ctx.read_at(16 + i * 8)? };
    }

    let (pid, flags) = resolve_host_pid();
    let ns_inum = current_pid_ns_inum();
    let timestamp_ns = unsafe { bpf_ktime_get_ns() };

    emit(SyscallEvent {
        syscall_nr,
        pid,
        timestamp_ns,
        args,
        ns_inum,
        flags,
    });

    Ok(0)
}

#[tracepoint]
pub fn trace_exit(ctx: TracePointContext) -> u32 {
    match try_trace_exit(&ctx) {
        Ok(ret) => ret,
        Err(_) => 0,
    }
}

fn try_trace_exit(_ctx: &TracePointContext) -> Result<u32, i64> {
    let (pid, flags) = resolve_host_pid();
    let ns_inum = current_pid_ns_inum();
    let timestamp_ns = unsafe { bpf_ktime_get_ns() };

    emit(SyscallEvent {
        syscall_nr: EXIT_SENTINEL,
        pid,
        timestamp_ns,
        args: [0; 6],
        ns_inum,
        flags,
    });

    Ok(0)
}

/// Resolve the calling task's host-namespace PID. Returns the naive PID and
/// `FLAG_DEGRADED` set when the init-namespace identity hasn't been
/// published yet or the helper is unavailable on this kernel.
fn resolve_host_pid() -> (u32, u32) {
    let naive_pid = (unsafe { bpf_get_current_pid_tgid() } & 0xFFFF_FFFF) as u32;

    let ns_id = match INIT_NS_ID.get(0) {
        Some(id) => *id,
        None => return (naive_pid, FLAG_DEGRADED),
    };

    let mut info = bpf_pidns_info { pid: 0, tgid: 0 };
    let ret = unsafe {
        bpf_get_ns_current_pid_tgid(
            ns_id.dev,
            ns_id.ino,
            &mut info as *mut bpf_pidns_info,
            core::mem::size_of::<bpf_pidns_info>() as u32,
        )
    };

    if ret != 0 || info.tgid == 0 {
        (naive_pid, FLAG_DEGRADED)
    } else {
        (info.tgid, 0)
    }
}

/// Read the calling task's PID-namespace inode by walking
/// `task->nsproxy->pid_ns_for_children->ns.inum` through CO-RE-relocated
/// field offsets. Best-effort: any failure along the chain (offsets not yet
/// published, a null pointer, a rejected kernel read) does not block the
/// event, it only leaves `ns_inum` as 0 (consumers then cannot tell
/// container-scope from host-scope and must treat the event conservatively
/// as host-scope).
fn current_pid_ns_inum() -> u32 {
    let offsets = match TASK_FIELD_OFFSETS.get(0) {
        Some(o) => *o,
        None => return 0,
    };

    let task = unsafe { bpf_get_current_task() } as *const u8;
    if task.is_null() {
        return 0;
    }

    let nsproxy: u64 = match unsafe { bpf_probe_read_kernel(task.add(offsets.nsproxy as usize) as *const u64) } {
        Ok(ptr) if ptr != 0 => ptr,
        _ => return 0,
    };

    let pid_ns: u64 = match unsafe {
        bpf_probe_read_kernel((nsproxy as *const u8).add(offsets.pid_ns_for_children as usize) as *const u64)
    } {
        Ok(ptr) if ptr != 0 => ptr,
        _ => return 0,
    };

    match unsafe {
        bpf_probe_read_kernel((pid_ns as *const u8).add(offsets.ns_inum as usize) as *const u32)
    } {
        Ok(inum) => inum,
        Err(_) => 0,
    }
}

fn emit(event: SyscallEvent) {
    match GRIMOIRE_EVENTS.reserve::<SyscallEvent>(0) {
        Some(mut entry) => {
            entry.write(event);
            entry.submit(0);
        }
        None => {
            let count = GRIMOIRE_DROPPED.get(0).copied().unwrap_or(0);
            let _ = GRIMOIRE_DROPPED.set(0, &(count + 1), 0);
        }
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
