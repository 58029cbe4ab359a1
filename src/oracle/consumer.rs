//! Real `aya`-backed event source: loads `grimoire-oracle.o`, attaches its
//! two tracepoints, and drains the `grimoire_events` ring buffer.
//!
//! Follows the same load/attach shape as the teacher's `ebpf/tracing`
//! collector, swapped from a per-CPU perf buffer to a single ring buffer
//! (the producer emits into one shared `RingBuf` map, not one per CPU).

use std::collections::HashSet;

use aya::maps::{Array, HashMap as BpfHashMap, MapData, RingBuf};
use aya::programs::TracePoint;
use aya::{include_bytes_aligned, Bpf, Btf};
use aya_obj::btf::{Btf as ObjBtf, BtfKind, BtfType};
use tokio::io::unix::AsyncFd;

use crate::event::SyscallEvent;
use crate::pattern::{Pattern, Step, StepMatch};

#[derive(Debug)]
pub enum OracleError {
    Load(String),
    Attach(String),
    Map(String),
    Btf(String),
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Load(msg) => write!(f, "oracle load error: {}", msg),
            OracleError::Attach(msg) => write!(f, "oracle attach error: {}", msg),
            OracleError::Map(msg) => write!(f, "oracle map error: {}", msg),
            OracleError::Btf(msg) => write!(f, "BTF error: {}", msg),
        }
    }
}

impl std::error::Error for OracleError {}

/// A live, attached producer plus its ring-buffer reader. Dropping this
/// without calling `shutdown` still detaches the programs (aya tears them
/// down on `Bpf`'s drop), but `shutdown` gives a clean, logged exit.
pub struct OracleHandle {
    bpf: Bpf,
    reader: AsyncFd<RingBuf<MapData>>,
}

impl OracleHandle {
    /// Load `grimoire-oracle.o`, populate its maps from `patterns`, and
    /// attach both tracepoints. `init_pid_ns_inum` must be the inode of
    /// `/proc/1/ns/pid`, read once at startup (§4.1).
    pub fn load_with_patterns(patterns: &[Pattern], init_pid_ns_inum: u32) -> Result<Self, OracleError> {
        let btf = Btf::from_sys_fs().map_err(|e| OracleError::Btf(e.to_string()))?;

        let bpf_bytes = include_bytes_aligned!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/target/ebpf/grimoire-oracle.o"
        ));
        let mut bpf = Bpf::load(bpf_bytes).map_err(|e| OracleError::Load(e.to_string()))?;

        attach_tracepoint(&mut bpf, &btf, "sys_enter", "raw_syscalls", "sys_enter")?;
        attach_tracepoint(&mut bpf, &btf, "trace_exit", "sched", "sched_process_exit")?;

        populate_monitored_syscalls(&mut bpf, patterns)?;
        populate_init_ns(&mut bpf, init_pid_ns_inum)?;
        populate_task_field_offsets(&mut bpf)?;

        let ring_buf: RingBuf<_> = bpf
            .take_map("GRIMOIRE_EVENTS")
            .ok_or_else(|| OracleError::Map("GRIMOIRE_EVENTS not found".to_string()))?
            .try_into()
            .map_err(|e: aya::maps::MapError| OracleError::Map(e.to_string()))?;

        let reader = AsyncFd::new(ring_buf).map_err(|e| OracleError::Map(e.to_string()))?;

        tracing::info!("grimoire oracle attached: sys_enter, trace_exit");

        Ok(Self { bpf, reader })
    }

    pub fn load(patterns: &[Pattern], init_pid_ns_inum: u32) -> Result<Self, OracleError> {
        Self::load_with_patterns(patterns, init_pid_ns_inum)
    }

    /// Read the next event, awaiting ring-buffer readiness. Returns `None`
    /// only if the ring buffer itself is gone (producer unloaded).
    pub async fn next_event(&mut self) -> Option<SyscallEvent> {
        loop {
            let mut guard = match self.reader.readable_mut().await {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!(error = %e, "ring buffer became unreadable");
                    return None;
                }
            };

            let ring_buf = guard.get_inner_mut();
            if let Some(item) = ring_buf.next() {
                guard.clear_ready();
                if item.len() < std::mem::size_of::<SyscallEvent>() {
                    tracing::warn!(len = item.len(), "short ring buffer record, dropping");
                    continue;
                }
                let event = unsafe { std::ptr::read_unaligned(item.as_ptr() as *const SyscallEvent) };
                return Some(event);
            }
            guard.clear_ready();
        }
    }

    /// Read the producer's ring-buffer-overrun drop counter (§8: "producer
    /// drop counter is monotonically non-decreasing"). Best-effort: a read
    /// failure reports 0 rather than hiding the rest of the shutdown summary
    /// behind an error.
    pub fn dropped_events(&self) -> u64 {
        let map = match self.bpf.map("GRIMOIRE_DROPPED") {
            Some(m) => m,
            None => return 0,
        };
        let array: Array<_, u64> = match map.try_into() {
            Ok(a) => a,
            Err(_) => return 0,
        };
        array.get(0, 0).unwrap_or(0)
    }

    pub async fn shutdown(self) {
        tracing::info!("grimoire oracle detaching");
    }
}

fn attach_tracepoint(
    bpf: &mut Bpf,
    _btf: &Btf,
    program_name: &str,
    category: &str,
    name: &str,
) -> Result<(), OracleError> {
    let program: &mut TracePoint = bpf
        .program_mut(program_name)
        .ok_or_else(|| OracleError::Load(format!("{} program not found", program_name)))?
        .try_into()
        .map_err(|e: aya::programs::ProgramError| OracleError::Load(e.to_string()))?;

    program.load().map_err(|e| OracleError::Load(e.to_string()))?;
    program
        .attach(category, name)
        .map_err(|e| OracleError::Attach(e.to_string()))?;

    Ok(())
}

/// Populate `GRIMOIRE_MONITORED_SYSCALLS` with the union of every syscall
/// number any loaded pattern's steps could match, expanding class-based
/// steps against the known syscall table (§4.1's pre-filter map is keyed by
/// syscall number, not class).
fn populate_monitored_syscalls(bpf: &mut Bpf, patterns: &[Pattern]) -> Result<(), OracleError> {
    let mut map: BpfHashMap<_, u32, u8> = bpf
        .map_mut("GRIMOIRE_MONITORED_SYSCALLS")
        .ok_or_else(|| OracleError::Map("GRIMOIRE_MONITORED_SYSCALLS not found".to_string()))?
        .try_into()
        .map_err(|e: aya::maps::MapError| OracleError::Map(e.to_string()))?;

    let mut wanted: HashSet<u32> = HashSet::new();
    for pattern in patterns {
        for step in pattern.steps {
            collect_step_syscalls(step, &mut wanted);
        }
    }

    for nr in wanted {
        map.insert(nr, 1u8, 0)
            .map_err(|e| OracleError::Map(e.to_string()))?;
    }

    Ok(())
}

fn collect_step_syscalls(step: &Step, wanted: &mut HashSet<u32>) {
    match step.match_kind {
        StepMatch::Exact(nr) => {
            wanted.insert(nr);
        }
        StepMatch::Class(mask) => {
            for &nr in crate::classifier::ALL_KNOWN {
                if crate::classifier::classify(nr).intersects(mask) {
                    wanted.insert(nr);
                }
            }
        }
    }
}

fn populate_init_ns(bpf: &mut Bpf, init_pid_ns_inum: u32) -> Result<(), OracleError> {
    let mut map: Array<_, ffi::NsId> = bpf
        .map_mut("INIT_NS_ID")
        .ok_or_else(|| OracleError::Map("INIT_NS_ID not found".to_string()))?
        .try_into()
        .map_err(|e: aya::maps::MapError| OracleError::Map(e.to_string()))?;

    map.set(
        0,
        ffi::NsId {
            dev: 0,
            ino: init_pid_ns_inum as u64,
        },
        0,
    )
    .map_err(|e| OracleError::Map(e.to_string()))?;

    Ok(())
}

/// Resolve the three `task_struct` member offsets `current_pid_ns_inum`
/// needs from the running kernel's BTF and publish them into
/// `TASK_FIELD_OFFSETS`. A lookup failure anywhere in the chain (a struct or
/// member renamed or absent on this kernel) degrades to all-zero offsets,
/// which the producer's null/bounds checks then treat as "unresolvable"
/// rather than trusting a wrong address.
fn populate_task_field_offsets(bpf: &mut Bpf) -> Result<(), OracleError> {
    let obj_btf = ObjBtf::parse_file("/sys/kernel/btf/vmlinux", aya_obj::Endianness::default())
        .map_err(|e| OracleError::Btf(e.to_string()))?;

    let offsets = resolve_task_field_offsets(&obj_btf).unwrap_or_else(|| {
        tracing::warn!("could not resolve task_struct field offsets from BTF; ns_inum will read as 0");
        ffi::TaskFieldOffsets { nsproxy: 0, pid_ns_for_children: 0, ns_inum: 0 }
    });

    let mut map: Array<_, ffi::TaskFieldOffsets> = bpf
        .map_mut("TASK_FIELD_OFFSETS")
        .ok_or_else(|| OracleError::Map("TASK_FIELD_OFFSETS not found".to_string()))?
        .try_into()
        .map_err(|e: aya::maps::MapError| OracleError::Map(e.to_string()))?;

    map.set(0, offsets, 0)
        .map_err(|e| OracleError::Map(e.to_string()))?;

    Ok(())
}

fn resolve_task_field_offsets(btf: &ObjBtf) -> Option<ffi::TaskFieldOffsets> {
    let nsproxy = struct_member_byte_offset(btf, "task_struct", "nsproxy")?;
    let pid_ns_for_children = struct_member_byte_offset(btf, "nsproxy", "pid_ns_for_children")?;
    // `pid_namespace::ns` is an embedded `ns_common`, whose first member is
    // `inum`, so its offset within `pid_namespace` is also `ns`'s offset.
    let ns_inum = struct_member_byte_offset(btf, "pid_namespace", "ns")?;

    Some(ffi::TaskFieldOffsets { nsproxy, pid_ns_for_children, ns_inum })
}

/// Byte offset of `member` within `struct_name`, read from BTF_KIND_STRUCT
/// member metadata (bit offset, divided down; none of the fields this walk
/// touches are bitfields).
fn struct_member_byte_offset(btf: &ObjBtf, struct_name: &str, member: &str) -> Option<u64> {
    let type_id = btf.id_by_type_name_kind(struct_name, BtfKind::Struct).ok()?;
    let ty = btf.type_by_id(type_id).ok()?;
    let members = match ty {
        BtfType::Struct(s) => &s.members,
        _ => return None,
    };

    for m in members {
        let name = btf.string_at(m.name_offset).ok()?;
        if name == member {
            return Some((m.offset / 8) as u64);
        }
    }
    None
}

/// Mirrors `grimoire-ebpf`'s `NsId` and `TaskFieldOffsets` map layouts. Kept
/// private to this module: nothing else in userspace needs them.
mod ffi {
    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct NsId {
        pub dev: u64,
        pub ino: u64,
    }

    unsafe impl aya::Pod for NsId {}

    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct TaskFieldOffsets {
        pub nsproxy: u64,
        pub pid_ns_for_children: u64,
        pub ns_inum: u64,
    }

    unsafe impl aya::Pod for TaskFieldOffsets {}
}
