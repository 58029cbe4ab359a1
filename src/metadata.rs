//! Process metadata resolver (§4.4).
//!
//! Pure with respect to the engine: it only reads `/proc`. Resolution
//! happens once per track (lazily, on the track's first event) and the
//! result is cached on the `ProcessTrack`.

use std::fs;
use std::path::Path;

/// Cached, resolved metadata for a host-namespace PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMeta {
    pub basename: String,
    pub exe_path: String,
    pub ns_inum: u32,
    pub container: bool,
}

/// Error resolving a process's metadata. Every variant means "treat as
/// exited" per §4.4/§7: there is no retry path, only track eviction.
#[derive(Debug)]
pub enum ResolveError {
    ProcessVanished,
    Io(std::io::Error),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::ProcessVanished => write!(f, "process vanished during resolution"),
            ResolveError::Io(e) => write!(f, "metadata resolution I/O error: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Resolves `/proc/<pid>/exe` and `/proc/<pid>/ns/pid` into a `ProcessMeta`.
/// Holds the init PID namespace's inode, captured once at startup from
/// `/proc/1/ns/pid`, against which every resolved process is classified as
/// host- or container-scope.
pub struct MetadataResolver {
    init_pid_ns_inum: u32,
    /// Overrides `read_cwd` with a fixed value instead of reading
    /// `/proc/<pid>/cwd`. Only ever set by `with_fixed_cwd`, for tests that
    /// need a resolvable cwd without a real process to back it.
    fixed_cwd: Option<String>,
    /// Overrides `resolve` with a fixed (exe_path, ns_inum) pair instead of
    /// reading `/proc/<pid>/exe` and `/proc/<pid>/ns/pid`. Only ever set by
    /// `with_fixed_meta`, for tests that need a synthetic PID to resolve
    /// successfully without a real process behind it.
    fixed_meta: Option<(String, u32)>,
}

impl MetadataResolver {
    /// Capture the init PID namespace's inode. Must be called once at
    /// startup, before any event is processed.
    pub fn new() -> Result<Self, ResolveError> {
        let init_pid_ns_inum = read_ns_inum(1)?;
        Ok(Self {
            init_pid_ns_inum,
            fixed_cwd: None,
            fixed_meta: None,
        })
    }

    /// Build a resolver around a known init PID namespace inode, skipping
    /// the `/proc/1/ns/pid` read. For tests and fixtures that don't have a
    /// real init process to read.
    pub fn with_init_ns_inum(init_pid_ns_inum: u32) -> Self {
        Self {
            init_pid_ns_inum,
            fixed_cwd: None,
            fixed_meta: None,
        }
    }

    /// Pin `read_cwd` to always return `cwd`, regardless of `pid`. For tests
    /// exercising a path constraint without a real process whose cwd can be
    /// arranged.
    pub fn with_fixed_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.fixed_cwd = Some(cwd.into());
        self
    }

    /// Pin `resolve` to always succeed with `exe_path`/`ns_inum`, regardless
    /// of `pid`. For tests that need a synthetic PID's track to survive
    /// whitelist resolution without a real process backing it; omit this to
    /// exercise the vanished-process / track-deletion path instead.
    pub fn with_fixed_meta(mut self, exe_path: impl Into<String>, ns_inum: u32) -> Self {
        self.fixed_meta = Some((exe_path.into(), ns_inum));
        self
    }

    pub fn init_pid_ns_inum(&self) -> u32 {
        self.init_pid_ns_inum
    }

    /// Resolve metadata for `pid`. Returns `ResolveError::ProcessVanished`
    /// if `/proc/<pid>` no longer exists, which the caller treats exactly
    /// like an explicit process-exit notification (§4.4).
    pub fn resolve(&self, pid: u32) -> Result<ProcessMeta, ResolveError> {
        if let Some((exe_path, ns_inum)) = &self.fixed_meta {
            let basename = Path::new(exe_path)
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| exe_path.clone());
            let container = *ns_inum != self.init_pid_ns_inum;
            return Ok(ProcessMeta {
                basename,
                exe_path: exe_path.clone(),
                ns_inum: *ns_inum,
                container,
            });
        }

        let exe_path = read_exe_path(pid)?;
        let basename = Path::new(&exe_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| exe_path.clone());

        let ns_inum = read_ns_inum(pid)?;
        let container = ns_inum != self.init_pid_ns_inum;

        Ok(ProcessMeta {
            basename,
            exe_path,
            ns_inum,
            container,
        })
    }

    /// Best-effort read of a process's cwd, used when resolving path
    /// constraints that reference a relative path argument. Fail-closed:
    /// any error surfaces as `None`, never a stale or default path.
    pub fn read_cwd(&self, pid: u32) -> Option<String> {
        if let Some(cwd) = &self.fixed_cwd {
            return Some(cwd.clone());
        }
        fs::read_link(format!("/proc/{}/cwd", pid))
            .ok()
            .map(|p| p.to_string_lossy().into_owned())
    }
}

fn read_exe_path(pid: u32) -> Result<String, ResolveError> {
    match fs::read_link(format!("/proc/{}/exe", pid)) {
        Ok(path) => Ok(path.to_string_lossy().into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ResolveError::ProcessVanished),
        Err(e) => Err(ResolveError::Io(e)),
    }
}

fn read_ns_inum(pid: u32) -> Result<u32, ResolveError> {
    let link = match fs::read_link(format!("/proc/{}/ns/pid", pid)) {
        Ok(link) => link,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ResolveError::ProcessVanished)
        }
        Err(e) => return Err(ResolveError::Io(e)),
    };

    // Link target looks like "pid:[4026531836]".
    let text = link.to_string_lossy();
    let inum = text
        .rsplit_once('[')
        .and_then(|(_, rest)| rest.strip_suffix(']'))
        .and_then(|digits| digits.parse::<u32>().ok())
        .ok_or(ResolveError::ProcessVanished)?;

    Ok(inum)
}
