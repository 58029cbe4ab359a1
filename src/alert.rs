//! Append-only alert log (§6). One JSON object per line, `flock`-exclusive
//! per write so concurrent writers (shouldn't happen, but the log outlives
//! any one process restart) never interleave partial records.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::MatchResult;
use crate::enforcement::Action;

/// One line of the alert log, matching the schema in §6.
#[derive(Debug, Serialize)]
pub struct AlertRecord {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub pattern_id: String,
    pub pattern_name: &'static str,
    pub severity: &'static str,
    pub pid: u32,
    pub ns_inum: u32,
    pub container: bool,
    #[serde(rename = "binary")]
    pub exe_path: String,
    /// Resolved basename, not named in §6's schema but useful alongside
    /// `binary` when the full path is a busybox applet or symlink farm.
    pub process: String,
    pub action: &'static str,
    pub steps: Vec<AlertStep>,
}

#[derive(Debug, Serialize)]
pub struct AlertStep {
    pub syscall_nr: u32,
    #[serde(rename = "ts_ns")]
    pub timestamp_ns: u64,
}

impl AlertRecord {
    pub fn new(result: &MatchResult, action: Action) -> Self {
        Self {
            timestamp: Utc::now(),
            pattern_id: format!("0x{:016x}", result.pattern_id),
            pattern_name: result.pattern_name,
            severity: result.severity.as_str(),
            pid: result.pid,
            ns_inum: result.meta.ns_inum,
            container: result.meta.container,
            exe_path: result.meta.exe_path.clone(),
            process: result.meta.basename.clone(),
            action: action.as_str(),
            steps: result
                .step_trace
                .iter()
                .map(|&(syscall_nr, timestamp_ns)| AlertStep { syscall_nr, timestamp_ns })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub enum AlertLogError {
    Open(std::io::Error),
    Write(std::io::Error),
    Serialize(serde_json::Error),
    Lock(std::io::Error),
}

impl std::fmt::Display for AlertLogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLogError::Open(e) => write!(f, "failed to open alert log: {}", e),
            AlertLogError::Write(e) => write!(f, "failed to write alert log: {}", e),
            AlertLogError::Serialize(e) => write!(f, "failed to serialize alert: {}", e),
            AlertLogError::Lock(e) => write!(f, "failed to lock alert log: {}", e),
        }
    }
}

impl std::error::Error for AlertLogError {}

pub struct AlertLog {
    file: File,
}

impl AlertLog {
    pub fn open(path: &Path) -> Result<Self, AlertLogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(AlertLogError::Open)?;
        Ok(Self { file })
    }

    /// Append one record, newline-delimited. Takes an exclusive advisory
    /// lock for the duration of the write so a concurrent writer (e.g. a
    /// second instance started by mistake) can't interleave a partial line.
    pub fn append(&mut self, record: &AlertRecord) -> Result<(), AlertLogError> {
        let mut line = serde_json::to_string(record).map_err(AlertLogError::Serialize)?;
        line.push('\n');

        lock_exclusive(&self.file).map_err(AlertLogError::Lock)?;
        let result = self.file.write_all(line.as_bytes()).map_err(AlertLogError::Write);
        let _ = unlock(&self.file);
        result
    }
}

fn lock_exclusive(file: &File) -> std::io::Result<()> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn unlock(file: &File) -> std::io::Result<()> {
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ProcessMeta;
    use crate::pattern::Severity;

    fn sample_result() -> MatchResult {
        MatchResult {
            pattern_id: 0xdead_beef,
            pattern_name: "reverse_shell_classic",
            severity: Severity::Critical,
            pid: 4242,
            meta: ProcessMeta {
                basename: "nc".to_string(),
                exe_path: "/usr/bin/nc".to_string(),
                ns_inum: 4026531836,
                container: false,
            },
            matched_at_ns: 123,
            step_trace: vec![(59, 100), (42, 120)],
        }
    }

    #[test]
    fn appends_one_json_line_per_record() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("grimoire-alert-test-{}.log", std::process::id()));
        let mut log = AlertLog::open(&path).expect("open alert log");

        let record = AlertRecord::new(&sample_result(), Action::Terminated);
        log.append(&record).expect("append succeeds");
        log.append(&record).expect("second append succeeds");

        let contents = std::fs::read_to_string(&path).expect("read log back");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("valid json");
        assert_eq!(parsed["pattern_name"], "reverse_shell_classic");
        assert_eq!(parsed["action"], "terminated");
        assert_eq!(parsed["ns_inum"], 4026531836u64);
        assert_eq!(parsed["binary"], "/usr/bin/nc");
        assert_eq!(parsed["pattern_id"], "0x00000000deadbeef");

        let _ = std::fs::remove_file(&path);
    }
}
