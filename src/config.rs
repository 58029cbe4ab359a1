//! Command-line and environment configuration (SPEC_FULL §A). Hand-rolled,
//! matching `parse_args` in `main.rs` elsewhere in this codebase, no
//! argument-parsing crate, just `std::env::args()`.

use std::path::PathBuf;

const DEFAULT_LOG_PATH: &str = "/var/log/guardian/grimoire_alerts.json";
const DEFAULT_METRICS_PORT: u16 = 9091;
const DEFAULT_TRACK_CAPACITY: usize = 16_384;

#[derive(Debug, Clone)]
pub struct Config {
    pub enabled: bool,
    pub enforce: bool,
    pub log_path: PathBuf,
    pub metrics_port: u16,
    pub duration_secs: Option<u64>,
    pub debug: bool,
    pub track_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            enforce: false,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            metrics_port: DEFAULT_METRICS_PORT,
            duration_secs: None,
            debug: false,
            track_capacity: DEFAULT_TRACK_CAPACITY,
        }
    }
}

/// Parse CLI flags, falling back to environment variables, falling back to
/// defaults. CLI flags always win over the environment (§6): `GRIMOIRE_ENFORCE`
/// sets the default, but `--grimoire-enforce` on the command line overrides it.
pub fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    config.enabled = args.iter().any(|a| a == "--enable-grimoire");
    config.debug = args.iter().any(|a| a == "--grimoire-debug");

    let env_enforce = std::env::var("GRIMOIRE_ENFORCE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let cli_enforce = args.iter().any(|a| a == "--grimoire-enforce");
    config.enforce = cli_enforce || env_enforce;

    if let Some(path) = flag_value(&args, "--grimoire-log") {
        config.log_path = PathBuf::from(path);
    }

    if let Some(secs) = flag_value(&args, "--duration").and_then(|s| s.parse().ok()) {
        config.duration_secs = Some(secs);
    }

    if let Some(port) = flag_value(&args, "--metrics-port").and_then(|s| s.parse().ok()) {
        config.metrics_port = port;
    }

    config
}

/// Reads a flag's value in either `--flag=value` form (the form §6 documents
/// for `--grimoire-log`/`--duration`) or `--flag value` form (accepted too,
/// since the teacher's `parse_args` already used space-separated values).
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let prefix = format!("{}=", flag);
    if let Some(arg) = args.iter().find(|a| a.starts_with(&prefix)) {
        return arg.get(prefix.len()..);
    }
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_shadow_mode() {
        let config = Config::default();
        assert!(!config.enforce);
        assert!(!config.enabled);
    }

    #[test]
    fn flag_value_reads_the_following_argument() {
        let args = vec!["grimoire".to_string(), "--grimoire-log".to_string(), "/tmp/alerts.jsonl".to_string()];
        assert_eq!(flag_value(&args, "--grimoire-log"), Some("/tmp/alerts.jsonl"));
        assert_eq!(flag_value(&args, "--missing"), None);
    }

    #[test]
    fn flag_value_reads_equals_form() {
        let args = vec!["grimoire".to_string(), "--grimoire-log=/tmp/alerts.jsonl".to_string()];
        assert_eq!(flag_value(&args, "--grimoire-log"), Some("/tmp/alerts.jsonl"));
    }

    #[test]
    fn duration_flag_parses_in_equals_form() {
        let args = vec!["grimoire".to_string(), "--duration=30".to_string()];
        assert_eq!(flag_value(&args, "--duration").and_then(|s| s.parse::<u64>().ok()), Some(30));
    }
}
