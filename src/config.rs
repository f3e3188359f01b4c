//! Process-wide tunables (§3, §6), loaded once at startup and read-only
//! thereafter. Mirrors `client_manager_init`'s config-file handling: a
//! line-oriented `key value` file, fatal on a non-positive/non-numeric
//! value, citing the offending line number, layered under CLI flags.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct Limits {
    pub timeout: Duration,
    pub max_connections: usize,
    pub max_command_list_size: usize,
    pub max_output_buffer_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            timeout: Duration::from_secs(60),
            max_connections: 10,
            max_command_list_size: 2 * 1024 * 1024,
            max_output_buffer_size: 8 * 1024 * 1024,
        }
    }
}

/// Overrides parsed from a config file; `None` fields fall through to the
/// built-in default (or a further CLI override).
#[derive(Debug, Default)]
pub struct PartialLimits {
    pub timeout: Option<u64>,
    pub max_connections: Option<usize>,
    pub max_command_list_size_kib: Option<u64>,
    pub max_output_buffer_size_kib: Option<u64>,
}

impl PartialLimits {
    pub fn apply_over(self, mut limits: Limits) -> Limits {
        if let Some(t) = self.timeout {
            limits.timeout = Duration::from_secs(t);
        }
        if let Some(n) = self.max_connections {
            limits.max_connections = n;
        }
        if let Some(kib) = self.max_command_list_size_kib {
            limits.max_command_list_size = kib as usize * 1024;
        }
        if let Some(kib) = self.max_output_buffer_size_kib {
            limits.max_output_buffer_size = kib as usize * 1024;
        }
        limits
    }
}

/// Parses a `key value` config file, citing the offending line on a
/// non-positive or non-numeric value. Unknown keys are logged and skipped
/// rather than treated as fatal, since this core only understands the four
/// connection tunables; the rest of the daemon's configuration is an
/// external collaborator's concern.
pub fn load_config_file(path: &Path) -> Result<PartialLimits> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;

    let mut out = PartialLimits::default();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default().trim();

        match key {
            "connection_timeout" => {
                out.timeout = Some(parse_positive(key, value, line_no)?);
            },
            "max_connections" => {
                out.max_connections = Some(parse_positive::<usize>(key, value, line_no)?);
            },
            "max_command_list_size" => {
                out.max_command_list_size_kib = Some(parse_positive(key, value, line_no)?);
            },
            "max_output_buffer_size" => {
                out.max_output_buffer_size_kib = Some(parse_positive(key, value, line_no)?);
            },
            "" => {},
            other => {
                tracing::warn!(line = line_no, key = other, "unknown configuration key");
            },
        }
    }

    Ok(out)
}

fn parse_positive<T>(key: &str, value: &str, line_no: usize) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed: T = value
        .parse()
        .map_err(|_| anyhow::anyhow!("{key} \"{value}\" is not a positive integer, line {line_no}"))?;
    if parsed <= T::default() {
        bail!("{key} \"{value}\" is not a positive integer, line {line_no}");
    }
    Ok(parsed)
}
