//! VM configuration and assembly-file loading.
//!
//! These are the "tokenization" collaborators the top-level spec calls out
//! of scope for the hard engineering, but they are still concrete modules
//! this crate owns — there's no separate process boundary for them.

use std::fs;
use std::path::Path;

use crate::decode::decode_line;
use crate::error::ConfigError;
use crate::instruction::Instruction;

/// One guest's launch configuration, built from a `key=value` config file
/// plus the CLI-assigned `vm_id`.
#[derive(Debug, Clone)]
pub struct Config {
    /// `vm_exec_slice_in_instructions` — the scheduling quantum.
    pub quantum: usize,
    /// `vm_binary` — path to the assembly source file.
    pub binary_path: String,
    /// Assigned by the CLI, monotonically increasing starting at 1.
    pub vm_id: u32,
}

/// Load a VM config file and pair it with a CLI-assigned `vm_id`.
pub fn load_config(path: &str, vm_id: u32) -> Result<Config, ConfigError> {
    tracing::debug!(path, "loading VM config");

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Open {
        path: path.to_string(),
        source,
    })?;

    let mut quantum = None;
    let mut binary_path = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::warn!(path, line, "config line missing '=', skipping");
            continue;
        };

        match key.trim() {
            "vm_exec_slice_in_instructions" => {
                let value = value.trim();
                quantum = Some(value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                    path: path.to_string(),
                    key: "vm_exec_slice_in_instructions",
                    value: value.to_string(),
                })?);
            }
            "vm_binary" => binary_path = Some(value.trim().to_string()),
            other => tracing::warn!(path, key = other, "unknown config key, ignoring"),
        }
    }

    let quantum = quantum.ok_or_else(|| ConfigError::MissingKey {
        path: path.to_string(),
        key: "vm_exec_slice_in_instructions",
    })?;
    let binary_path = binary_path.ok_or_else(|| ConfigError::MissingKey {
        path: path.to_string(),
        key: "vm_binary",
    })?;

    Ok(Config { quantum, binary_path, vm_id })
}

/// Load and decode an assembly file into an ordered instruction stream.
/// Blank lines and `#` comments are skipped before reaching the decoder;
/// everything else is decoded, however leniently, by `decode_line`.
pub fn load_assembly(path: &str) -> Result<Vec<Instruction>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::AssemblyOpen {
        path: path.to_string(),
        source,
    })?;

    let instructions = text
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .map(decode_line)
        .collect();

    Ok(instructions)
}

/// True if `path` resolves to the same file the VM's `Config` was built
/// from — used by snapshot restore to decide whether to resume mid-stream
/// or replay from the start.
pub fn same_binary(a: &str, b: &str) -> bool {
    Path::new(a) == Path::new(b)
}
