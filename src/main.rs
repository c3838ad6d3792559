//! softvisor - a cooperative user-space hypervisor for MIPS-subset guest
//! interpreters, with local disk snapshot and TCP live migration.
//!
//! Two modes, mutually exclusive: guest mode (`-v`, repeatable, each
//! optionally paired with `-s` to restore from a snapshot) drives every
//! listed VM to completion on this thread; receiver mode (`-p`) binds a
//! port and waits for exactly one incoming migration before falling into
//! the same scheduling loop.

mod codec;
mod config;
mod cpu;
mod decode;
mod error;
mod hypervisor;
mod instruction;
mod opcode;
mod vm;
mod wire;

use std::process::ExitCode;

use error::HypervisorError;
use hypervisor::Hypervisor;

/// One `-v` occurrence, with the `-s` that may immediately follow it.
struct VmRequest {
    config_path: String,
    snapshot_path: Option<String>,
}

enum Mode {
    Guests(Vec<VmRequest>),
    Listen(u16),
}

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "softvisor exited with an error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), HypervisorError> {
    let mode = parse_args(std::env::args())?;
    let mut hv = Hypervisor::new();

    match mode {
        Mode::Guests(requests) => {
            for (i, request) in requests.into_iter().enumerate() {
                let vm_id = (i + 1) as u32;
                let config = config::load_config(&request.config_path, vm_id)?;
                match request.snapshot_path {
                    Some(snapshot_path) => hv.create_vm_from_snapshot(config, &snapshot_path)?,
                    None => hv.create_vm(config)?,
                }
            }
            hv.run();
        }
        Mode::Listen(port) => {
            hv.listen_migration(port)?;
        }
    }

    Ok(())
}

/// Hand-rolled rather than `clap`-derived: `-v` is repeatable and each
/// occurrence optionally carries a trailing `-s` that belongs to it alone,
/// a pairing `clap`'s declarative flag model has no way to express.
fn parse_args(args: impl Iterator<Item = String>) -> Result<Mode, HypervisorError> {
    let mut requests = Vec::new();
    let mut port = None;
    let mut args = args.skip(1).peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => {
                let config_path = args
                    .next()
                    .ok_or_else(|| HypervisorError::Cli("-v requires a config file path".into()))?;

                let snapshot_path = if args.peek().map(String::as_str) == Some("-s") {
                    args.next();
                    Some(
                        args.next()
                            .ok_or_else(|| HypervisorError::Cli("-s requires a snapshot file path".into()))?,
                    )
                } else {
                    None
                };

                requests.push(VmRequest { config_path, snapshot_path });
            }
            "-p" => {
                let raw = args.next().ok_or_else(|| HypervisorError::Cli("-p requires a port number".into()))?;
                port = Some(
                    raw.parse::<u16>()
                        .map_err(|_| HypervisorError::Cli(format!("invalid port: {raw}")))?,
                );
            }
            other => return Err(HypervisorError::Cli(format!("unrecognized argument: {other}"))),
        }
    }

    match (requests.is_empty(), port) {
        (false, Some(_)) => Err(HypervisorError::ConflictingMode),
        (false, None) => Ok(Mode::Guests(requests)),
        (true, Some(p)) => Ok(Mode::Listen(p)),
        (true, None) => Err(HypervisorError::NoVms),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}
