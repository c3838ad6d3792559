//! Error taxonomy.
//!
//! One `thiserror` enum per subsystem, the way the teacher keeps `KvmError`
//! and `BootError` separate rather than a single crate-wide type. Runtime
//! semantic errors (division by zero, an out-of-range register index) and
//! decode leniency are intentionally absent from this taxonomy —
//! those are logged and execution continues, they never become a `Result`.

use thiserror::Error;

/// Config-file and assembly-file loading failures. The affected VM is
/// simply not constructed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is missing required key {key}")]
    MissingKey { path: String, key: &'static str },

    #[error("config file {path} has invalid value for {key}: {value}")]
    InvalidValue {
        path: String,
        key: &'static str,
        value: String,
    },

    #[error("failed to open assembly file {path}: {source}")]
    AssemblyOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open snapshot file {path}: {source}")]
    SnapshotOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot file {path} is missing required key {key}")]
    SnapshotMissingKey { path: String, key: &'static str },
}

/// Wire and snapshot text that cannot be reconstructed into a `Vm` at all.
/// The per-line codec parse itself is lenient (unknown keys skipped,
/// comments ignored); this is reserved for a frame that is too
/// malformed to decode into anything — e.g. not valid UTF-8.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("migration frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("migration frame is missing required field {0}")]
    MissingField(&'static str),
}

/// Bind/accept/connect/send/recv failures and short frames.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept incoming connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("I/O error during migration frame transfer: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed mid-frame: expected {expected} bytes, got {got}")]
    ShortFrame { expected: u32, got: usize },

    #[error("received migration frame could not be decoded: {0}")]
    Decode(#[from] CodecError),
}

/// Top-level error for `main.rs`, aggregating every subsystem's error type.
#[derive(Error, Debug)]
pub enum HypervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("no VM files provided; use -v to specify at least one")]
    NoVms,

    #[error("-v and -p are mutually exclusive")]
    ConflictingMode,

    #[error("{0}")]
    Cli(String),
}
