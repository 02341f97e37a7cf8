//! Columnar interop layer.
//!
//! This module binds the wire format to the engine's batched API:
//! - `format`: the closed column type set and its Arrow format strings
//! - `input`: strided views over the columns of an incoming record batch
//! - `batch`: output batch assembly from engine-owned buffers

pub mod batch;
pub mod format;
pub mod input;

/// Column names by role, shared between the server and its clients.
pub mod names {
    pub const KEYS: &str = "keys";
    pub const VALS: &str = "vals";
    pub const COLS: &str = "cols";
    pub const NAMES: &str = "names";
    pub const SNAPS: &str = "snaps";
    pub const PATHS: &str = "paths";
    pub const PATTERNS: &str = "patterns";
    pub const PREVIOUS: &str = "previous";
    pub const LENGTHS: &str = "lengths";
    pub const PRESENCES: &str = "presences";
    pub const COUNT_LIMITS: &str = "count_limits";
    pub const SCAN_STARTS: &str = "scan_starts";
    pub const OFFSETS: &str = "offsets";
}

/// Metadata key on a paths column carrying the single-byte path separator.
pub const SEPARATOR_METADATA_KEY: &str = "separator";
