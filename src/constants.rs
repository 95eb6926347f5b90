//! Application constants for the logger conditioner
//!
//! Date formats, marker strings and default values shared across the
//! parser, normaliser, writer and corrections editor.

// =============================================================================
// Time Grid
// =============================================================================

/// Default fixed-step grid (minutes)
pub const DEFAULT_STEP_MINUTES: u32 = 30;

/// Minutes in a day; a grid step must divide this
pub const MINUTES_PER_DAY: u32 = 24 * 60;

// =============================================================================
// Timestamp Formats
// =============================================================================

/// Canonical logger timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Logger timestamp with fractional seconds
pub const TIMESTAMP_FORMAT_FRACTIONAL: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Minute-resolution timestamp, also the exclusion-window record format
pub const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

// =============================================================================
// TOA5 Dialect
// =============================================================================

/// Format tag in the first field of a TOA5 environment line
pub const TOA5_TAG: &str = "TOA5";

/// Name of the TOA5 timestamp column
pub const TOA5_TIMESTAMP: &str = "TIMESTAMP";

/// Units string of the TOA5 timestamp column
pub const TOA5_TIMESTAMP_UNITS: &str = "TS";

/// Logger record counter column
pub const TOA5_RECORD: &str = "RECORD";

/// Number of header lines preceding TOA5 data
pub const TOA5_HEADER_LINES: usize = 4;

/// Missing-value marker written to TOA5 output
pub const TOA5_MISSING: &str = "NAN";

// =============================================================================
// EddyPro Summary Dialect
// =============================================================================

/// Date column of an EddyPro summary file
pub const EDDYPRO_DATE: &str = "date";

/// Time column of an EddyPro summary file
pub const EDDYPRO_TIME: &str = "time";

/// Source-file bookkeeping column of an EddyPro summary file
pub const EDDYPRO_FILENAME: &str = "filename";

// =============================================================================
// Values
// =============================================================================

/// Strings read as missing data
pub const DEFAULT_MISSING_VALUES: &[&str] = &["NAN", "NaN", "nan", "-9999", "-9999.0", ""];

/// Units that are different spellings of the same quantity
pub const UNIT_ALIASES: &[(&str, &[&str])] = &[
    ("degC", &["C"]),
    ("n", &["arb", "samples"]),
    ("arb", &["n", "samples"]),
    ("samples", &["arb", "n"]),
    ("m^3/m^3", &["fraction"]),
];

// =============================================================================
// Backups and Corrections
// =============================================================================

/// Backup discovery pattern; `{stem}` is replaced by the master file stem
pub const DEFAULT_BACKUP_PATTERN: &str = "{stem}*.backup";

/// Required processing level of an editable control record
pub const CONTROL_LEVEL: &str = "L2";

/// Suffix appended to the control file stem for a new version
pub const CONTROL_VERSION_SUFFIX: &str = "_v2";
