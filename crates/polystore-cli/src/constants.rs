//! Constants used throughout the CLI.

/// Environment variable naming the connections file.
pub const CONFIG_ENV: &str = "POLYSTORE_CONFIG";

/// Environment variable holding the log filter (`tracing` directives).
pub const LOG_ENV: &str = "POLYSTORE_LOG";

/// Log filter used when `POLYSTORE_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Exit codes for the CLI.
///
/// These follow common Unix conventions:
/// - 0: Success
/// - 1: General error (used by anyhow for unhandled errors)
/// - 2: Misuse of shell command (reserved by shells)
/// - 3+: Application-specific errors
pub mod exit_codes {
    /// General failure, including batches with failed units.
    pub const GENERAL: i32 = 1;

    /// Resource not found (config file, connection, migration file or directory).
    pub const NOT_FOUND: i32 = 3;

    /// Invalid user input, arguments or configuration.
    pub const INVALID_INPUT: i32 = 4;
}
