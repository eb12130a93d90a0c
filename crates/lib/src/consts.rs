//! Shared constants.

/// Default config file name looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "nimbus.yml";

/// Default function memory size when the config omits it, in megabytes.
pub const DEFAULT_MEMORY_MB: i32 = 128;

/// Default function timeout when the config omits it, in seconds.
pub const DEFAULT_TIMEOUT_SECS: i32 = 3;

/// Default batch size for an event-source binding.
pub const DEFAULT_BATCH_SIZE: i32 = 100;

/// Prefix of the log group the execution environment writes function logs to.
pub const LOG_GROUP_PREFIX: &str = "/aws/lambda/";

/// How far back one `tail` call reaches, in minutes.
pub const LOG_WINDOW_MINUTES: i64 = 15;

/// Width of the bounded pool used for event-source binding operations.
pub const BINDING_POOL_WIDTH: usize = 4;
