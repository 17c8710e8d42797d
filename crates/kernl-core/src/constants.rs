//! Shared defaults

/// Application directory name under the user's home (~/.kernl)
pub const CONFIG_DIR_NAME: &str = ".kernl";

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default SQLite database file name inside the config directory
pub const DATABASE_FILE_NAME: &str = "kernl.db";

/// Default namespace for threads created without one
pub const DEFAULT_NAMESPACE: &str = "kernl";

pub mod engine {
    /// Hard ceiling on model round-trips per execution
    pub const MAX_TICKS: u32 = 50;

    /// Consecutive ticks with neither tool calls nor assistant text before
    /// the model is considered stuck
    pub const MAX_EMPTY_TICKS: u32 = 3;

    /// Capacity of the bounded execution stream channel
    pub const STREAM_BUFFER: usize = 64;

    /// Seconds of model stream silence before the tick is failed
    pub const MODEL_IDLE_TIMEOUT_SECS: u64 = 120;

    /// Default tool execution timeout (2 minutes)
    pub const TOOL_TIMEOUT_SECS: u64 = 120;

    /// Storage lease lifetime; renewed at every checkpoint
    pub const LEASE_TTL_SECS: u64 = 300;
}
