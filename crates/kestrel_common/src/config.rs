use serde::{Deserialize, Serialize};

/// Client-wide behavior knobs, shared by every table operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// When true, null and empty routing keys are rewritten to distinct
    /// sentinel tokens instead of being rejected. Must be identical on
    /// the read and write paths or null-keyed rows become unreachable.
    #[serde(default)]
    pub handle_null: bool,
    /// When true, scan and count ask the server to drop records that
    /// share a timestamp before returning/counting.
    #[serde(default)]
    pub remove_duplicate_by_time: bool,
    /// Batch size for full-table traversal requests.
    #[serde(default = "default_traverse_limit")]
    pub traverse_limit: u32,
}

fn default_traverse_limit() -> u32 {
    200
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handle_null: false,
            remove_duplicate_by_time: false,
            traverse_limit: default_traverse_limit(),
        }
    }
}
