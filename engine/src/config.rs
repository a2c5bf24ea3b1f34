//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Settings shared by every dataset handle of a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Recorded as `last_modified_by` on local writes and sent with pushes
    pub device_id: String,
}

impl SyncConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

impl Default for SyncConfig {
    /// A fresh random device id.
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}
