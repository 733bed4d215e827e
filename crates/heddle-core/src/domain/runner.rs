use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RunnerId;

/// A worker process known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runner {
    pub identifier: RunnerId,

    /// Last time the runner announced itself.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub active_at: DateTime<Utc>,
}
