//! Coordinator configuration (`spec.md` §6 "Configuration").

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotPolicy;

/// Values recognized by the coordinator. Loaded by the server crate (from
/// environment variables, with these as fallbacks) and passed in at
/// coordinator construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bound on `OpenModel` -> data availability.
    pub handshake_timeout: Duration,
    /// Cold-start data grace period.
    pub data_request_timeout: Duration,
    /// Time after last close before shutdown.
    pub linger_timeout: Duration,
    pub snapshot_policy: SnapshotPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            data_request_timeout: Duration::from_secs(15),
            linger_timeout: Duration::from_secs(30),
            snapshot_policy: SnapshotPolicy::default(),
        }
    }
}
