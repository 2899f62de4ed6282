use serde::{Deserialize, Serialize};

/// One `[[nodes]]` entry: a device runtime the payload fetcher polls each tick.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeConfig {
    pub id: String,
    /// Base URL of the node's runtime, e.g. `http://10.0.1.12:8080`.
    /// `/api/nodes/:id/state` is appended at fetch time.
    pub base_url: String,
}
