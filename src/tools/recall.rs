//! MCP `recall` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `recall` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecallParams {
    /// Natural language question about past decisions or context.
    #[schemars(
        description = "Natural language question about past decisions or organizational context"
    )]
    pub query: String,

    /// Number of results to consider for synthesis (1-10, default 5).
    #[schemars(description = "Number of results to consider for synthesis (1-10, default 5)")]
    pub topk: Option<usize>,
}
