//! MCP `capture` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `capture` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CaptureParams {
    /// The text containing a potential decision or significant context.
    #[schemars(
        description = "The text containing a potential decision or significant context to capture"
    )]
    pub text: String,

    /// Where the text came from, e.g. `"claude_agent"`, `"slack"`, `"github"`.
    #[schemars(description = "Source of the text (e.g. 'claude_agent', 'slack', 'github')")]
    pub source: Option<String>,

    /// User who authored the text.
    #[schemars(description = "User who authored the text")]
    pub user: Option<String>,

    /// Channel or location where the text originated.
    #[schemars(description = "Channel or location where the text originated")]
    pub channel: Option<String>,
}
