//! JSON envelope types for the tool surface.
//!
//! Each tool call is a request/response pair; the adapter is plumbing
//! between the envelope and the engine's typed operations, nothing more.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use relevance_core::types::ContextSnapshot;

/// A tool invocation from an authenticated caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    /// Tool name (e.g. `store_memory`).
    pub tool: String,
    /// Tool arguments.
    #[serde(default)]
    pub args: Value,
}

/// Typed error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    /// Error class: validation, auth, capacity, dependency, integrity,
    /// semantic, not_found, timeout, unhealthy.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Suggested retry delay, for capacity errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Envelope response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    /// Whether the call succeeded.
    pub ok: bool,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    /// Success envelope.
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failure envelope.
    #[must_use]
    pub fn err(error: ToolError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// A tool listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// One-line description.
    pub description: String,
}

// ---------------------------------------------------------------------
// Per-tool argument types
// ---------------------------------------------------------------------

fn default_limit() -> usize {
    10
}

fn default_look_ahead() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct StoreMemoryArgs {
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
    pub text: String,
    #[serde(default)]
    pub context: Option<ContextSnapshot>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub force_hot: bool,
    #[serde(default)]
    pub predictive_hints: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RecallArgs {
    pub user_id: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Owner-only; the adapter is reached only by the authenticated
    /// owner, so honoring it here does not leak to third parties.
    #[serde(default)]
    pub include_suppressed: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserArgs {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BriefingArgs {
    pub user_id: String,
    pub person_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SetContextArgs {
    pub user_id: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListLoopsArgs {
    pub user_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub counterparty: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CloseLoopArgs {
    pub user_id: String,
    pub loop_id: Uuid,
    #[serde(default)]
    pub cancel: bool,
}

#[derive(Debug, Deserialize)]
pub struct ForgetArgs {
    pub user_id: String,
    pub memory_id: Uuid,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct RestoreArgs {
    pub user_id: String,
    pub memory_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ReassociateArgs {
    pub user_id: String,
    pub memory_id: Uuid,
    #[serde(default)]
    pub add: Vec<Uuid>,
    #[serde(default)]
    pub remove: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ExportArgs {
    pub user_id: String,
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SessionStartArgs {
    pub user_id: String,
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct SessionVoteArgs {
    pub user_id: String,
    pub session_id: Uuid,
    /// Map of `memory_id -> hot|warm|cold|wrong|spark`.
    pub votes: std::collections::HashMap<Uuid, String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct SessionResolveArgs {
    pub user_id: String,
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AnticipateArgs {
    pub user_id: String,
    #[serde(default = "default_look_ahead")]
    pub look_ahead_minutes: i64,
}
