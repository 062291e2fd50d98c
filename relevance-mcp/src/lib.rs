//! # Relevance MCP Adapter
//!
//! Tool contract adapter for the relevance engine: a JSON envelope
//! request/response layer over the engine's operation surface. The
//! adapter is plumbing, not policy; auth happens upstream, and by the
//! time a request lands here the caller is an authenticated
//! `{user_id, device_id}` pair.
//!
//! ## Example
//!
//! ```no_run
//! use relevance_core::engine::RelevanceEngine;
//! use relevance_core::config::EngineConfig;
//! use relevance_mcp::{ToolAdapter, ToolRequest};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = RelevanceEngine::in_memory(EngineConfig::default());
//!     let adapter = ToolAdapter::new(engine);
//!
//!     let response = adapter
//!         .handle(ToolRequest {
//!             tool: "store_memory".into(),
//!             args: json!({ "user_id": "u1", "text": "Standup moved to 9:30." }),
//!         })
//!         .await;
//!     assert!(response.ok);
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod server;

pub use error::to_tool_error;
pub use protocol::{ToolDescriptor, ToolError, ToolRequest, ToolResponse};
pub use server::ToolAdapter;
