//! Tool dispatch onto an engine handle.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use relevance_core::engine::{ForgetMode, LoopFilter, RelevanceEngine};
use relevance_core::context::FrameFields;
use relevance_core::ingest::IngestHints;
use relevance_core::retrieval::{RecallFilters, RetrievedMemory};
use relevance_core::types::{LoopState, Vote};
use relevance_core::Error;

use crate::error::to_tool_error;
use crate::protocol::{
    AnticipateArgs, BriefingArgs, CloseLoopArgs, ExportArgs, ForgetArgs, ListLoopsArgs,
    ReassociateArgs, RecallArgs, RestoreArgs, SessionResolveArgs, SessionStartArgs,
    SessionVoteArgs, SetContextArgs, StoreMemoryArgs, ToolDescriptor, ToolRequest, ToolResponse,
    UserArgs,
};

/// Excerpt length returned in ranked results.
const EXCERPT_LEN: usize = 160;

/// The adapter: a thin dispatch layer between the JSON envelope and the
/// engine. Callers are authenticated upstream; by the time a request
/// reaches here, `user_id` identifies the owner.
pub struct ToolAdapter {
    engine: Arc<RelevanceEngine>,
}

impl ToolAdapter {
    /// Create an adapter over an engine handle.
    #[must_use]
    pub fn new(engine: Arc<RelevanceEngine>) -> Self {
        Self { engine }
    }

    /// Available tools.
    #[must_use]
    pub fn list_tools() -> Vec<ToolDescriptor> {
        let tools = [
            ("store_memory", "Store a memory; returns id, salience, and extracted commitments"),
            ("recall", "Ranked retrieval for a query, biased by the active context"),
            ("whats_relevant", "What matters now: ranked memories plus open loops"),
            ("get_briefing", "Relationship briefing ahead of an interaction"),
            ("set_context", "Start a context frame"),
            ("clear_context", "Close the active context frame"),
            ("list_loops", "List commitments, optionally filtered"),
            ("close_loop", "Close (or cancel) a commitment"),
            ("forget", "Suppress, archive, or delete a memory"),
            ("restore", "Return a memory to the active state"),
            ("reassociate", "Edit a memory's associated entities"),
            ("export_memories", "Export canonical records as NDJSON"),
            ("recall_session_start", "Open an iterative recall session"),
            ("recall_vote", "Vote on session candidates and re-rank"),
            ("recall_resolve", "Resolve a recall session"),
            ("anticipate", "Trigger anticipatory prefetch"),
            ("get_predictions", "Current temporal pattern summary"),
        ];
        tools
            .iter()
            .map(|(name, description)| ToolDescriptor {
                name: (*name).to_string(),
                description: (*description).to_string(),
            })
            .collect()
    }

    /// Handle one request.
    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        debug!(tool = %request.tool, "tool request");
        let outcome = self.dispatch(&request.tool, request.args).await;
        match outcome {
            Ok(result) => ToolResponse::ok(result),
            Err(error) => {
                warn!(tool = %request.tool, %error, "tool request failed");
                ToolResponse::err(to_tool_error(&error))
            }
        }
    }

    async fn dispatch(&self, tool: &str, args: Value) -> Result<Value, Error> {
        match tool {
            "store_memory" => self.store_memory(parse(args)?).await,
            "recall" => self.recall(parse(args)?).await,
            "whats_relevant" => self.whats_relevant(parse(args)?).await,
            "get_briefing" => self.get_briefing(parse(args)?).await,
            "set_context" => self.set_context(parse(args)?).await,
            "clear_context" => self.clear_context(parse(args)?).await,
            "list_loops" => self.list_loops(parse(args)?).await,
            "close_loop" => self.close_loop(parse(args)?).await,
            "forget" => self.forget(parse(args)?).await,
            "restore" => self.restore(parse(args)?).await,
            "reassociate" => self.reassociate(parse(args)?).await,
            "export_memories" => self.export_memories(parse(args)?).await,
            "recall_session_start" => self.session_start(parse(args)?).await,
            "recall_vote" => self.session_vote(parse(args)?).await,
            "recall_resolve" => self.session_resolve(parse(args)?).await,
            "anticipate" => self.anticipate(parse(args)?).await,
            "get_predictions" => self.get_predictions(parse(args)?).await,
            unknown => Err(Error::Validation(format!("unknown tool: {unknown}"))),
        }
    }

    async fn store_memory(&self, args: StoreMemoryArgs) -> Result<Value, Error> {
        let hints = IngestHints {
            context: args.context,
            tags: args.tags,
            force_hot: args.force_hot,
            predictive_hints: args.predictive_hints,
        };
        let receipt = self
            .engine
            .store_memory(&args.user_id, &args.device_id, &args.text, hints)
            .await?;
        Ok(json!({
            "memory_id": receipt.memory_id,
            "salience": receipt.salience,
            "deduplicated": receipt.deduplicated,
            "degraded": receipt.degraded,
            "degraded_reason": receipt.degraded_reason,
            "commitments": receipt.commitments,
        }))
    }

    async fn recall(&self, args: RecallArgs) -> Result<Value, Error> {
        let filters = RecallFilters {
            tags: args.tags,
            category: None,
        };
        let outcome = self
            .engine
            .recall(
                &args.user_id,
                args.query.as_deref(),
                filters,
                args.limit,
                args.include_suppressed,
            )
            .await?;
        Ok(json!({
            "items": hits(&outcome.items),
            "degraded": outcome.degraded,
            "degraded_reason": outcome.degraded_reason,
        }))
    }

    async fn whats_relevant(&self, args: UserArgs) -> Result<Value, Error> {
        let summary = self.engine.whats_relevant(&args.user_id).await?;
        Ok(json!({
            "items": hits(&summary.items),
            "loops": summary.loops,
            "context_summary": summary.summary,
            "frame_id": summary.context.map(|f| f.id),
        }))
    }

    async fn get_briefing(&self, args: BriefingArgs) -> Result<Value, Error> {
        let briefing = self.engine.get_briefing(&args.user_id, args.person_id).await?;
        Ok(json!({
            "person": briefing.person,
            "last_interaction": briefing.relationship.as_ref().map(|r| r.last_interaction_at),
            "trend": briefing.relationship.as_ref().map(|r| r.trend),
            "valence_mean": briefing.relationship.as_ref().map(|r| r.valence_mean),
            "you_owe": briefing.you_owe,
            "they_owe": briefing.they_owe,
            "upcoming": briefing.upcoming,
            "sensitivities": briefing.sensitivities,
        }))
    }

    async fn set_context(&self, args: SetContextArgs) -> Result<Value, Error> {
        let frame = self
            .engine
            .set_context(
                &args.user_id,
                FrameFields {
                    location: args.location,
                    people: args.people,
                    activity: args.activity,
                    project: args.project,
                    tags: args.tags,
                },
            )
            .await?;
        Ok(json!({ "frame_id": frame.id, "expires_at": frame.expires_at }))
    }

    async fn clear_context(&self, args: UserArgs) -> Result<Value, Error> {
        let frame_id = self.engine.clear_context(&args.user_id).await?;
        Ok(json!({ "frame_id": frame_id }))
    }

    async fn list_loops(&self, args: ListLoopsArgs) -> Result<Value, Error> {
        let state = match args.state.as_deref() {
            None => None,
            Some("open") => Some(LoopState::Open),
            Some("done") => Some(LoopState::Done),
            Some("expired") => Some(LoopState::Expired),
            Some("cancelled") => Some(LoopState::Cancelled),
            Some(other) => {
                return Err(Error::Validation(format!("unknown loop state: {other}")));
            }
        };
        let loops = self
            .engine
            .list_loops(
                &args.user_id,
                LoopFilter {
                    state,
                    counterparty: args.counterparty,
                },
            )
            .await?;
        Ok(json!({ "loops": loops }))
    }

    async fn close_loop(&self, args: CloseLoopArgs) -> Result<Value, Error> {
        let closed = if args.cancel {
            self.engine.cancel_loop(&args.user_id, args.loop_id).await?
        } else {
            self.engine.close_loop(&args.user_id, args.loop_id).await?
        };
        Ok(json!({ "loop": closed }))
    }

    async fn forget(&self, args: ForgetArgs) -> Result<Value, Error> {
        let mode = match args.mode.as_str() {
            "suppress" => ForgetMode::Suppress,
            "archive" => ForgetMode::Archive,
            "delete" => ForgetMode::Delete,
            other => {
                return Err(Error::Validation(format!("unknown forget mode: {other}")));
            }
        };
        self.engine.forget(&args.user_id, args.memory_id, mode).await?;
        Ok(json!({ "memory_id": args.memory_id, "mode": args.mode }))
    }

    async fn restore(&self, args: RestoreArgs) -> Result<Value, Error> {
        let memory = self.engine.restore(&args.user_id, args.memory_id).await?;
        Ok(json!({ "memory_id": memory.id, "state": memory.state }))
    }

    async fn reassociate(&self, args: ReassociateArgs) -> Result<Value, Error> {
        let memory = self
            .engine
            .reassociate(&args.user_id, args.memory_id, &args.add, &args.remove)
            .await?;
        Ok(json!({ "memory_id": memory.id, "entity_ids": memory.entity_ids }))
    }

    async fn export_memories(&self, args: ExportArgs) -> Result<Value, Error> {
        let ndjson = self.engine.export_memories(&args.user_id, args.since).await?;
        Ok(json!({ "ndjson": ndjson }))
    }

    async fn session_start(&self, args: SessionStartArgs) -> Result<Value, Error> {
        let (session, candidates) = self
            .engine
            .recall_session_start(&args.user_id, &args.query, args.limit)
            .await?;
        Ok(json!({
            "session_id": session.id,
            "expires_at": session.expires_at,
            "candidates": hits(&candidates),
        }))
    }

    async fn session_vote(&self, args: SessionVoteArgs) -> Result<Value, Error> {
        let mut votes: HashMap<Uuid, Vote> = HashMap::new();
        for (memory_id, label) in args.votes {
            let vote = match label.as_str() {
                "hot" => Vote::Hot,
                "warm" => Vote::Warm,
                "cold" => Vote::Cold,
                "wrong" => Vote::Wrong,
                "spark" => Vote::Spark,
                other => {
                    return Err(Error::Validation(format!("unknown vote: {other}")));
                }
            };
            votes.insert(memory_id, vote);
        }
        let outcome = self
            .engine
            .recall_vote(&args.user_id, args.session_id, votes, args.limit)
            .await?;
        let branches: Vec<Value> = outcome
            .branches
            .iter()
            .map(|branch| {
                json!({
                    "source": branch.source,
                    "candidates": hits(&branch.candidates),
                })
            })
            .collect();
        Ok(json!({
            "candidates": hits(&outcome.candidates),
            "branches": branches,
        }))
    }

    async fn session_resolve(&self, args: SessionResolveArgs) -> Result<Value, Error> {
        let session = self
            .engine
            .recall_resolve(&args.user_id, args.session_id)
            .await?;
        Ok(json!({ "session_id": session.id, "resolved": session.resolved }))
    }

    async fn anticipate(&self, args: AnticipateArgs) -> Result<Value, Error> {
        let decision = self
            .engine
            .anticipate(&args.user_id, args.look_ahead_minutes)
            .await?;
        Ok(json!({
            "triggered": decision.triggered,
            "period_hours": decision.period_hours,
            "peak_offset": decision.peak_offset,
            "memory_ids": decision.memory_ids,
        }))
    }

    async fn get_predictions(&self, args: UserArgs) -> Result<Value, Error> {
        let pattern = self.engine.get_predictions(&args.user_id).await?;
        serde_json::to_value(pattern).map_err(Into::into)
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, Error> {
    serde_json::from_value(args).map_err(|e| Error::Validation(format!("bad arguments: {e}")))
}

fn hits(items: &[RetrievedMemory]) -> Vec<Value> {
    items
        .iter()
        .map(|item| {
            let excerpt: String = item.memory.text.chars().take(EXCERPT_LEN).collect();
            json!({
                "id": item.memory.id,
                "excerpt": excerpt,
                "score": item.score,
                "salience": item.memory.salience.current_score,
                "tier": item.memory.tier,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relevance_core::config::EngineConfig;

    fn adapter() -> (ToolAdapter, Arc<RelevanceEngine>) {
        let engine = RelevanceEngine::in_memory(EngineConfig::default());
        (ToolAdapter::new(engine.clone()), engine)
    }

    fn request(tool: &str, args: Value) -> ToolRequest {
        ToolRequest {
            tool: tool.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn store_then_recall_round_trip() {
        let (adapter, engine) = adapter();
        let stored = adapter
            .handle(request(
                "store_memory",
                json!({ "user_id": "u1", "text": "Quarterly budget review with Sarah." }),
            ))
            .await;
        assert!(stored.ok, "{:?}", stored.error);
        engine.wait_idle().await;

        let recalled = adapter
            .handle(request(
                "recall",
                json!({ "user_id": "u1", "query": "budget" }),
            ))
            .await;
        assert!(recalled.ok);
        let items = recalled.result.unwrap()["items"].as_array().unwrap().clone();
        assert_eq!(items.len(), 1);
        assert!(items[0]["excerpt"].as_str().unwrap().contains("budget"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_validation_error() {
        let (adapter, _engine) = adapter();
        let response = adapter.handle(request("transmogrify", json!({}))).await;
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, "validation");
    }

    #[tokio::test]
    async fn missing_args_are_validation_errors() {
        let (adapter, _engine) = adapter();
        let response = adapter.handle(request("store_memory", json!({}))).await;
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, "validation");
    }

    #[tokio::test]
    async fn forget_mode_is_checked() {
        let (adapter, _engine) = adapter();
        let response = adapter
            .handle(request(
                "forget",
                json!({ "user_id": "u1", "memory_id": Uuid::new_v4(), "mode": "obliterate" }),
            ))
            .await;
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, "validation");
    }

    #[test]
    fn tool_listing_covers_the_surface() {
        let names: Vec<String> = ToolAdapter::list_tools()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        for expected in [
            "store_memory",
            "recall",
            "whats_relevant",
            "get_briefing",
            "set_context",
            "clear_context",
            "list_loops",
            "close_loop",
            "forget",
            "restore",
            "reassociate",
            "export_memories",
            "recall_session_start",
            "recall_vote",
            "recall_resolve",
            "anticipate",
            "get_predictions",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }
}
