use crate::api::ChunkStream;
use crate::decoder::{decode_round, EventSink};
use crate::error::ChatError;
use crate::models::GroundingMetadata;
use crate::session::ChatSession;
use crate::tools::{self, ToolBackend};
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;
pub const TOOL_LIMIT_REACHED: &str = "Tool call limit reached";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    StreamingText,
    Dispatching,
    AwaitingContinuation,
    Done,
}

/// Visible result of a fully resolved turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resolution {
    /// Text of the last round only.
    pub text: String,
    pub grounding: Option<GroundingMetadata>,
    /// Names of the tools called along the way, in order.
    pub tool_calls: Vec<String>,
}

/// Drives rounds until the model answers with text instead of a tool call.
pub struct FunctionCallResolver {
    backend: Arc<dyn ToolBackend>,
    max_tool_rounds: usize,
}

impl FunctionCallResolver {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self {
            backend,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Resolves a turn starting from the stream `session.send` returned.
    ///
    /// Tool failures are fed back to the model and never end the loop. Stream
    /// failures and exceeding the tool round limit are returned as errors.
    pub async fn resolve(
        &self,
        session: &mut ChatSession,
        first_stream: ChunkStream,
        sink: EventSink<'_>,
    ) -> Result<Resolution> {
        let mut stream = first_stream;
        let mut tool_calls = Vec::new();
        let mut state = LoopState::StreamingText;

        loop {
            log::debug!("Session {}: {:?} (round {})", session.id(), state, tool_calls.len() + 1);
            let outcome = decode_round(stream, &mut *sink).await?;
            // Any call recorded here gets a response before this function returns
            session.record_model_turn(outcome.model_parts);

            let Some(call) = outcome.function_call else {
                state = LoopState::Done;
                log::info!(
                    "Session {}: {:?} after {} tool round(s)",
                    session.id(),
                    state,
                    tool_calls.len()
                );
                return Ok(Resolution {
                    text: outcome.text,
                    grounding: outcome.grounding,
                    tool_calls,
                });
            };

            if tool_calls.len() >= self.max_tool_rounds {
                log::error!(
                    "Session {}: model kept calling tools after {} rounds; giving up",
                    session.id(),
                    self.max_tool_rounds
                );
                session.record_tool_result(&call.name, json!({ "error": TOOL_LIMIT_REACHED }));
                return Err(ChatError::ToolRoundLimit(self.max_tool_rounds).into());
            }

            state = LoopState::Dispatching;
            log::debug!("Session {}: {:?} '{}'", session.id(), state, call.name);
            let result = tools::dispatch(self.backend.as_ref(), &call).await.to_value();
            tool_calls.push(call.name.clone());

            state = LoopState::AwaitingContinuation;
            log::debug!("Session {}: {:?}", session.id(), state);
            stream = match session.send_tool_result(&call.name, result.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    // The tool already ran; keep its answer so the next turn stays valid
                    session.record_tool_result(&call.name, result);
                    return Err(e);
                }
            };
            state = LoopState::StreamingText;
        }
    }
}
