use crate::api::{ChatRequest, ChunkStream, Content, LLMApiProvider, Part, Tool};
use crate::models::{GeoLocation, ModelConfig};
use crate::tools;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

// Persona for the travel assistant
pub const SYSTEM_INSTRUCTION: &str = r#"You are Wanderlust, an expert, friendly, and enthusiastic travel assistant.
Your goal is to help users plan trips, find destinations, and discover local attractions.
- Use emojis effectively to make the conversation engaging 🌍✈️.
- Format your responses using Markdown for readability (bolding, lists).
- If the user asks about specific places or current events, use your tools to find real-time information.
- Be concise but helpful.

*** REAL-TIME BOOKING CAPABILITIES ***
You have access to tools for searching and booking flights, trains, and buses.
1. When a user asks to travel, ask for origin, destination, and date if not provided.
2. Call 'search_trips' to find options.
3. Present the options clearly to the user (e.g., in a Markdown list or table).
4. When the user selects an option and provides a name, call 'book_trip'.
5. **IMPORTANT**: Upon receiving a successful booking confirmation from the 'book_trip' tool, you MUST output the full ticket JSON object inside a special block like this:

   ```json:ticket
   {
     "id": "...",
     "mode": "...",
     "operator": "...",
     "departureTime": "...",
     "arrivalTime": "...",
     "duration": "...",
     "price": "...",
     "origin": "...",
     "destination": "...",
     "date": "...",
     "ticketId": "...",
     "passengerName": "...",
     "seatNumber": "...",
     "status": "CONFIRMED",
     "qrCodeData": "..."
   }
   ```

   Follow this JSON block with a friendly "Bon voyage!" message.
"#;

/// Fixed configuration a session is created with.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub persona: String,
    pub tools: Vec<Tool>,
    pub location_bias: Option<GeoLocation>,
}

impl SessionConfig {
    pub fn travel_assistant(location_bias: Option<GeoLocation>) -> Self {
        Self {
            persona: SYSTEM_INSTRUCTION.to_string(),
            tools: tools::default_tools(),
            location_bias,
        }
    }
}

/// The single live conversation with the model backend.
///
/// History is append-only. Configuration never changes after `create`; a new
/// location or a reset means building a new session.
pub struct ChatSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    config: SessionConfig,
    history: Vec<Content>,
    provider: Arc<dyn LLMApiProvider>,
    model_config: ModelConfig,
    api_key: String,
}

impl ChatSession {
    pub fn create(
        provider: Arc<dyn LLMApiProvider>,
        model_config: ModelConfig,
        api_key: String,
        config: SessionConfig,
    ) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            config,
            history: Vec::new(),
            provider,
            model_config,
            api_key,
        };
        log::info!(
            "Created chat session {} (model: {}, location bias: {})",
            session.id,
            session.model_config.model,
            session.config.location_bias.is_some()
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Same backend and credentials, new configuration, empty history.
    pub fn replace(&self, config: SessionConfig) -> Self {
        log::info!(
            "Replacing session {} (open since {}, {} history entries)",
            self.id,
            self.created_at().format("%H:%M:%S"),
            self.history.len()
        );
        Self::create(
            Arc::clone(&self.provider),
            self.model_config.clone(),
            self.api_key.clone(),
            config,
        )
    }

    /// Appends the user's text and opens the response stream.
    pub async fn send(&mut self, text: &str) -> Result<ChunkStream> {
        self.push_and_open(Content::user_text(text))
            .await
            .context("Failed to send message to model")
    }

    /// Appends a tool response and opens the continuation stream.
    pub async fn send_tool_result(&mut self, name: &str, result: Value) -> Result<ChunkStream> {
        self.push_and_open(Content::tool_response(name, result))
            .await
            .with_context(|| format!("Failed to send '{}' tool response to model", name))
    }

    /// Records what the model said in the round that just finished.
    pub fn record_model_turn(&mut self, parts: Vec<Part>) {
        if parts.is_empty() {
            log::debug!("Session {}: empty model turn not recorded", self.id);
            return;
        }
        self.history.push(Content::model(parts));
    }

    /// Answers the last recorded call without asking the model to continue.
    ///
    /// Used when a turn ends early so the history never carries a call that
    /// has no response after it.
    pub fn record_tool_result(&mut self, name: &str, result: Value) {
        log::debug!("Session {}: closing '{}' call without continuation", self.id, name);
        self.history.push(Content::tool_response(name, result));
    }

    // A request that never opened leaves history untouched
    async fn push_and_open(&mut self, content: Content) -> Result<ChunkStream> {
        self.history.push(content);
        let request = ChatRequest {
            system_instruction: &self.config.persona,
            tools: &self.config.tools,
            location_bias: self.config.location_bias,
            contents: &self.history,
        };

        let opened = self
            .provider
            .send_chat_stream_request(&self.model_config, &self.api_key, &request)
            .await;
        match opened {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.history.pop();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::api::StreamChunk;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// One scripted round: chunks to replay, or a failure to open the stream.
    pub enum ScriptedRound {
        Chunks(Vec<Result<StreamChunk>>),
        OpenFails(String),
    }

    impl ScriptedRound {
        pub fn ok(chunks: Vec<StreamChunk>) -> Self {
            ScriptedRound::Chunks(chunks.into_iter().map(Ok).collect())
        }
    }

    /// Provider that replays rounds in order and records every request.
    #[derive(Default)]
    pub struct ScriptedProvider {
        rounds: Mutex<VecDeque<ScriptedRound>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    #[derive(Clone, Debug)]
    pub struct RecordedRequest {
        pub contents: Vec<Content>,
        pub location_bias: Option<GeoLocation>,
        pub system_instruction: String,
    }

    impl ScriptedProvider {
        pub fn new(rounds: Vec<ScriptedRound>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMApiProvider for ScriptedProvider {
        async fn send_chat_stream_request(
            &self,
            _config: &ModelConfig,
            _api_key: &str,
            request: &ChatRequest<'_>,
        ) -> Result<ChunkStream> {
            self.requests.lock().unwrap().push(RecordedRequest {
                contents: request.contents.to_vec(),
                location_bias: request.location_bias,
                system_instruction: request.system_instruction.to_string(),
            });
            let round = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ScriptedRound::OpenFails("script exhausted".into()));
            match round {
                ScriptedRound::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks))),
                ScriptedRound::OpenFails(reason) => Err(anyhow::anyhow!(reason)),
            }
        }
    }

    /// Panics if any model call in `contents` lacks a response right after it.
    pub fn assert_calls_answered(contents: &[Content]) {
        for (i, content) in contents.iter().enumerate() {
            let calls: Vec<_> = content
                .parts
                .iter()
                .filter_map(|p| p.function_call.as_ref())
                .collect();
            for call in calls {
                let answered = contents.get(i + 1).map_or(false, |next| {
                    next.parts.iter().any(|p| {
                        p.function_response
                            .as_ref()
                            .map_or(false, |r| r.name == call.name)
                    })
                });
                assert!(answered, "call '{}' at {} has no response: {:?}", call.name, i, contents);
            }
        }
    }

    pub fn model_config() -> ModelConfig {
        ModelConfig {
            name: "test".into(),
            api_url: "http://localhost".into(),
            model: "test-model".into(),
            api_key_ref: None,
        }
    }

    pub fn session_with(provider: Arc<ScriptedProvider>) -> ChatSession {
        ChatSession::create(
            provider,
            model_config(),
            "key".into(),
            SessionConfig::travel_assistant(None),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::api::{ContentRole, StreamChunk};
    use serde_json::json;

    #[tokio::test]
    async fn send_appends_user_turn_before_requesting() {
        let provider = ScriptedProvider::new(vec![ScriptedRound::ok(vec![StreamChunk::text("hi")])]);
        let mut session = session_with(provider.clone());

        session.send("Find me a train").await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].contents, vec![Content::user_text("Find me a train")]);
        assert!(requests[0].system_instruction.contains("Wanderlust"));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn tool_result_goes_out_as_function_response() {
        let provider = ScriptedProvider::new(vec![
            ScriptedRound::ok(vec![]),
            ScriptedRound::ok(vec![]),
        ]);
        let mut session = session_with(provider.clone());
        session.send("go").await.unwrap();
        session.record_model_turn(vec![Part::function_call("search_trips", json!({}))]);
        session
            .send_tool_result("search_trips", json!({ "error": "Unknown function" }))
            .await
            .unwrap();

        let last = provider.requests().pop().unwrap();
        assert_eq!(last.contents.len(), 3);
        assert_eq!(last.contents[1].role, ContentRole::Model);
        let response = last.contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "search_trips");
        assert_eq!(response.response, json!({ "result": { "error": "Unknown function" } }));
    }

    #[tokio::test]
    async fn failed_open_leaves_history_untouched() {
        let provider = ScriptedProvider::new(vec![ScriptedRound::OpenFails("offline".into())]);
        let mut session = session_with(provider);

        assert!(session.send("hello").await.is_err());
        assert!(session.history().is_empty());
    }

    #[test]
    fn replace_keeps_nothing_but_credentials() {
        let provider = ScriptedProvider::new(vec![]);
        let mut session = session_with(provider);
        session.record_model_turn(vec![Part::text("earlier")]);

        let location = GeoLocation { latitude: 35.68, longitude: 139.69 };
        let fresh = session.replace(SessionConfig::travel_assistant(Some(location)));

        assert_ne!(fresh.id(), session.id());
        assert!(fresh.history().is_empty());
        assert_eq!(fresh.config().location_bias, Some(location));
    }

    #[test]
    fn recorded_tool_result_answers_pending_call() {
        let mut session = session_with(ScriptedProvider::new(vec![]));
        session.record_model_turn(vec![Part::function_call("book_trip", json!({}))]);
        session.record_tool_result("book_trip", json!({ "error": "stopped" }));

        assert_eq!(session.history().len(), 2);
        assert_calls_answered(session.history());
    }

    #[test]
    fn empty_model_turn_is_skipped() {
        let mut session = session_with(ScriptedProvider::new(vec![]));
        session.record_model_turn(vec![]);
        assert!(session.history().is_empty());
    }
}
