use crate::models::{GeoLocation, GroundingMetadata, ModelConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::pin::Pin;

// Alias for the stream type we'll return
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

// --- Conversation content, shaped like the wire format ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    Model,
}

/// One turn of conversation history as the model backend sees it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: &str) -> Self {
        Self {
            role: ContentRole::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn tool_response(name: &str, result: Value) -> Self {
        Self {
            role: ContentRole::User,
            parts: vec![Part::function_response(name, result)],
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: ContentRole::Model,
            parts,
        }
    }
}

/// A content part. Exactly one of the payload fields is normally set.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    // Opaque; must be echoed back with the call it arrived on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn function_call(name: &str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            function_call: Some(FunctionCall {
                name: name.to_string(),
                args,
            }),
            ..Default::default()
        }
    }

    pub fn function_response(name: &str, result: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.to_string(),
                response: json!({ "result": result }),
            }),
            ..Default::default()
        }
    }
}

/// A structured tool invocation requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// One incremental unit of model output.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StreamChunk {
    pub parts: Vec<Part>,
    pub grounding_metadata: Option<GroundingMetadata>,
}

impl StreamChunk {
    pub fn text(text: &str) -> Self {
        Self {
            parts: vec![Part::text(text)],
            grounding_metadata: None,
        }
    }

    pub fn call(name: &str, args: Value) -> Self {
        Self {
            parts: vec![Part::function_call(name, args)],
            grounding_metadata: None,
        }
    }

    pub fn with_grounding(mut self, metadata: GroundingMetadata) -> Self {
        self.grounding_metadata = Some(metadata);
        self
    }

    /// Concatenated text of this chunk's parts, in part order.
    pub fn text_content(&self) -> String {
        self.parts.iter().filter_map(|p| p.text.as_deref()).collect()
    }

    /// First function call among this chunk's parts.
    pub fn function_call(&self) -> Option<&FunctionCall> {
        self.parts.iter().find_map(|p| p.function_call.as_ref())
    }
}

// --- Request description ---

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tools enabled for a session.
#[derive(Clone, Debug, PartialEq)]
pub enum Tool {
    GoogleSearch,
    GoogleMaps,
    Functions(Vec<FunctionDeclaration>),
}

impl Tool {
    fn to_wire(&self) -> Value {
        match self {
            Tool::GoogleSearch => json!({ "googleSearch": {} }),
            Tool::GoogleMaps => json!({ "googleMaps": {} }),
            Tool::Functions(decls) => json!({ "functionDeclarations": decls }),
        }
    }
}

/// Everything a provider needs to open one response stream.
#[derive(Clone, Debug)]
pub struct ChatRequest<'a> {
    pub system_instruction: &'a str,
    pub tools: &'a [Tool],
    pub location_bias: Option<GeoLocation>,
    pub contents: &'a [Content],
}

// Trait defining the interface for model backends
#[async_trait]
pub trait LLMApiProvider: Send + Sync {
    // Returns a stream of response chunks for one round.
    async fn send_chat_stream_request(
        &self,
        config: &ModelConfig,
        api_key: &str,
        request: &ChatRequest<'_>,
    ) -> Result<ChunkStream>;
}

// --- Gemini Provider Implementation ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiRequestBody<'a> {
    contents: &'a [Content],
    system_instruction: GeminiInstruction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<Value>,
}

#[derive(Serialize, Debug)]
struct GeminiInstruction {
    parts: Vec<Part>,
}

// Response structure for STREAMING chunks
#[derive(Deserialize, Debug)]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

fn build_request_body<'a>(request: &ChatRequest<'a>) -> GeminiRequestBody<'a> {
    let tool_config = request.location_bias.map(|loc| {
        json!({
            "retrievalConfig": {
                "latLng": { "latitude": loc.latitude, "longitude": loc.longitude }
            }
        })
    });

    GeminiRequestBody {
        contents: request.contents,
        system_instruction: GeminiInstruction {
            parts: vec![Part::text(request.system_instruction)],
        },
        tools: request.tools.iter().map(Tool::to_wire).collect(),
        tool_config,
    }
}

// Turns one SSE data payload into a chunk. Only the first candidate is used.
fn parse_stream_event(event_data: &str) -> Result<StreamChunk> {
    let response: GeminiStreamResponse = serde_json::from_str(event_data)
        .with_context(|| format!("Failed to parse stream chunk as JSON: {}", event_data))?;

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(StreamChunk::default());
    };

    Ok(StreamChunk {
        parts: candidate.content.map(|c| c.parts).unwrap_or_default(),
        grounding_metadata: candidate.grounding_metadata,
    })
}

pub struct GeminiProvider {
    client: Client,
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMApiProvider for GeminiProvider {
    async fn send_chat_stream_request(
        &self,
        config: &ModelConfig,
        api_key: &str,
        request: &ChatRequest<'_>,
    ) -> Result<ChunkStream> {
        log::info!(
            "Sending STREAM request to {} using model: {} ({} contents)",
            config.api_url,
            config.model,
            request.contents.len()
        );

        let request_url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            config.api_url.trim_end_matches('/'),
            config.model
        );

        let response = self
            .client
            .post(&request_url)
            .header("x-goog-api-key", api_key)
            .json(&build_request_body(request))
            .send()
            .await
            .context("Failed to send stream request to model API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            log::error!("Model API stream request failed with status {}: {}", status, error_body);
            return Err(anyhow::anyhow!(
                "API stream request failed with status {}: {}",
                status,
                error_body
            ));
        }

        let chunk_stream = response.bytes_stream().eventsource().map(|event_result| -> Result<StreamChunk> {
            let event = event_result.context("Error reading stream event")?;
            let chunk = parse_stream_event(event.data.trim());
            if let Err(e) = &chunk {
                log::error!("Error processing stream chunk: {:?}", e);
            }
            chunk
        });

        Ok(Box::pin(chunk_stream))
    }
}
