use crate::api::{ChunkStream, FunctionCall, Part};
use crate::models::GroundingMetadata;
use anyhow::Result;
use futures::StreamExt;

/// What the decoder tells the transcript while a round streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    Grounding(GroundingMetadata),
    /// The round turned out to be a tool call: drop what it showed so far.
    Retract,
}

/// Receives visible updates for one round.
pub type EventSink<'a> = &'a mut (dyn FnMut(StreamEvent) + Send);

/// Everything one round produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundOutcome {
    /// All text fragments in arrival order, visible or not.
    pub text: String,
    /// Last non-empty grounding metadata seen.
    pub grounding: Option<GroundingMetadata>,
    /// First function call seen; later ones are dropped.
    pub function_call: Option<FunctionCall>,
    /// The model's turn as it should be recorded in history.
    pub model_parts: Vec<Part>,
}

impl RoundOutcome {
    pub fn has_tool_call(&self) -> bool {
        self.function_call.is_some()
    }
}

// Adjacent plain text parts are merged so history holds one text part per run
fn record_part(parts: &mut Vec<Part>, part: Part) {
    let plain_text = part.function_call.is_none()
        && part.function_response.is_none()
        && part.thought_signature.is_none();
    if plain_text {
        if let (Some(last), Some(text)) = (parts.last_mut(), part.text.as_deref()) {
            let last_plain = last.function_call.is_none()
                && last.function_response.is_none()
                && last.thought_signature.is_none();
            if let (true, Some(existing)) = (last_plain, last.text.as_mut()) {
                existing.push_str(text);
                return;
            }
        }
    }
    parts.push(part);
}

/// Drains one round's stream.
///
/// Text is forwarded to `sink` as it arrives until a function call shows up.
/// From that chunk on nothing more is forwarded, and if anything had already
/// been shown a [`StreamEvent::Retract`] is sent so no text from a tool round
/// stays visible. The stream is always drained to the end so grounding that
/// arrives after the call is still captured.
pub async fn decode_round(mut stream: ChunkStream, sink: EventSink<'_>) -> Result<RoundOutcome> {
    let mut outcome = RoundOutcome::default();
    let mut shown_anything = false;
    let mut chunk_count = 0usize;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result?;
        chunk_count += 1;

        let call_before = outcome.function_call.is_some();
        for part in chunk.parts.iter().cloned() {
            if let Some(call) = &part.function_call {
                if outcome.function_call.is_some() {
                    log::warn!("Dropping extra function call '{}' in the same round", call.name);
                    continue;
                }
                outcome.function_call = Some(call.clone());
            }
            record_part(&mut outcome.model_parts, part);
        }

        let text = chunk.text_content();
        outcome.text.push_str(&text);

        let new_grounding = chunk.grounding_metadata.filter(|m| !m.is_empty());
        if let Some(metadata) = &new_grounding {
            outcome.grounding = Some(metadata.clone());
        }

        if outcome.function_call.is_some() {
            if !call_before && shown_anything {
                log::debug!("Function call arrived after visible text; retracting round");
                sink(StreamEvent::Retract);
            }
            continue;
        }

        if !text.is_empty() {
            shown_anything = true;
            sink(StreamEvent::Text(text));
        }
        if let Some(metadata) = new_grounding {
            shown_anything = true;
            sink(StreamEvent::Grounding(metadata));
        }
    }

    log::debug!(
        "Round drained: {} chunks, {} chars, tool call: {}",
        chunk_count,
        outcome.text.len(),
        outcome
            .function_call
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or("none")
    );
    Ok(outcome)
}
