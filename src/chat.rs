use crate::decoder::StreamEvent;
use crate::error::ChatError;
use crate::models::{ChatStatus, GeoLocation, GroundingMetadata, Message};
use crate::resolver::FunctionCallResolver;
use crate::session::{ChatSession, SessionConfig};
use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub const WELCOME_MESSAGE: &str = "Hi there! I'm your Wanderlust travel companion. 🌍✈️\n\nI can help you find flights, hotels, interesting places to visit, and plan your perfect itinerary. Where are you dreaming of going?";
pub const NEW_TRIP_MESSAGE: &str = "Ready for a new adventure! Where to next?";
pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered a temporary glitch. Please try again!";

/// Updates pushed to whatever renders the transcript.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    MessageAdded { message: Message },
    MessageChunk { message_id: Uuid, delta: String },
    MessageRetracted { message_id: Uuid },
    GroundingUpdated { message_id: Uuid, grounding: GroundingMetadata },
    MessageFinished { message: Message },
    StatusChanged { status: ChatStatus },
    TranscriptReset { messages: Vec<Message> },
}

fn emit(events: &Option<UnboundedSender<ChatEvent>>, event: ChatEvent) {
    if let Some(tx) = events {
        if let Err(e) = tx.send(event) {
            log::error!("Failed to emit chat event: {:?}", e.0);
        }
    }
}

/// Owns the live session and the visible transcript.
///
/// `&mut self` on every operation keeps a single writer; the status check in
/// `send_message` additionally rejects input while a reply is in flight.
pub struct ChatController {
    session: ChatSession,
    resolver: FunctionCallResolver,
    location: Option<GeoLocation>,
    messages: Vec<Message>,
    status: ChatStatus,
    events: Option<UnboundedSender<ChatEvent>>,
}

impl ChatController {
    pub fn new(session: ChatSession, resolver: FunctionCallResolver) -> Self {
        Self {
            location: session.config().location_bias,
            session,
            resolver,
            messages: vec![Message::model(WELCOME_MESSAGE)],
            status: ChatStatus::Idle,
            events: None,
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<ChatEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> ChatStatus {
        self.status
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn location(&self) -> Option<GeoLocation> {
        self.location
    }

    fn set_status(&mut self, status: ChatStatus) {
        self.status = status;
        emit(&self.events, ChatEvent::StatusChanged { status });
    }

    fn push_message(&mut self, message: Message) {
        emit(&self.events, ChatEvent::MessageAdded { message: message.clone() });
        self.messages.push(message);
    }

    /// Sends user text and streams the reply into a new model message.
    ///
    /// Only caller mistakes are returned as errors. A failed reply still
    /// returns the model message, holding the apology text, with the status
    /// set to `Error` so input is accepted again.
    pub async fn send_message(&mut self, content: &str) -> Result<Message> {
        let text = content.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage.into());
        }
        if !self.status.accepts_input() {
            log::warn!("Rejected message while status is {:?}", self.status);
            return Err(ChatError::Busy.into());
        }

        self.push_message(Message::user(text));
        let placeholder = Message::model_placeholder();
        let message_id = placeholder.id;
        self.push_message(placeholder);
        self.set_status(ChatStatus::Thinking);

        let index = self.messages.len() - 1;
        let Self {
            session,
            resolver,
            messages,
            status,
            events,
            ..
        } = self;
        let events = &*events;

        let mut sink = |event: StreamEvent| {
            let message = &mut messages[index];
            match event {
                StreamEvent::Text(delta) => {
                    if *status != ChatStatus::Streaming {
                        *status = ChatStatus::Streaming;
                        emit(events, ChatEvent::StatusChanged { status: *status });
                    }
                    message.text.push_str(&delta);
                    emit(events, ChatEvent::MessageChunk { message_id, delta });
                }
                StreamEvent::Grounding(grounding) => {
                    message.grounding_metadata = Some(grounding.clone());
                    emit(events, ChatEvent::GroundingUpdated { message_id, grounding });
                }
                StreamEvent::Retract => {
                    message.text.clear();
                    message.grounding_metadata = None;
                    *status = ChatStatus::Thinking;
                    emit(events, ChatEvent::MessageRetracted { message_id });
                    emit(events, ChatEvent::StatusChanged { status: *status });
                }
            }
        };

        log::info!("Session {}: sending user message ({} chars)", session.id(), text.len());
        let result = match session.send(text).await {
            Ok(stream) => resolver.resolve(session, stream, &mut sink).await,
            Err(e) => Err(e),
        };

        let final_status = {
            let message = &mut self.messages[index];
            message.is_streaming = false;
            match result {
                Ok(resolution) => {
                    if !resolution.tool_calls.is_empty() {
                        log::info!("Reply {} used tools: {:?}", message_id, resolution.tool_calls);
                    }
                    message.text = resolution.text;
                    message.grounding_metadata = resolution.grounding;
                    ChatStatus::Idle
                }
                Err(e) => {
                    log::error!("Reply {} failed: {:?}", message_id, e);
                    message.text = APOLOGY_MESSAGE.to_string();
                    message.grounding_metadata = None;
                    ChatStatus::Error
                }
            }
        };

        let finished = self.messages[index].clone();
        emit(&self.events, ChatEvent::MessageFinished { message: finished.clone() });
        self.set_status(final_status);
        Ok(finished)
    }

    /// Starts over: fresh session, fresh transcript. The location bias is kept.
    pub fn new_trip(&mut self) {
        self.session = self
            .session
            .replace(SessionConfig::travel_assistant(self.location));
        self.messages = vec![Message::model(NEW_TRIP_MESSAGE)];
        emit(
            &self.events,
            ChatEvent::TranscriptReset {
                messages: self.messages.clone(),
            },
        );
        self.set_status(ChatStatus::Idle);
    }

    /// Rebuilds the session with a location bias. The transcript stays on
    /// screen but the model no longer sees the earlier conversation.
    pub fn set_location(&mut self, location: GeoLocation) {
        log::info!(
            "Location enabled: {:.4}, {:.4}",
            location.latitude,
            location.longitude
        );
        self.location = Some(location);
        self.session = self
            .session
            .replace(SessionConfig::travel_assistant(Some(location)));
    }
}
