use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Who authored a transcript entry
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

// Represents a single message in the visible chat transcript
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "Uuid::new_v4")] // Generate a new UUID if missing during deserialization
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.into(),
            is_streaming: false,
            grounding_metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            ..Self::user(text)
        }
    }

    // Empty model message that the stream fills in
    pub fn model_placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::model(String::new())
        }
    }
}

// Overall state of the chat, drives whether input is accepted
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatStatus {
    #[default]
    Idle,
    Thinking,
    Streaming,
    Error,
}

impl ChatStatus {
    /// Input is locked while any round, including nested tool rounds, is in flight.
    pub fn accepts_input(&self) -> bool {
        matches!(self, ChatStatus::Idle | ChatStatus::Error)
    }
}

// --- Grounding ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

impl GroundingMetadata {
    pub fn is_empty(&self) -> bool {
        self.grounding_chunks.is_empty()
    }

    pub fn web_sources(&self) -> impl Iterator<Item = &WebSource> {
        self.grounding_chunks.iter().filter_map(|c| c.web.as_ref())
    }

    pub fn map_sources(&self) -> impl Iterator<Item = &MapsSource> {
        self.grounding_chunks.iter().filter_map(|c| c.maps.as_ref())
    }
}

// One citation: a web page or a maps place
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroundingChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps: Option<MapsSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct WebSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MapsSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub place_answer_sources: Vec<PlaceAnswerSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaceAnswerSource {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_snippets: Vec<ReviewSnippet>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct ReviewSnippet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// Location used to bias maps grounding
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

// --- Booking ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Flight,
    Train,
    Bus,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Flight => "flight",
            TransportMode::Train => "train",
            TransportMode::Bus => "bus",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "flight" => Some(TransportMode::Flight),
            "train" => Some(TransportMode::Train),
            "bus" => Some(TransportMode::Bus),
            _ => None,
        }
    }
}

// One search result. Times and prices are preformatted strings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TripOption {
    pub id: String,
    pub mode: TransportMode,
    pub operator: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub duration: String,
    pub price: String,
    pub origin: String,
    pub destination: String,
    pub date: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TicketStatus {
    #[default]
    #[serde(rename = "CONFIRMED")]
    Confirmed,
}

// A confirmed booking; never mutated after the backend issues it
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookedTicket {
    #[serde(flatten)]
    pub trip: TripOption,
    pub ticket_id: String,
    pub passenger_name: String,
    pub seat_number: String,
    pub status: TicketStatus,
    // The persona's ticket template leaves this out, so accept its absence
    #[serde(default)]
    pub qr_code_data: String,
}

// Represents the configured model endpoint
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelConfig {
    pub name: String, // User-friendly name (e.g., "Gemini 2.5 Flash")
    pub api_url: String, // Base URL
    pub model: String,
    // Store reference to key, not the key itself - e.g., 'keyring' or 'env:MY_API_KEY'
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_ref: Option<String>,
}
