use crate::api::{FunctionCall, FunctionDeclaration, Tool};
use crate::models::{BookedTicket, TransportMode, TripOption};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SEARCH_TRIPS: &str = "search_trips";
pub const BOOK_TRIP: &str = "book_trip";

pub const UNKNOWN_FUNCTION: &str = "Unknown function";
pub const TOOL_FAILED: &str = "Failed to execute tool";

// Interface of the service that actually searches and books trips
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn search_trips(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
        mode: TransportMode,
    ) -> Result<Vec<TripOption>>;

    async fn book_trip(
        &self,
        trip_id: &str,
        passenger_name: &str,
        context: &TripContext,
    ) -> Result<BookedTicket>;
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SearchTripsArgs {
    pub origin: String,
    pub destination: String,
    pub date: String,
    #[serde(default)]
    pub mode: Option<String>,
}

impl SearchTripsArgs {
    /// Requested mode, falling back to flights when absent or unrecognized.
    pub fn mode(&self) -> TransportMode {
        self.mode
            .as_deref()
            .and_then(TransportMode::from_str)
            .unwrap_or_default()
    }
}

// Trip fields the model echoes back when booking, all optional
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TripContext {
    pub mode: Option<String>,
    pub operator: Option<String>,
    pub departure_time: Option<String>,
    pub arrival_time: Option<String>,
    pub duration: Option<String>,
    pub price: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookTripArgs {
    pub trip_id: String,
    pub passenger_name: String,
    #[serde(flatten)]
    pub context: TripContext,
}

/// The closed set of tools the model may call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SearchTrips(SearchTripsArgs),
    BookTrip(BookTripArgs),
    Unknown { name: String },
}

impl ToolCall {
    /// Fails only when a known tool's arguments don't match its schema.
    pub fn from_function_call(call: &FunctionCall) -> Result<Self> {
        let args = Value::Object(call.args.clone());
        match call.name.as_str() {
            SEARCH_TRIPS => Ok(ToolCall::SearchTrips(
                serde_json::from_value(args).context("Invalid search_trips arguments")?,
            )),
            BOOK_TRIP => Ok(ToolCall::BookTrip(
                serde_json::from_value(args).context("Invalid book_trip arguments")?,
            )),
            other => Ok(ToolCall::Unknown {
                name: other.to_string(),
            }),
        }
    }
}

/// Backend answer fed back to the model as a tool response.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Trips(Vec<TripOption>),
    Ticket(BookedTicket),
    Error(String),
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error(_))
    }

    pub fn to_value(&self) -> Value {
        let value = match self {
            ToolResult::Trips(trips) => serde_json::to_value(trips),
            ToolResult::Ticket(ticket) => serde_json::to_value(ticket),
            ToolResult::Error(message) => return json!({ "error": message }),
        };
        // These types always serialize; keep the error shape if that ever changes
        value.unwrap_or_else(|e| {
            log::error!("Failed to serialize tool result: {}", e);
            json!({ "error": TOOL_FAILED })
        })
    }
}

/// Runs one tool call against the backend. Never fails: problems become error results.
pub async fn dispatch(backend: &dyn ToolBackend, call: &FunctionCall) -> ToolResult {
    log::info!("Function call detected: {} {}", call.name, Value::Object(call.args.clone()));

    let tool_call = match ToolCall::from_function_call(call) {
        Ok(tool_call) => tool_call,
        Err(e) => {
            log::error!("Tool execution failed: {:?}", e);
            return ToolResult::Error(TOOL_FAILED.to_string());
        }
    };

    let outcome = match &tool_call {
        ToolCall::SearchTrips(args) => backend
            .search_trips(&args.origin, &args.destination, &args.date, args.mode())
            .await
            .map(ToolResult::Trips),
        ToolCall::BookTrip(args) => backend
            .book_trip(&args.trip_id, &args.passenger_name, &args.context)
            .await
            .map(ToolResult::Ticket),
        ToolCall::Unknown { name } => {
            log::warn!("Model requested unknown tool '{}'", name);
            Ok(ToolResult::Error(UNKNOWN_FUNCTION.to_string()))
        }
    };

    let result = outcome.unwrap_or_else(|e| {
        log::error!("Tool execution failed: {:?}", e);
        ToolResult::Error(TOOL_FAILED.to_string())
    });
    if result.is_error() {
        log::warn!("Function {} answered with error: {}", call.name, result.to_value());
    } else {
        log::info!("Function result for {}: {}", call.name, result.to_value());
    }
    result
}

pub fn function_declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: SEARCH_TRIPS.to_string(),
            description: "Search for flights, trains, or buses between cities on a specific date."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "origin": { "type": "STRING", "description": "City of origin" },
                    "destination": { "type": "STRING", "description": "City of destination" },
                    "date": { "type": "STRING", "description": "Date of travel (YYYY-MM-DD or human readable)" },
                    "mode": {
                        "type": "STRING",
                        "description": "Mode of transport: 'flight', 'train', or 'bus'",
                        "enum": ["flight", "train", "bus"]
                    }
                },
                "required": ["origin", "destination", "date"]
            }),
        },
        FunctionDeclaration {
            name: BOOK_TRIP.to_string(),
            description: "Book a specific trip option for a passenger.".to_string(),
            // Trip details are echoed back so the booking can be reconstructed
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "tripId": { "type": "STRING", "description": "The ID of the trip to book" },
                    "passengerName": { "type": "STRING", "description": "Full name of the passenger" },
                    "mode": { "type": "STRING", "description": "Transport mode" },
                    "operator": { "type": "STRING" },
                    "departureTime": { "type": "STRING" },
                    "arrivalTime": { "type": "STRING" },
                    "duration": { "type": "STRING" },
                    "price": { "type": "STRING" },
                    "origin": { "type": "STRING" },
                    "destination": { "type": "STRING" },
                    "date": { "type": "STRING" }
                },
                "required": ["tripId", "passengerName"]
            }),
        },
    ]
}

/// Grounding tools plus the booking functions.
pub fn default_tools() -> Vec<Tool> {
    vec![
        Tool::GoogleSearch,
        Tool::GoogleMaps,
        Tool::Functions(function_declarations()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Part;

    fn call(name: &str, args: Value) -> FunctionCall {
        Part::function_call(name, args).function_call.unwrap()
    }

    #[test]
    fn parses_search_with_default_mode() {
        let parsed = ToolCall::from_function_call(&call(
            SEARCH_TRIPS,
            json!({ "origin": "Paris", "destination": "Tokyo", "date": "2024-06-01" }),
        ))
        .unwrap();
        let ToolCall::SearchTrips(args) = parsed else {
            panic!("expected search");
        };
        assert_eq!(args.mode(), TransportMode::Flight);
    }

    #[test]
    fn parses_booking_context() {
        let parsed = ToolCall::from_function_call(&call(
            BOOK_TRIP,
            json!({ "tripId": "BUS-1", "passengerName": "Ana", "operator": "MegaBus", "price": "$30" }),
        ))
        .unwrap();
        let ToolCall::BookTrip(args) = parsed else {
            panic!("expected booking");
        };
        assert_eq!(args.trip_id, "BUS-1");
        assert_eq!(args.context.operator.as_deref(), Some("MegaBus"));
        assert_eq!(args.context.origin, None);
    }

    #[test]
    fn unknown_name_is_not_a_parse_error() {
        let parsed = ToolCall::from_function_call(&call("cancel_trip", json!({}))).unwrap();
        assert_eq!(parsed, ToolCall::Unknown { name: "cancel_trip".into() });
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_marker_without_backend_call() {
        let backend = MockToolBackend::new();
        let result = dispatch(&backend, &call("cancel_trip", json!({ "ticketId": "T" }))).await;
        assert_eq!(result.to_value(), json!({ "error": "Unknown function" }));
    }

    #[tokio::test]
    async fn backend_failure_yields_error_marker() {
        let mut backend = MockToolBackend::new();
        backend
            .expect_search_trips()
            .times(1)
            .returning(|_, _, _, _| Err(anyhow::anyhow!("backend down")));

        let result = dispatch(
            &backend,
            &call(SEARCH_TRIPS, json!({ "origin": "A", "destination": "B", "date": "today" })),
        )
        .await;
        assert!(result.is_error());
        assert_eq!(result.to_value(), json!({ "error": "Failed to execute tool" }));
    }

    #[tokio::test]
    async fn missing_required_arguments_yield_error_marker() {
        let backend = MockToolBackend::new();
        let result = dispatch(&backend, &call(BOOK_TRIP, json!({ "tripId": "X" }))).await;
        assert_eq!(result, ToolResult::Error(TOOL_FAILED.to_string()));
    }

    #[tokio::test]
    async fn search_forwards_mode() {
        let mut backend = MockToolBackend::new();
        backend
            .expect_search_trips()
            .withf(|o, d, date, mode| {
                o.to_string() == "Paris"
                    && d.to_string() == "Tokyo"
                    && date.to_string() == "2024-06-01"
                    && *mode == TransportMode::Train
            })
            .returning(|_, _, _, _| Ok(vec![]));

        let result = dispatch(
            &backend,
            &call(
                SEARCH_TRIPS,
                json!({ "origin": "Paris", "destination": "Tokyo", "date": "2024-06-01", "mode": "train" }),
            ),
        )
        .await;
        assert_eq!(result, ToolResult::Trips(vec![]));
    }

    #[test]
    fn declarations_cover_both_tools() {
        let names: Vec<_> = function_declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![SEARCH_TRIPS, BOOK_TRIP]);
    }
}
