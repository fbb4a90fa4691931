use crate::models::{BookedTicket, TicketStatus, TransportMode, TripOption};
use crate::tools::{ToolBackend, TripContext};
use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SEAT_LETTERS: [char; 4] = ['A', 'B', 'C', 'D'];

fn operators(mode: TransportMode) -> &'static [&'static str] {
    match mode {
        TransportMode::Flight => &["SkyWings", "Global Air", "JetStream", "AeroSpeed"],
        TransportMode::Train => &["RailConnect", "SpeedLink", "CityExpress", "IronHorse"],
        TransportMode::Bus => &["RoadRunner", "MegaBus", "GreyCoach", "QuickShuttle"],
    }
}

fn random_code<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

// HH:MM with the hour in [start_hour, 23)
fn random_time<R: Rng>(rng: &mut R, start_hour: u32) -> String {
    let h = rng.gen_range(start_hour..23);
    let m = rng.gen_range(0..60);
    format!("{:02}:{:02}", h, m)
}

fn random_duration<R: Rng>(rng: &mut R, mode: TransportMode) -> String {
    let hours = match mode {
        TransportMode::Flight => rng.gen_range(1..11),
        TransportMode::Train => rng.gen_range(1..6),
        TransportMode::Bus => rng.gen_range(2..10),
    };
    format!("{}h {}m", hours, rng.gen_range(0..60))
}

fn random_price<R: Rng>(rng: &mut R, mode: TransportMode) -> String {
    let dollars = match mode {
        TransportMode::Flight => rng.gen_range(150..650),
        TransportMode::Train => rng.gen_range(50..150),
        TransportMode::Bus => rng.gen_range(20..70),
    };
    format!("${}", dollars)
}

fn generate_trips(origin: &str, destination: &str, date: &str, mode: TransportMode) -> Vec<TripOption> {
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(2..=4);

    (0..count)
        .map(|_| TripOption {
            id: format!("{}-{}", mode.as_str().to_uppercase(), random_code(&mut rng, 6)),
            mode,
            operator: operators(mode)
                .choose(&mut rng)
                .copied()
                .unwrap_or_default()
                .to_string(),
            departure_time: random_time(&mut rng, 6),
            arrival_time: random_time(&mut rng, 12),
            duration: random_duration(&mut rng, mode),
            price: random_price(&mut rng, mode),
            origin: origin.to_string(),
            destination: destination.to_string(),
            date: date.to_string(),
        })
        .collect()
}

// Echoed context wins; otherwise the id prefix ("TRAIN-...") names the mode
fn booking_mode(trip_id: &str, context: &TripContext) -> TransportMode {
    context
        .mode
        .as_deref()
        .and_then(TransportMode::from_str)
        .or_else(|| trip_id.split('-').next().and_then(TransportMode::from_str))
        .unwrap_or_default()
}

fn issue_ticket(trip_id: &str, passenger_name: &str, context: &TripContext) -> BookedTicket {
    let mut rng = rand::thread_rng();
    let field = |value: &Option<String>| value.clone().unwrap_or_default();

    BookedTicket {
        trip: TripOption {
            id: trip_id.to_string(),
            mode: booking_mode(trip_id, context),
            operator: field(&context.operator),
            departure_time: field(&context.departure_time),
            arrival_time: field(&context.arrival_time),
            duration: field(&context.duration),
            price: field(&context.price),
            origin: field(&context.origin),
            destination: field(&context.destination),
            date: field(&context.date),
        },
        ticket_id: format!("TKT-{}", random_code(&mut rng, 9)),
        passenger_name: passenger_name.to_string(),
        seat_number: format!(
            "{}{}",
            rng.gen_range(1..=30),
            SEAT_LETTERS[rng.gen_range(0..SEAT_LETTERS.len())]
        ),
        status: TicketStatus::Confirmed,
        qr_code_data: format!("TICKET:{}|{}", trip_id, passenger_name),
    }
}

/// Reference backend that fabricates plausible trips and always succeeds.
#[derive(Debug, Clone)]
pub struct MockTransportBackend {
    search_latency: Duration,
    booking_latency: Duration,
}

impl MockTransportBackend {
    pub fn new() -> Self {
        Self {
            search_latency: Duration::from_millis(1000),
            booking_latency: Duration::from_millis(1500),
        }
    }

    /// Same latency for both operations; zero makes it instant.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            search_latency: latency,
            booking_latency: latency,
        }
    }
}

impl Default for MockTransportBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolBackend for MockTransportBackend {
    async fn search_trips(
        &self,
        origin: &str,
        destination: &str,
        date: &str,
        mode: TransportMode,
    ) -> Result<Vec<TripOption>> {
        log::info!("Searching {} from {} to {} on {}", mode.as_str(), origin, destination, date);
        tokio::time::sleep(self.search_latency).await;
        Ok(generate_trips(origin, destination, date, mode))
    }

    async fn book_trip(
        &self,
        trip_id: &str,
        passenger_name: &str,
        context: &TripContext,
    ) -> Result<BookedTicket> {
        log::info!("Booking trip {} for {}", trip_id, passenger_name);
        tokio::time::sleep(self.booking_latency).await;
        Ok(issue_ticket(trip_id, passenger_name, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant() -> MockTransportBackend {
        MockTransportBackend::with_latency(Duration::ZERO)
    }

    #[tokio::test]
    async fn search_returns_two_to_four_matching_options() {
        let trips = instant()
            .search_trips("Paris", "Tokyo", "2024-06-01", TransportMode::Train)
            .await
            .unwrap();

        assert!((2..=4).contains(&trips.len()));
        for trip in &trips {
            assert_eq!(trip.mode, TransportMode::Train);
            assert_eq!(trip.origin, "Paris");
            assert_eq!(trip.destination, "Tokyo");
            assert_eq!(trip.date, "2024-06-01");
            assert!(trip.id.starts_with("TRAIN-"));
            assert_eq!(trip.id.len(), "TRAIN-".len() + 6);
            assert!(operators(TransportMode::Train).contains(&trip.operator.as_str()));
            assert!(trip.price.starts_with('$'));
        }
    }

    #[tokio::test]
    async fn booking_confirms_with_assigned_seat_and_ticket() {
        let ticket = instant()
            .book_trip("TRAIN-AB12CD", "Alex Kim", &TripContext::default())
            .await
            .unwrap();

        assert_eq!(ticket.passenger_name, "Alex Kim");
        assert_eq!(ticket.trip.id, "TRAIN-AB12CD");
        assert_eq!(ticket.trip.mode, TransportMode::Train);
        assert_eq!(ticket.status, TicketStatus::Confirmed);
        assert!(ticket.ticket_id.starts_with("TKT-"));
        assert!(!ticket.seat_number.is_empty());
        assert_eq!(ticket.qr_code_data, "TICKET:TRAIN-AB12CD|Alex Kim");
    }

    #[tokio::test]
    async fn booking_keeps_echoed_context() {
        let context = TripContext {
            mode: Some("bus".into()),
            operator: Some("MegaBus".into()),
            origin: Some("Lyon".into()),
            ..Default::default()
        };
        let ticket = instant().book_trip("X-1", "Sam", &context).await.unwrap();

        assert_eq!(ticket.trip.mode, TransportMode::Bus);
        assert_eq!(ticket.trip.operator, "MegaBus");
        assert_eq!(ticket.trip.origin, "Lyon");
    }

    #[test]
    fn times_stay_in_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let t = random_time(&mut rng, 12);
            let hour: u32 = t[..2].parse().unwrap();
            assert!((12..23).contains(&hour), "{}", t);
        }
    }
}
