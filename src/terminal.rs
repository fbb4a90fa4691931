use crate::chat::ChatEvent;
use crate::models::{ChatStatus, GroundingMetadata, Message};
use crate::ticket::{self, TICKET_BLOCK_TAG};
use std::io::{self, Write};

/// Bytes of `text` that can be shown while streaming.
///
/// Stops at a ticket block opener, and holds back a tail that could still
/// grow into one.
fn streamable_len(text: &str) -> usize {
    let opener = format!("```{}", TICKET_BLOCK_TAG);
    if let Some(start) = text.find(&opener) {
        return start;
    }
    let held = (1..opener.len())
        .rev()
        .find(|&k| text.ends_with(&opener[..k]))
        .unwrap_or(0);
    text.len() - held
}

/// Writes chat events as plain text.
///
/// Streamed text is printed as it arrives, except for ticket blocks: those
/// are cut from the prose when the message finishes and shown as a card.
pub struct TerminalRenderer<W: Write> {
    out: W,
    streamed: String,
    printed: usize,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streamed: String::new(),
            printed: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn reset(&mut self) {
        self.streamed.clear();
        self.printed = 0;
    }

    pub fn render(&mut self, event: &ChatEvent) -> io::Result<()> {
        match event {
            ChatEvent::StatusChanged {
                status: ChatStatus::Thinking,
            } => write!(self.out, "…")?,
            ChatEvent::StatusChanged {
                status: ChatStatus::Error,
            } => writeln!(self.out, "(reply failed, send your message again)")?,
            ChatEvent::MessageChunk { delta, .. } => {
                self.streamed.push_str(delta);
                let end = streamable_len(&self.streamed);
                if end > self.printed {
                    write!(self.out, "{}", &self.streamed[self.printed..end])?;
                    self.printed = end;
                }
            }
            ChatEvent::MessageRetracted { .. } => {
                self.reset();
                writeln!(self.out, "\n(checking travel options)")?;
            }
            ChatEvent::MessageFinished { message } => {
                self.finish(message)?;
                self.reset();
            }
            ChatEvent::TranscriptReset { messages } => {
                self.reset();
                for message in messages {
                    writeln!(self.out, "\n{}\n", message.text)?;
                }
            }
            _ => {}
        }
        self.out.flush()
    }

    fn finish(&mut self, message: &Message) -> io::Result<()> {
        let extraction = ticket::extract_ticket(&message.text);
        let shown = &self.streamed[..self.printed];

        // Normally the prose extends what was already shown; anything else
        // (the apology after a failure) is printed in full on its own line
        match extraction.prose.strip_prefix(shown) {
            Some(rest) => writeln!(self.out, "{}", rest)?,
            None => {
                if !shown.is_empty() {
                    writeln!(self.out)?;
                }
                writeln!(self.out, "{}", extraction.prose)?;
            }
        }

        if let Some(ticket) = extraction.ticket {
            writeln!(self.out, "🎫 ─────────────────────────────────────")?;
            writeln!(
                self.out,
                "   {} {} → {}  ({})",
                ticket.trip.mode.as_str().to_uppercase(),
                ticket.trip.origin,
                ticket.trip.destination,
                ticket.trip.date
            )?;
            writeln!(
                self.out,
                "   {}  {} - {}  {}  {}",
                ticket.trip.operator,
                ticket.trip.departure_time,
                ticket.trip.arrival_time,
                ticket.trip.duration,
                ticket.trip.price
            )?;
            writeln!(
                self.out,
                "   Passenger: {}  Seat: {}  Ticket: {}",
                ticket.passenger_name, ticket.seat_number, ticket.ticket_id
            )?;
            writeln!(self.out, "─────────────────────────────────────────")?;
        }
        if let Some(grounding) = &message.grounding_metadata {
            self.sources(grounding)?;
        }
        writeln!(self.out)
    }

    fn sources(&mut self, grounding: &GroundingMetadata) -> io::Result<()> {
        let mut lines = Vec::new();
        for place in grounding.map_sources() {
            if let (Some(title), Some(uri)) = (&place.title, &place.uri) {
                lines.push(format!("   📍 {} <{}>", title, uri));
            }
        }
        for page in grounding.web_sources() {
            if let Some(uri) = &page.uri {
                lines.push(format!("   🔗 {} <{}>", page.title.as_deref().unwrap_or(uri), uri));
            }
        }
        if !lines.is_empty() {
            writeln!(self.out, "Sources:")?;
            for line in lines {
                writeln!(self.out, "{}", line)?;
            }
        }
        Ok(())
    }
}
