use crate::models::BookedTicket;
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

pub const TICKET_BLOCK_TAG: &str = "json:ticket";

fn ticket_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json:ticket\s*([\s\S]*?)\s*```").expect("ticket block regex is valid"))
}

/// Model text split into prose and an optional booking widget.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketExtraction {
    pub prose: String,
    pub ticket: Option<BookedTicket>,
}

/// Pulls the first `json:ticket` block out of finished model text.
///
/// If there is no block, or its JSON doesn't parse as a ticket, the text comes
/// back untouched and no ticket is returned.
pub fn extract_ticket(text: &str) -> TicketExtraction {
    let untouched = || TicketExtraction {
        prose: text.to_string(),
        ticket: None,
    };

    let Some(captures) = ticket_block_regex().captures(text) else {
        return untouched();
    };
    let (Some(block), Some(payload)) = (captures.get(0), captures.get(1)) else {
        return untouched();
    };

    match serde_json::from_str::<BookedTicket>(payload.as_str()) {
        Ok(ticket) => {
            let mut prose = String::with_capacity(text.len() - block.len());
            prose.push_str(&text[..block.start()]);
            prose.push_str(&text[block.end()..]);
            TicketExtraction {
                prose,
                ticket: Some(ticket),
            }
        }
        Err(e) => {
            log::warn!("Failed to parse ticket JSON: {}", e);
            untouched()
        }
    }
}

/// Formats a ticket as the fenced block the extractor looks for.
pub fn render_ticket_block(ticket: &BookedTicket) -> Result<String> {
    let json = serde_json::to_string_pretty(ticket).context("Failed to serialize ticket")?;
    Ok(format!("```{}\n{}\n```", TICKET_BLOCK_TAG, json))
}
