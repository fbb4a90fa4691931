// Declare the modules
pub mod api;
pub mod backend;
pub mod chat;
pub mod config;
pub mod decoder;
pub mod error;
pub mod models;
pub mod resolver;
pub mod session;
pub mod terminal;
pub mod ticket;
pub mod tools;

use crate::api::{GeminiProvider, LLMApiProvider};
use crate::backend::MockTransportBackend;
use crate::chat::{ChatController, ChatEvent};
use crate::config::AppConfig;
use crate::models::GeoLocation;
use crate::resolver::FunctionCallResolver;
use crate::session::{ChatSession, SessionConfig};
use crate::terminal::TerminalRenderer;
use crate::tools::ToolBackend;
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "Commands: /new (start a new trip), /location <lat> <lon>, /quit";

/// Terminal front end. `--set-key <key>` stores the API key in the OS keyring
/// and exits.
pub fn run() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let app_config = AppConfig::from_env()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [flag, key] = args.as_slice() {
        if flag == "--set-key" {
            config::set_api_key_in_keyring(&app_config.model, key)?;
            println!("API key stored for {}", app_config.model.name);
            return Ok(());
        }
    }

    let api_key = config::get_api_key(&app_config.model)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(repl(app_config, api_key))
}

async fn repl(app_config: AppConfig, api_key: String) -> Result<()> {
    let provider: Arc<dyn LLMApiProvider> = Arc::new(GeminiProvider::new());
    let backend: Arc<dyn ToolBackend> = match app_config.tool_latency {
        Some(latency) => Arc::new(MockTransportBackend::with_latency(latency)),
        None => Arc::new(MockTransportBackend::new()),
    };

    let session = ChatSession::create(
        provider,
        app_config.model.clone(),
        api_key,
        SessionConfig::travel_assistant(None),
    );
    let resolver =
        FunctionCallResolver::new(backend).with_max_tool_rounds(app_config.max_tool_rounds);

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx));

    let mut chat = ChatController::new(session, resolver).with_events(tx);
    for message in chat.messages() {
        println!("{}\n", message.text);
    }
    println!("{}\n", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{}", HELP),
            "/new" => chat.new_trip(),
            _ if input.starts_with("/location") => match parse_location(input) {
                Some(location) => {
                    chat.set_location(location);
                    println!("📍 Location set. Nearby places will be prioritized.");
                }
                None => println!("Usage: /location <lat> <lon>"),
            },
            _ => {
                if let Err(e) = chat.send_message(input).await {
                    log::warn!("Message not sent: {:#}", e);
                    println!("{}", e);
                }
            }
        }
    }

    // Closing the channel lets the printer finish
    drop(chat);
    if let Err(e) = printer.await {
        log::error!("Event printer task failed: {}", e);
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn parse_location(input: &str) -> Option<GeoLocation> {
    let mut parts = input.split_whitespace().skip(1);
    let latitude: f64 = parts.next()?.parse().ok()?;
    let longitude: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    Some(GeoLocation { latitude, longitude })
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ChatEvent>) {
    let mut renderer = TerminalRenderer::new(std::io::stdout());
    while let Some(event) = rx.recv().await {
        if let Err(e) = renderer.render(&event) {
            log::error!("Failed to write to terminal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_command_parses_coordinates() {
        assert_eq!(
            parse_location("/location 48.8566 2.3522"),
            Some(GeoLocation { latitude: 48.8566, longitude: 2.3522 })
        );
        assert_eq!(parse_location("/location 48.8566"), None);
        assert_eq!(parse_location("/location north south"), None);
        assert_eq!(parse_location("/location 95 0"), None);
    }
}
