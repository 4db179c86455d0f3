//! Chat command - interactive conversation.

use std::io::Write;
use std::sync::Arc;

use parley_core::{
    ChatSession, ClientError, ConfigUpdate, ConnectivityMonitor, ConnectivityState, ModelCatalog,
    RelayConfig, SessionError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::respond::respond;
use super::SettingsArgs;

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Message(String),
    Model(Option<String>),
    Models,
    Temperature(String),
    MaxTokens(String),
    System(Option<String>),
    ClearSystem,
    Stream(Option<bool>),
    Clear,
    Status,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim().to_string())),
        None => (command, None),
    };
    let arg = arg.filter(|a| !a.is_empty());

    match name {
        "model" => Input::Model(arg),
        "models" => Input::Models,
        "temp" | "temperature" => Input::Temperature(arg.unwrap_or_default()),
        "max" => Input::MaxTokens(arg.unwrap_or_default()),
        "system" => match arg.as_deref() {
            Some("clear") | Some("-") => Input::ClearSystem,
            _ => Input::System(arg),
        },
        "stream" => Input::Stream(match arg.as_deref() {
            Some("on") => Some(true),
            Some("off") => Some(false),
            _ => None,
        }),
        "clear" => Input::Clear,
        "status" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

pub(crate) async fn run(relay: &RelayConfig, settings: &SettingsArgs) -> miette::Result<()> {
    let (session, catalog, monitor) = super::open_session(relay, settings).await?;

    let refresher = catalog.spawn_refresh_loop();
    let watcher = monitor.spawn();
    let notifier = spawn_connectivity_notices(&monitor);

    greet(&session, &catalog);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(miette::miette!("Failed to read input: {}", e)),
        };

        match parse(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Message(text) => {
                if let Err(e) = respond(&session, &text).await {
                    report(&e, relay);
                }
                println!();
            }
            input => handle_command(input, &session, &catalog, &monitor).await,
        }
    }

    refresher.abort();
    watcher.abort();
    notifier.abort();
    println!("Goodbye!");
    Ok(())
}

fn greet(session: &ChatSession, catalog: &ModelCatalog) {
    let config = session.config();
    let name = catalog
        .find(config.model_id())
        .map(|m| m.display_name)
        .unwrap_or_else(|| config.model_id().to_string());

    println!("Chatting with {} ({}).", name, config.model_id());
    println!("Type a message, /help for commands, Ctrl-C to stop a reply.");
    println!();
}

async fn handle_command(
    input: Input,
    session: &Arc<ChatSession>,
    catalog: &ModelCatalog,
    monitor: &ConnectivityMonitor,
) {
    match input {
        Input::Model(None) => println!("Current model: {}", session.config().model_id()),
        Input::Model(Some(id)) => {
            if let Err(e) = catalog.ensure_fresh().await {
                debug!(error = %e, "Catalog refresh before model switch failed");
            }
            apply(session, ConfigUpdate::new().model(id.as_str()), || {
                let name = catalog.find(&id).map(|m| m.display_name).unwrap_or(id.clone());
                format!("Switched to {}", name)
            });
        }
        Input::Models => {
            let current = session.config();
            let models = catalog.list();
            if models.is_empty() {
                super::print_pull_hint();
            }
            for model in models.iter() {
                let marker = if model.matches(current.model_id()) { "*" } else { " " };
                println!("{} {}", marker, super::models::describe(model));
            }
        }
        Input::Temperature(value) => match value.parse::<f32>() {
            Ok(temperature) => apply(session, ConfigUpdate::new().temperature(temperature), || {
                format!("Temperature set to {}", temperature)
            }),
            Err(_) => println!("Usage: /temp <0.0-2.0>"),
        },
        Input::MaxTokens(value) => match value.parse::<i64>() {
            Ok(max_tokens) => apply(session, ConfigUpdate::new().max_tokens(max_tokens), || {
                format!("Max tokens set to {}", max_tokens)
            }),
            Err(_) => println!("Usage: /max <tokens>"),
        },
        Input::System(None) => println!("System prompt: {}", session.config().system_prompt()),
        Input::System(Some(prompt)) => {
            apply(session, ConfigUpdate::new().system_prompt(prompt), || {
                "System prompt updated".to_string()
            })
        }
        Input::ClearSystem => apply(session, ConfigUpdate::new().system_prompt(""), || {
            "System prompt cleared".to_string()
        }),
        Input::Stream(None) => println!("Usage: /stream on|off"),
        Input::Stream(Some(enabled)) => apply(session, ConfigUpdate::new().streaming(enabled), || {
            format!("Streaming {}", if enabled { "enabled" } else { "disabled" })
        }),
        Input::Clear => match session.reset() {
            Ok(()) => println!("History cleared"),
            Err(e) => println!("Error: {}", e),
        },
        Input::Status => {
            let state = monitor.check().await;
            let config = session.config();
            println!("Daemon:      {} ({})", monitor.base_url(), state);
            println!("Model:       {}", config.model_id());
            println!("Temperature: {}", config.temperature());
            println!("Max tokens:  {}", config.max_tokens());
            println!("Streaming:   {}", if config.streaming_enabled() { "on" } else { "off" });
            println!("Turns:       {}", session.transcript().len());
        }
        Input::Help => print_help(),
        Input::Unknown(name) => println!("Unknown command /{}. Type /help for commands.", name),
        Input::Message(_) | Input::Quit | Input::Empty => {}
    }
}

/// Apply a settings change and acknowledge it.
fn apply(session: &ChatSession, update: ConfigUpdate, ack: impl FnOnce() -> String) {
    match session.update_config(&update) {
        Ok(_) => println!("{}", ack()),
        Err(e) => println!("Error: {}", e),
    }
}

fn report(error: &SessionError, relay: &RelayConfig) {
    println!();
    eprintln!("Error: {}", error);
    if let SessionError::Client(ClientError::Unreachable(url)) = error {
        super::print_troubleshooting(url);
    } else if let SessionError::Client(ClientError::Timeout(_)) = error {
        eprintln!(
            "The daemon at {} stopped responding. Large models can be slow to load; try again.",
            relay.base_url
        );
    }
}

fn spawn_connectivity_notices(monitor: &ConnectivityMonitor) -> tokio::task::JoinHandle<()> {
    let mut events = monitor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.to {
                ConnectivityState::Unreachable => {
                    eprintln!("\n[lost connection to the daemon]")
                }
                ConnectivityState::Reachable => eprintln!("\n[daemon is reachable again]"),
                ConnectivityState::Unknown => {}
            }
        }
    })
}

fn print_help() {
    println!("Commands:");
    println!("  /model [name]     Show or switch the model");
    println!("  /models           List installed models");
    println!("  /temp <value>     Set temperature (0.0-2.0)");
    println!("  /max <tokens>     Set the maximum answer length");
    println!("  /system [prompt]  Show or set the system prompt");
    println!("  /system clear     Remove the system prompt");
    println!("  /stream on|off    Toggle streaming");
    println!("  /clear            Clear the conversation");
    println!("  /status           Show daemon and session status");
    println!("  /help             Show this help");
    println!("  /quit             Leave the chat");
    println!();
    println!("Press Ctrl-C while an answer is printing to stop it.");
}
