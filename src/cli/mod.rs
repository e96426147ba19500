//! Command-line interface.
//!
//! With no subcommand the binary serves the HTTP API. Subcommands:
//! - `calendar` - Print a month grid with the same generator the API uses
//! - `chat` - Follow a conversation against a running server

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::booking::generate_month;
use crate::chat::{ChatEvent, ChatSession, HttpMessageSource, PollOptions};
use crate::config::Config;
use crate::context::{Clock, SystemClock};
use crate::db::ChatMessage;
use crate::validation::parse_date;

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "ventech-locator")]
#[command(author, version, about = "Venue listings, availability calendars and reservation requests", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ventech.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the availability grid for one month
    Calendar {
        #[arg(long)]
        year: i32,
        /// 1-12; other values roll into neighbouring years
        #[arg(long)]
        month: i32,
        /// Blocked date (YYYY-MM-DD), repeatable
        #[arg(long = "blocked")]
        blocked: Vec<String>,
        /// Treat this date (YYYY-MM-DD) as today
        #[arg(long)]
        today: Option<String>,
    },

    /// Chat with another user through a running server
    Chat {
        /// API URL to connect to
        #[arg(long, env = "VENTECH_API_URL", default_value = "http://localhost:8080")]
        api_url: String,
        /// Session token from /api/auth/login
        #[arg(long, env = "VENTECH_TOKEN")]
        token: String,
        /// User id of the other participant
        #[arg(long)]
        peer: i64,
    },
}

/// Run a CLI subcommand
pub async fn run_command(command: &Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Calendar {
            year,
            month,
            blocked,
            today,
        } => cmd_calendar(config, *year, *month, blocked, today.as_deref()),
        Commands::Chat {
            api_url,
            token,
            peer,
        } => cmd_chat(config, api_url, token, *peer).await,
    }
}

fn parse_blocked(values: &[String]) -> Result<BTreeSet<NaiveDate>> {
    values
        .iter()
        .map(|raw| {
            parse_date(raw.trim())
                .map_err(|e| anyhow::anyhow!(e))
                .with_context(|| format!("Invalid --blocked value '{}'", raw))
        })
        .collect()
}

fn cmd_calendar(
    config: &Config,
    year: i32,
    month: i32,
    blocked: &[String],
    today: Option<&str>,
) -> Result<()> {
    let blocked = parse_blocked(blocked)?;
    let today = match today {
        Some(raw) => parse_date(raw.trim())
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Invalid --today value '{}'", raw))?,
        None => SystemClock::new(config.server.utc_offset()).today(),
    };

    let grid = generate_month(year, month, &blocked, today)?;
    print!("{}", grid);
    Ok(())
}

/// One printable line for a message in the conversation with `peer_id`.
fn format_message(message: &ChatMessage, peer_id: i64) -> String {
    let who = if message.sender_id == peer_id {
        format!("#{}", peer_id)
    } else {
        "you".to_string()
    };
    format!("[{}] {}: {}", message.created_at, who, message.message_text)
}

fn render_event(event: &ChatEvent, peer_id: i64) -> Vec<String> {
    match event {
        ChatEvent::Loaded { messages, .. } if messages.is_empty() => {
            vec!["(no messages yet)".to_string()]
        }
        ChatEvent::Loaded { messages, .. } | ChatEvent::Received { messages, .. } => messages
            .iter()
            .map(|m| format_message(m, peer_id))
            .collect(),
        ChatEvent::Confirmed { .. } => Vec::new(),
        ChatEvent::SendFailed { error, .. } => vec![format!("! message not sent: {}", error)],
        ChatEvent::PollFailed {
            error, retry_in, ..
        } => vec![format!(
            "! could not load messages ({}), retrying in {}s",
            error,
            retry_in.as_secs()
        )],
    }
}

async fn cmd_chat(config: &Config, api_url: &str, token: &str, peer_id: i64) -> Result<()> {
    let source = Arc::new(HttpMessageSource::new(api_url, token)?);
    let (mut session, mut events) = ChatSession::new(source, PollOptions::from(&config.chat));
    session.open(peer_id);

    println!("Chatting with #{} via {} (Ctrl+C to quit)", peer_id, api_url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                for line in render_event(&event, peer_id) {
                    println!("{}", line);
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(text) if text.trim().is_empty() => {}
                    // Sent messages are printed when the poll returns them
                    Some(text) => {
                        if let Err(e) = session.send(&text).await {
                            tracing::debug!(error = %e, "Send failed");
                        }
                    }
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(id: i64, sender_id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            sender_id,
            receiver_id: if sender_id == 2 { 1 } else { 2 },
            message_text: text.to_string(),
            created_at: "2025-06-10T09:00:00.000000Z".to_string(),
            is_read: false,
        }
    }

    #[test]
    fn test_parse_calendar_args() {
        let cli = Cli::parse_from([
            "ventech-locator",
            "calendar",
            "--year",
            "2025",
            "--month",
            "6",
            "--blocked",
            "2025-06-20",
            "--blocked",
            "2025-06-21",
            "--today",
            "2025-06-10",
        ]);
        match cli.command {
            Some(Commands::Calendar { year, month, blocked, today }) => {
                assert_eq!((year, month), (2025, 6));
                assert_eq!(blocked.len(), 2);
                assert_eq!(today.as_deref(), Some("2025-06-10"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("ventech.toml"));
    }

    #[test]
    fn test_no_subcommand_serves() {
        let cli = Cli::parse_from(["ventech-locator", "--log-level", "debug"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_parse_blocked_rejects_bad_dates() {
        let ok = parse_blocked(&["2025-06-20".to_string(), "2025-06-20".to_string()]).unwrap();
        assert_eq!(ok.len(), 1);
        assert!(parse_blocked(&["2025-02-30".to_string()]).is_err());
        assert!(parse_blocked(&["20/06/2025".to_string()]).is_err());
    }

    #[test]
    fn test_calendar_rejects_year_out_of_range() {
        let config = Config::default();
        assert!(cmd_calendar(&config, 1969, 5, &[], Some("2025-06-10")).is_err());
        assert!(cmd_calendar(&config, 2025, 6, &[], Some("2025-06-10")).is_ok());
    }

    #[test]
    fn test_render_events() {
        let loaded = ChatEvent::Loaded {
            peer_id: 2,
            messages: vec![message(1, 2, "hello"), message(2, 1, "hi")],
        };
        assert_eq!(
            render_event(&loaded, 2),
            vec![
                "[2025-06-10T09:00:00.000000Z] #2: hello".to_string(),
                "[2025-06-10T09:00:00.000000Z] you: hi".to_string(),
            ]
        );

        let empty = ChatEvent::Loaded { peer_id: 2, messages: vec![] };
        assert_eq!(render_event(&empty, 2), vec!["(no messages yet)".to_string()]);

        let failed = ChatEvent::PollFailed {
            peer_id: 2,
            error: "timeout".into(),
            retry_in: Duration::from_secs(6),
        };
        assert!(render_event(&failed, 2)[0].contains("retrying in 6s"));
    }
}
