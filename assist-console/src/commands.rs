use assist_common::{Credentials, Session, SessionError, Transport};
use clap::{Parser, Subcommand};

use crate::render;

/// One line typed at the console prompt.
#[derive(Parser, Debug, PartialEq)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ConsoleLine {
    #[command(subcommand)]
    pub command: ConsoleCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConsoleCommand {
    /// Answer a pending question
    Reply {
        /// Question id
        id: String,
        /// Answer text
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Acknowledge a task report
    Confirm {
        /// Task report id
        id: String,
        /// Optional acknowledgment text
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Send a direct message to an online operator
    Chat {
        /// Peer client id
        peer: String,
        /// Message text
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Open the chat thread with a peer
    Open {
        /// Peer client id
        peer: String,
    },
    /// Close the active chat thread
    Close,
    /// Request the online operators; the list prints when it arrives
    Who,
    /// List online operators as last reported
    Peers,
    /// List pending questions and task reports
    Pending,
    /// List every request seen this session
    History,
    /// Show connection status
    Status,
    /// Print the full session snapshot as JSON
    Snapshot,
    /// Connect, or reconnect after a disconnect
    Connect,
    /// Disconnect without reconnecting
    Disconnect,
    /// Leave the console
    #[command(alias = "exit")]
    Quit,
}

pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, clap::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(words).map(|parsed| Some(parsed.command))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub fn execute<T: Transport>(
    session: &mut Session<T>,
    command: ConsoleCommand,
    endpoint: &str,
    credentials: &Credentials,
) -> Flow {
    let result: Result<(), SessionError> = match command {
        ConsoleCommand::Reply { id, text } => session.reply(&id, &text.join(" ")),
        ConsoleCommand::Confirm { id, text } => {
            let text = text.join(" ");
            session.confirm(&id, Some(text.as_str()).filter(|t| !t.is_empty()))
        }
        ConsoleCommand::Chat { peer, text } => session.send_chat(&peer, &text.join(" ")),
        ConsoleCommand::Open { peer } => session.select_chat(&peer).map(|()| {
            render::print_thread(&session.snapshot());
        }),
        ConsoleCommand::Close => {
            session.clear_chat();
            Ok(())
        }
        ConsoleCommand::Who => session
            .refresh_presence()
            .map(|()| println!("Requested online users")),
        ConsoleCommand::Peers => {
            render::print_peers(&session.snapshot());
            Ok(())
        }
        ConsoleCommand::Pending => {
            render::print_pending(&session.snapshot());
            Ok(())
        }
        ConsoleCommand::History => {
            render::print_history(&session.snapshot());
            Ok(())
        }
        ConsoleCommand::Status => {
            render::print_status(&session.snapshot());
            Ok(())
        }
        ConsoleCommand::Snapshot => {
            match serde_json::to_string_pretty(&session.snapshot()) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: {}", e),
            }
            Ok(())
        }
        ConsoleCommand::Connect => {
            // Progress is reported through session notices.
            drop(session.connect(endpoint, credentials.clone()));
            Ok(())
        }
        ConsoleCommand::Disconnect => {
            session.disconnect();
            Ok(())
        }
        ConsoleCommand::Quit => return Flow::Quit,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }
    Flow::Continue
}
