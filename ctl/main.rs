#![forbid(unsafe_code)]

//! `steward-ctl`: local CLI companion for the `steward` daemon.
//!
//! Connects to the IPC socket and sends JSON commands to the daemon.
//! `send` stays connected and prints replies as the daemon pushes them.

use std::io::{BufRead, BufReader, Write};

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde_json::{json, Value};

use steward::orchestrator::dispatcher::ACK_TEXT;

#[derive(Debug, Parser)]
#[command(
    name = "steward-ctl",
    about = "Local CLI for the steward daemon",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the daemon's `ipc_name` config).
    #[arg(long, default_value = "steward")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a chat message and wait for the reply.
    Send {
        /// Message text.
        text: String,
        /// Sender label recorded with the message.
        #[arg(long)]
        from: Option<String>,
        /// Number of pushed messages to wait for before exiting.
        #[arg(long, default_value_t = 1)]
        replies: usize,
    },

    /// List delegated tasks.
    Tasks,

    /// Show daemon status.
    Status,

    /// Manage missions.
    Mission {
        #[command(subcommand)]
        action: MissionCommand,
    },

    /// List scheduled jobs.
    Schedule,

    /// Run a heartbeat now.
    Beat,
}

#[derive(Debug, Subcommand)]
enum MissionCommand {
    /// Create a mission.
    Create {
        /// Mission title.
        title: String,
        /// Deadline as RFC 3339 or a relative duration such as `3d` or `12h`.
        #[arg(long)]
        deadline: String,
        /// Goal statement; defaults to the title.
        #[arg(long)]
        goal: Option<String>,
        /// Longer description.
        #[arg(long)]
        description: Option<String>,
    },
    /// Show the active mission and every known mission.
    Status,
}

fn main() {
    let args = Cli::parse();

    let (request, replies) = match &args.command {
        Command::Send { text, from, replies } => {
            let mut req = json!({ "command": "message", "text": text });
            if let Some(from) = from {
                req["from"] = Value::String(from.clone());
            }
            (req, *replies)
        }
        Command::Tasks => (json!({ "command": "tasks" }), 0),
        Command::Status => (json!({ "command": "status" }), 0),
        Command::Mission { action } => match action {
            MissionCommand::Create {
                title,
                deadline,
                goal,
                description,
            } => {
                let mut req = json!({
                    "command": "mission_create",
                    "title": title,
                    "deadline": deadline,
                });
                if let Some(goal) = goal {
                    req["goal"] = Value::String(goal.clone());
                }
                if let Some(description) = description {
                    req["description"] = Value::String(description.clone());
                }
                (req, 0)
            }
            MissionCommand::Status => (json!({ "command": "mission_status" }), 0),
        },
        Command::Schedule => (json!({ "command": "schedule" }), 0),
        Command::Beat => (json!({ "command": "beat" }), 0),
    };

    if let Err(err) = run(&args.ipc_name, &request, replies) {
        eprintln!("Failed to talk to daemon: {err}");
        eprintln!("Is steward running with ipc_name '{}'?", args.ipc_name);
        std::process::exit(1);
    }
}

/// Send one command, print its response, then print up to `replies`
/// pushed messages (acknowledgements excluded).
fn run(ipc_name: &str, request: &Value, replies: usize) -> Result<(), Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut answered = false;
    let mut remaining = replies;
    let mut line = String::new();

    while !answered || remaining > 0 {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err("daemon closed the connection".into());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response: Value = serde_json::from_str(trimmed)?;

        match response.get("kind").and_then(Value::as_str) {
            Some("message") => {
                let text = response
                    .pointer("/data/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if text == ACK_TEXT {
                    continue;
                }
                println!("{text}");
                remaining = remaining.saturating_sub(1);
            }
            _ => {
                answered = true;
                if !print_response(&response)? {
                    remaining = 0;
                }
            }
        }
    }
    Ok(())
}

/// Print a command response. Returns whether a sent message was queued.
fn print_response(response: &Value) -> Result<bool, Box<dyn std::error::Error>> {
    let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let err_msg = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(err_msg.to_owned().into());
    }
    match response.get("data") {
        Some(data) if data.get("receipt").is_some() => {
            let receipt = data["receipt"].as_str().unwrap_or_default();
            eprintln!("{receipt}");
            return Ok(receipt.starts_with("queued"));
        }
        Some(data) => println!("{}", serde_json::to_string_pretty(data)?),
        None => println!("OK"),
    }
    Ok(true)
}
