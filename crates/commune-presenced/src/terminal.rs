//! Interactive commands read from stdin, and record formatting.

use std::time::Duration;

use chrono::{DateTime, Utc};

use commune_presence::presence::PresenceChange;
use commune_presence::{ChangeKind, PresenceRecord, PresenceStatus};

pub const HELP: &str = "commands: away | back | status <online|idle|dnd|offline> | who | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Host went to the background.
    Away,
    /// Host came back to the foreground.
    Back,
    Status(PresenceStatus),
    Who,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let command = match head.to_ascii_lowercase().as_str() {
        "away" | "hide" => Command::Away,
        "back" | "show" => Command::Back,
        "status" => {
            let value = words
                .next()
                .ok_or_else(|| "usage: status <online|idle|dnd|offline>".to_string())?;
            Command::Status(value.parse()?)
        }
        "who" | "list" => Command::Who,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {other} ({HELP})")),
    };
    Ok(Some(command))
}

/// One line per record: user, effective status, age of the last heartbeat.
pub fn format_record(record: &PresenceRecord, now: DateTime<Utc>, stale_after: Duration) -> String {
    let status = record.effective_status(now, stale_after);
    let age = (now - record.last_seen).num_seconds().max(0);
    format!(
        "{:<24} {:<8} last seen {}",
        record.user_id,
        status.as_str(),
        format_age(age)
    )
}

pub fn format_change(change: &PresenceChange, now: DateTime<Utc>, stale_after: Duration) -> String {
    let verb = match change.kind {
        ChangeKind::Insert => "joined",
        ChangeKind::Update => "updated",
        ChangeKind::Delete => "removed",
    };
    format!("{verb:<8} {}", format_record(&change.record, now, stale_after))
}

fn format_age(secs: i64) -> String {
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}
