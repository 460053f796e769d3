//! Wire vocabulary of the agent control protocol.
//!
//! Every message is a single newline-terminated text line. Commands flow from the driver to the
//! agent; replies (`OK`) and notifications (`PROGRESS`) flow back.
use crate::constants::{DEFAULT_COMMAND_TIMEOUT, MKROOMS_TIMEOUT, MKUSERS_TIMEOUT};
use std::fmt;
use std::time::Duration;

pub const REPLY_VERB: &str = "OK";
pub const PROGRESS_VERB: &str = "PROGRESS";

/// Commands understood by the remote agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgentCommand {
    /// Provision the given number of simulated users.
    MkUsers(u32),
    /// Provision the given number of rooms.
    MkRooms(u32),
    /// Set the aggregate message rate (messages per second). `0` stops traffic.
    Rate(f64),
    /// Latency percentiles since the previous `STATS`.
    Stats,
    /// Aggregate statistics for the whole run.
    AllStats,
}

impl AgentCommand {
    /// Timeout applied when the command is issued without an explicit one.
    pub fn timeout(&self) -> Duration {
        match self {
            AgentCommand::MkUsers(_) => MKUSERS_TIMEOUT,
            AgentCommand::MkRooms(_) => MKROOMS_TIMEOUT,
            _ => DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl fmt::Display for AgentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentCommand::MkUsers(n) => write!(f, "MKUSERS {n}"),
            AgentCommand::MkRooms(n) => write!(f, "MKROOMS {n}"),
            AgentCommand::Rate(rate) => write!(f, "RATE {rate}"),
            AgentCommand::Stats => write!(f, "STATS"),
            AgentCommand::AllStats => write!(f, "ALLSTATS"),
        }
    }
}

/// A single line received from the agent, split into its verb and the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    /// `OK <text>`: the reply to the oldest outstanding command.
    Reply(String),
    /// `PROGRESS <text>`: display-only, never correlated to a command.
    Progress(String),
    /// Anything else.
    Unknown { verb: String, rest: String },
}

impl AgentMessage {
    /// Split a line on its first run of whitespace into `(verb, remainder)`.
    pub fn parse(line: &str) -> Self {
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (line, ""),
        };

        match verb {
            REPLY_VERB => AgentMessage::Reply(rest.to_string()),
            PROGRESS_VERB => AgentMessage::Progress(rest.to_string()),
            _ => AgentMessage::Unknown {
                verb: verb.to_string(),
                rest: rest.to_string(),
            },
        }
    }
}
