use thiserror::Error;

use crate::negotiation::Intent;

pub const HELP: &str = "\
/login NAME    register with the relay
/connect NAME  open a chat with NAME
/leave         close the current chat
/quit          exit
anything else is sent to the connected peer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Intent(Intent),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Unknown command /{0}; type /help for the list.")]
    Unknown(String),
}

/// Parses one line typed by the user. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>, InputError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.trim_start().strip_prefix('/') else {
        return Ok(Some(Command::Intent(Intent::SendData(line.to_string()))));
    };
    let (verb, arg) = match rest.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (rest, ""),
    };
    let command = match verb {
        "login" => Command::Intent(Intent::Login(arg.to_string())),
        "connect" | "call" => Command::Intent(Intent::ConnectTo(arg.to_string())),
        "leave" | "hangup" => Command::Intent(Intent::Hangup),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(InputError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}
