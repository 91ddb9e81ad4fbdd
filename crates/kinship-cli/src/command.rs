//! Input line parsing.

use thiserror::Error;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: send it
    Send(String),
    /// Load older history
    More,
    /// Mark the conversation read
    Read,
    /// Keystroke (`true`) or cleared input
    Typing(bool),
    /// Server drops the local user's connection
    Drop,
    /// Reconnect now
    Reconnect,
    /// App moved to the background (`false`) or foreground
    Foreground(bool),
    /// Retry a failed message by temp id
    Retry(String),
    /// Counterpart sends a message
    Say(String),
    /// Counterpart marks the conversation read
    PeerRead,
    /// Counterpart starts typing
    PeerTyping,
    /// Print connection, presence and typing state
    Status,
    /// Print usage
    Help,
    /// Exit
    Quit,
}

/// Rejected input line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Unrecognized slash command
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),

    /// Command needs an argument
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),
}

/// Usage text printed by `/help`.
pub const HELP: &str = "\
text            send a message
/more           load older messages
/read           mark the conversation read
/typing [off]   start or clear the typing indicator
/drop           drop the connection server-side
/reconnect      reconnect now
/background     pause reconnects
/foreground     resume reconnects
/retry <temp>   resend a failed message
/say <text>     counterpart sends a message
/peer-read      counterpart reads the conversation
/peer-typing    counterpart starts typing
/status         connection, presence and typing
/quit           exit";

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_owned())));
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };
        let required = |name: &'static str| {
            if argument.is_empty() {
                Err(ParseError::MissingArgument(name))
            } else {
                Ok(argument.to_owned())
            }
        };

        let command = match name {
            "more" => Self::More,
            "read" => Self::Read,
            "typing" => Self::Typing(argument != "off"),
            "drop" => Self::Drop,
            "reconnect" => Self::Reconnect,
            "background" => Self::Foreground(false),
            "foreground" => Self::Foreground(true),
            "retry" => Self::Retry(required("retry")?),
            "say" => Self::Say(required("say")?),
            "peer-read" => Self::PeerRead,
            "peer-typing" => Self::PeerTyping,
            "status" => Self::Status,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ParseError::Unknown(other.to_owned())),
        };
        Ok(Some(command))
    }
}
