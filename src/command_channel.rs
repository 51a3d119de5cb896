//! Operator command channel
//!
//! Operator commands arrive as text lines on a control input (stdin by
//! default), asynchronously to any client connection. A single queue is
//! shared by every replay session; each session only ever polls it, so a
//! quiet operator never holds up client I/O.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Mutex};

use crate::error::{CommandError, CommandResult};

/// Parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `set <text>`: jump to the first screen whose name contains text
    Set(String),
    /// `add <name> <hex>`: append a screen built from hex bytes
    Add { name: String, payload: String },
    /// `change directory <text>`: reload screens from a matching subdirectory
    ChangeDirectory(String),
    Next,
    Prev,
    Clear,
    Quit,
}

impl OperatorCommand {
    /// Parse one command line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> CommandResult<Option<Self>> {
        let line = line.trim();
        let Some((verb, rest)) = split_word(line) else {
            return Ok(None);
        };

        let command = match verb.to_lowercase().as_str() {
            "next" => Self::Next,
            "prev" => Self::Prev,
            "clear" => Self::Clear,
            "quit" => Self::Quit,
            "set" => Self::Set(required(rest, "set", "<name>")?.to_string()),
            "add" => {
                let args = required(rest, "add", "<name> <hex>")?;
                let (name, payload) = split_word(args)
                    .filter(|(_, payload)| !payload.is_empty())
                    .ok_or_else(|| missing("add", "<name> <hex>"))?;
                Self::Add {
                    name: name.to_string(),
                    payload: payload.to_string(),
                }
            }
            "change" => match split_word(rest) {
                Some((word, target)) if word.eq_ignore_ascii_case("directory") => {
                    Self::ChangeDirectory(required(target, "change directory", "<name>")?.to_string())
                }
                _ => return Err(CommandError::Unknown { line: line.to_string() }),
            },
            _ => return Err(CommandError::Unknown { line: line.to_string() }),
        };
        Ok(Some(command))
    }
}

fn split_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim())),
        None => Some((text, "")),
    }
}

fn required<'a>(arg: &'a str, verb: &str, expected: &str) -> CommandResult<&'a str> {
    if arg.is_empty() {
        Err(missing(verb, expected))
    } else {
        Ok(arg)
    }
}

fn missing(verb: &str, expected: &str) -> CommandError {
    CommandError::MissingArgument {
        verb: verb.to_string(),
        expected: expected.to_string(),
    }
}

/// Producer side of the command queue
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<String>,
}

impl CommandSender {
    /// Queue one command line. Returns false once every consumer is gone.
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.tx.send(line.into()).is_ok()
    }
}

/// Consumer side of the command queue. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

/// Create an in-memory command queue
pub fn channel() -> (CommandSender, CommandChannel) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CommandSender { tx },
        CommandChannel {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl CommandChannel {
    /// A channel that never yields a command
    pub fn disconnected() -> Self {
        channel().1
    }

    /// Feed the queue from the process stdin
    pub fn spawn_stdin() -> Self {
        Self::from_reader(tokio::io::stdin())
    }

    /// Feed the queue from `reader`, one command per line, until EOF
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (sender, channel) = channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!("Operator input: {line}");
                        if !sender.send(line) {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Command input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Command input error: {e}");
                        break;
                    }
                }
            }
        });
        channel
    }

    /// Pending command line, without waiting
    pub fn try_next(&self) -> Option<String> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Wait for the next command line. `None` once every sender is gone.
    pub async fn next(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}
