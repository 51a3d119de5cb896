//! Companion terminal emulator
//!
//! The relay can drive a scriptable 3270 emulator (`s3270`, or `x3270
//! -script` when a window is wanted) as a companion to a session. The
//! emulator speaks a line protocol on stdin/stdout: one command per line,
//! answered by zero or more `data:` lines, a status line, and `ok` or
//! `error`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{EmulatorError, EmulatorResult};

/// An emulator shared between the server loop and the session it drives
pub type SharedEmulator<E> = Arc<Mutex<E>>;

/// Seconds the emulator may take to reach 3270 mode after connecting
const CONNECT_WAIT_SECS: u32 = 5;

/// Operations the relay needs from a companion emulator
pub trait Emulator: Send {
    /// Whether the emulator's host link is TLS
    fn tls(&self) -> bool;

    /// Connect to `address` (`[L:Y:]host:port`)
    fn connect(&mut self, address: &str) -> impl Future<Output = EmulatorResult<bool>> + Send;

    /// Dump the screen buffer in `encoding` (`Ascii` or `Ebcdic`)
    fn read_buffer(&mut self, encoding: &str) -> impl Future<Output = EmulatorResult<String>> + Send;

    /// Run a named command from the command table
    fn execute(
        &mut self,
        name: &str,
        args: &[String],
    ) -> impl Future<Output = EmulatorResult<String>> + Send;

    /// Replace the running emulator with a fresh one on the same address
    fn restart(&mut self) -> impl Future<Output = EmulatorResult<()>> + Send;
}

/// Terminal model, selecting the screen geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    Model2,
    Model3,
    Model4,
    Model5,
}

impl Model {
    pub fn number(self) -> u8 {
        match self {
            Model::Model2 => 2,
            Model::Model3 => 3,
            Model::Model4 => 4,
            Model::Model5 => 5,
        }
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2" => Ok(Model::Model2),
            "3" => Ok(Model::Model3),
            "4" => Ok(Model::Model4),
            "5" => Ok(Model::Model5),
            other => Err(format!("unknown model '{other}', expected 2, 3, 4 or 5")),
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// How a table entry turns its arguments into a script line
pub type Invoke = fn(&str, &[String]) -> String;

/// One scriptable emulator command
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Number of required parameters
    pub params: usize,
    pub description: &'static str,
    pub invoke: Invoke,
}

fn call(name: &str, args: &[String]) -> String {
    format!("{name}({})", args.join(", "))
}

fn quoted_call(name: &str, args: &[String]) -> String {
    let quoted: Vec<String> = args
        .iter()
        .map(|arg| format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{name}({})", quoted.join(", "))
}

/// Name to command lookup with arity checking
#[derive(Debug, Clone)]
pub struct CommandTable {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    pub fn empty() -> Self {
        Self { commands: HashMap::new() }
    }

    /// Commands understood by s3270 and x3270
    pub fn standard() -> Self {
        let mut table = Self::empty();
        let entries: [(&'static str, usize, &'static str, Invoke); 16] = [
            ("Connect", 1, "Connect to a host", call),
            ("Disconnect", 0, "Drop the host connection", call),
            ("Reconnect", 0, "Reconnect to the previous host", call),
            ("Enter", 0, "Send the ENTER AID", call),
            ("Clear", 0, "Send the CLEAR AID", call),
            ("PF", 1, "Send a program function key", call),
            ("PA", 1, "Send a program attention key", call),
            ("Tab", 0, "Move to the next field", call),
            ("Home", 0, "Move to the first field", call),
            ("Reset", 0, "Unlock the keyboard", call),
            ("String", 1, "Type text at the cursor", quoted_call),
            ("MoveCursor1", 2, "Move the cursor to a 1-origin row and column", call),
            ("ReadBuffer", 1, "Dump the screen buffer", call),
            ("Wait", 2, "Wait for a condition with a timeout", call),
            ("Query", 1, "Query emulator state", call),
            ("Quit", 0, "Exit the emulator", call),
        ];
        for (name, params, description, invoke) in entries {
            table.register(name, CommandSpec { params, description, invoke });
        }
        table
    }

    pub fn register(&mut self, name: &'static str, spec: CommandSpec) {
        self.commands.insert(name, spec);
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Build the script line for `name(args)`, checking the parameter count
    pub fn render(&self, name: &str, args: &[String]) -> EmulatorResult<String> {
        let spec = self.get(name).ok_or_else(|| EmulatorError::UnknownCommand {
            name: name.to_string(),
        })?;
        if args.len() < spec.params {
            return Err(EmulatorError::Arity {
                name: name.to_string(),
                expected: spec.params,
                given: args.len(),
            });
        }
        Ok((spec.invoke)(name, args))
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Answer to one script command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReply {
    pub data: Vec<String>,
    pub status: String,
    pub ok: bool,
}

impl ScriptReply {
    /// Data lines joined by newlines, or the failure as an error
    pub fn into_result(self, command: &str) -> EmulatorResult<String> {
        if self.ok {
            return Ok(self.data.join("\n"));
        }
        let message = if self.data.is_empty() {
            "no error message".to_string()
        } else {
            self.data.join(" ")
        };
        Err(EmulatorError::CommandFailed {
            command: command.to_string(),
            message,
        })
    }
}

async fn read_reply_line<R>(reader: &mut R) -> EmulatorResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|_| EmulatorError::NotRunning)?;
    if read == 0 {
        return Err(EmulatorError::NotRunning);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Send one script line and collect the emulator's answer
pub async fn exchange<W, R>(writer: &mut W, reader: &mut R, line: &str) -> EmulatorResult<ScriptReply>
where
    W: AsyncWrite + Unpin,
    R: AsyncBufRead + Unpin,
{
    debug!("Emulator <- {line}");
    let failed = |e: std::io::Error| EmulatorError::CommandFailed {
        command: line.to_string(),
        message: e.to_string(),
    };
    writer.write_all(line.as_bytes()).await.map_err(failed)?;
    writer.write_all(b"\n").await.map_err(failed)?;
    writer.flush().await.map_err(failed)?;

    let mut data = Vec::new();
    let status = loop {
        let reply = read_reply_line(reader).await?;
        match reply.strip_prefix("data:") {
            Some(rest) => data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string()),
            None => break reply,
        }
    };
    let result = read_reply_line(reader).await?;
    debug!("Emulator -> {status} / {result}");

    let ok = result.eq_ignore_ascii_case("ok") || (result.is_empty() && line == "Quit()");
    Ok(ScriptReply { data, status, ok })
}

/// Emulator host string for `host:port`, with the TLS prefixes when `tls`
pub fn host_address(host: &str, port: u16, tls: bool) -> String {
    let prefix = if tls { "L:Y:" } else { "" };
    format!("{prefix}{host}:{port}")
}

/// Whether an emulator host string carries the `L:` (TLS) prefix
pub fn is_tls_address(address: &str) -> bool {
    address
        .split(':')
        .take_while(|part| part.len() == 1)
        .any(|part| part.eq_ignore_ascii_case("L"))
}

/// Launch parameters for an emulator process
#[derive(Debug, Clone)]
pub struct EmulatorSettings {
    pub program: String,
    pub model: Model,
    /// Open an x3270 window instead of the headless s3270
    pub visible: bool,
}

impl EmulatorSettings {
    pub fn new(model: Model, visible: bool) -> Self {
        let program = if visible { "x3270" } else { "s3270" };
        Self {
            program: program.to_string(),
            model,
            visible,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-xrm".to_string(),
            format!("{}.unlockDelay: False", self.program),
            "-model".to_string(),
            self.model.to_string(),
            "-utf8".to_string(),
        ];
        if self.visible {
            args.push("-script".to_string());
        }
        args
    }
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self::new(Model::default(), false)
    }
}

/// A running s3270/x3270 child process
#[derive(Debug)]
pub struct S3270Process {
    settings: EmulatorSettings,
    table: Arc<CommandTable>,
    /// Killed on drop
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    address: Option<String>,
    tls: bool,
    status: String,
}

impl S3270Process {
    /// Start the emulator. The process is killed when the handle drops.
    pub fn launch(settings: EmulatorSettings) -> EmulatorResult<Self> {
        let spawn_error = |reason: String| EmulatorError::Spawn {
            program: settings.program.clone(),
            reason,
        };

        let mut child = Command::new(&settings.program)
            .args(settings.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".to_string()))?;

        info!(
            "Emulator {} started (model {})",
            settings.program, settings.model
        );
        Ok(Self {
            settings,
            table: Arc::new(CommandTable::standard()),
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
            address: None,
            tls: false,
            status: String::new(),
        })
    }

    async fn run(&mut self, line: &str) -> EmulatorResult<String> {
        let reply = exchange(&mut self.stdin, &mut self.stdout, line).await?;
        self.status = reply.status.clone();
        reply.into_result(line)
    }
}

impl Emulator for S3270Process {
    fn tls(&self) -> bool {
        self.tls
    }

    async fn connect(&mut self, address: &str) -> EmulatorResult<bool> {
        self.address = Some(address.to_string());
        self.tls = is_tls_address(address);
        self.execute("Connect", &[address.to_string()]).await?;
        let wait = [CONNECT_WAIT_SECS.to_string(), "3270mode".to_string()];
        if let Err(e) = self.execute("Wait", &wait).await {
            warn!("Emulator not in 3270 mode yet: {e}");
        }
        let connected = self.status.split(' ').nth(3).is_some_and(|state| state.starts_with('C'));
        info!("Emulator connected to {address}: {connected}");
        Ok(connected)
    }

    async fn read_buffer(&mut self, encoding: &str) -> EmulatorResult<String> {
        self.execute("ReadBuffer", &[encoding.to_string()]).await
    }

    async fn execute(&mut self, name: &str, args: &[String]) -> EmulatorResult<String> {
        let line = self.table.render(name, args)?;
        self.run(&line).await
    }

    async fn restart(&mut self) -> EmulatorResult<()> {
        let mut fresh = S3270Process::launch(self.settings.clone())?;
        if let Some(address) = self.address.clone() {
            fresh.connect(&address).await?;
        }
        info!("Emulator restarted");
        *self = fresh;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_checks_arity() {
        let table = CommandTable::standard();
        assert_eq!(table.render("PF", &["3".to_string()]).unwrap(), "PF(3)");
        assert_eq!(table.render("Enter", &[]).unwrap(), "Enter()");
        assert_eq!(
            table.render("String", &["say \"hi\"".to_string()]).unwrap(),
            "String(\"say \\\"hi\\\"\")"
        );
        assert!(matches!(
            table.render("MoveCursor1", &["1".to_string()]),
            Err(EmulatorError::Arity { expected: 2, given: 1, .. })
        ));
        assert!(matches!(
            table.render("Teleport", &[]),
            Err(EmulatorError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_tls_prefix() {
        assert_eq!(host_address("localhost", 992, true), "L:Y:localhost:992");
        assert!(is_tls_address("L:Y:localhost:992"));
        assert!(is_tls_address("Y:L:host:23"));
        assert!(!is_tls_address("localhost:3270"));
        assert!(!is_tls_address("L.example.com:23"));
    }

    #[test]
    fn test_model_parsing() {
        assert_eq!("4".parse::<Model>().unwrap(), Model::Model4);
        assert_eq!(Model::Model5.to_string(), "5");
        assert!("7".parse::<Model>().is_err());
        let args = EmulatorSettings::new(Model::Model3, false).args();
        assert!(args.windows(2).any(|w| w == ["-model", "3"]));
    }

    #[tokio::test]
    async fn test_exchange_collects_data_lines() {
        let input: &[u8] = b"data: 11 c1 c1\ndata: SF(c0=60)\nU F U C(host) I 2 24 80 0 0 0x0 0.001\nok\n";
        let mut reader = BufReader::new(input);
        let mut sink = Vec::new();

        let reply = exchange(&mut sink, &mut reader, "ReadBuffer(Ebcdic)").await.unwrap();
        assert_eq!(reply.data, vec!["11 c1 c1", "SF(c0=60)"]);
        assert!(reply.status.starts_with("U F U C(host)"));
        assert_eq!(reply.into_result("ReadBuffer").unwrap(), "11 c1 c1\nSF(c0=60)");
        assert_eq!(sink, b"ReadBuffer(Ebcdic)\n");
    }

    #[tokio::test]
    async fn test_exchange_reports_errors() {
        let input: &[u8] = b"data: Keyboard locked\nL U U N N 2 24 80 0 0 0x0 -\nerror\n";
        let mut reader = BufReader::new(input);
        let mut sink = Vec::new();
        let reply = exchange(&mut sink, &mut reader, "Enter()").await.unwrap();
        assert!(!reply.ok);
        let err = reply.into_result("Enter()").unwrap_err();
        assert!(err.to_string().contains("Keyboard locked"));
        assert_eq!(sink, b"Enter()\n");
    }

    #[tokio::test]
    async fn test_exchange_detects_exit() {
        let input: &[u8] = b"";
        let mut reader = BufReader::new(input);
        let mut sink = Vec::new();
        assert!(matches!(
            exchange(&mut sink, &mut reader, "Enter()").await,
            Err(EmulatorError::NotRunning)
        ));
    }
}
