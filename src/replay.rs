//! Replay engine
//!
//! Serves stored screens to a terminal client with no host behind it. The
//! client's AID keys and operator commands move a cursor through the screen
//! collection; the screen under the cursor is repainted after every move.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::command_channel::{CommandChannel, OperatorCommand};
use crate::config::RelayConfig;
use crate::error::{ConfigError, RelayResult};
use crate::lib3270::codes::{keystroke_aid, negotiation_preamble, AidKey, CLEAR_SCREEN_BUFFER};
use crate::navigation::{decide, KeyPressFilter, NavAction, NavigationState};
use crate::sampler::buffer_to_frame;
use crate::screen_store::{load_with_defaults, Screen, ScreenStore};
use crate::session::SessionEnd;

/// How long to wait for the bytes that follow an AID
const FOLLOW_UP_TIMEOUT: Duration = Duration::from_millis(250);

/// Settings shared by every replay session
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub filter: KeyPressFilter,
    /// A companion emulator is attached; enables the key-press check
    pub companion_active: bool,
    pub defaults_dir: Option<PathBuf>,
    /// Root searched by `change directory`; the parent of the active
    /// directory when unset
    pub base_dir: Option<PathBuf>,
}

impl ReplayOptions {
    pub fn from_config(config: &RelayConfig, companion_active: bool) -> Result<Self, ConfigError> {
        Ok(Self {
            filter: KeyPressFilter::new(config.key_press_patterns()?, config.key_press_window()),
            companion_active,
            defaults_dir: config.defaults_directory(),
            base_dir: config.base_directory(),
        })
    }
}

/// What the loop does after an operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandOutcome {
    Continue,
    Blank,
    Quit,
}

enum Input {
    Aid(AidKey),
    Command(String),
    Closed,
}

enum Woken {
    Read(std::io::Result<usize>),
    Command(Option<String>),
}

/// One client's replay: its own screens, directory and position
#[derive(Debug)]
pub struct ReplaySession {
    id: String,
    screens: ScreenStore,
    directory: PathBuf,
    state: NavigationState,
    options: Arc<ReplayOptions>,
}

impl ReplaySession {
    pub fn new(id: impl Into<String>, screens: ScreenStore, directory: impl Into<PathBuf>, options: Arc<ReplayOptions>) -> Self {
        Self {
            id: id.into(),
            screens,
            directory: directory.into(),
            state: NavigationState::new(),
            options,
        }
    }

    pub fn state(&self) -> NavigationState {
        self.state
    }

    pub fn screens(&self) -> &ScreenStore {
        &self.screens
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Serve `client` until it disconnects or an operator quits.
    /// The client stream is shut down on every exit path.
    pub async fn run<C>(&mut self, client: C, commands: &CommandChannel) -> RelayResult<SessionEnd>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut rx, mut tx) = tokio::io::split(client);
        let outcome = self.serve(&mut rx, &mut tx, commands).await;
        if let Err(e) = tx.shutdown().await {
            debug!("[{}] client shutdown: {e}", self.id);
        }
        outcome
    }

    async fn serve<R, W>(&mut self, rx: &mut R, tx: &mut W, commands: &CommandChannel) -> RelayResult<SessionEnd>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tx.write_all(&negotiation_preamble()).await?;
        let mut commands_open = true;

        loop {
            if !self.state.is_clear() {
                self.send_current(tx).await?;
            }

            let input = match commands.try_next() {
                Some(line) => Input::Command(line),
                None => self.wait_input(rx, commands, &mut commands_open).await?,
            };

            match input {
                Input::Closed => {
                    info!("[{}] terminal closed", self.id);
                    return Ok(SessionEnd::ClientClosed);
                }
                Input::Command(line) => match self.handle_command_line(&line) {
                    CommandOutcome::Continue => {}
                    CommandOutcome::Blank => tx.write_all(&CLEAR_SCREEN_BUFFER).await?,
                    CommandOutcome::Quit => {
                        info!("[{}] quit by operator", self.id);
                        return Ok(SessionEnd::Quit);
                    }
                },
                Input::Aid(aid) => {
                    let Some(follow_up) = self.read_follow_up(rx).await? else {
                        return Ok(SessionEnd::ClientClosed);
                    };
                    let action = decide(aid, &follow_up, &self.options.filter, self.options.companion_active);
                    debug!("[{}] {aid:?} {follow_up:02X?} -> {action:?}", self.id);
                    self.state.apply(action, self.screens.len());
                    if action == NavAction::Blank {
                        tx.write_all(&CLEAR_SCREEN_BUFFER).await?;
                    }
                }
            }
        }
    }

    async fn send_current<W>(&mut self, tx: &mut W) -> RelayResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(index) = self.state.current(self.screens.len()) else {
            return Ok(());
        };
        if index != self.state.index() {
            self.state.apply(NavAction::Goto(index), self.screens.len());
        }
        if let Some(screen) = self.screens.get(index) {
            debug!("[{}] sending screen {index} '{}'", self.id, screen.name());
            tx.write_all(screen.data()).await?;
        }
        Ok(())
    }

    /// Block until the client sends a keystroke AID or an operator command
    /// arrives. Non-AID bytes are skipped.
    async fn wait_input<R>(&self, rx: &mut R, commands: &CommandChannel, commands_open: &mut bool) -> RelayResult<Input>
    where
        R: AsyncRead + Unpin,
    {
        let mut byte = [0u8; 1];
        loop {
            let woken = tokio::select! {
                read = rx.read(&mut byte) => Woken::Read(read),
                line = commands.next(), if *commands_open => Woken::Command(line),
            };
            match woken {
                Woken::Read(read) => {
                    if read? == 0 {
                        return Ok(Input::Closed);
                    }
                    if let Some(aid) = keystroke_aid(byte[0]) {
                        return Ok(Input::Aid(aid));
                    }
                }
                Woken::Command(Some(line)) => return Ok(Input::Command(line)),
                Woken::Command(None) => *commands_open = false,
            }
        }
    }

    /// Fill one key-press window, stopping early when the follow-up timeout
    /// runs out. `None` when the client closed before sending anything.
    async fn read_follow_up<R>(&self, rx: &mut R) -> RelayResult<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let mut window = vec![0u8; self.options.filter.window()];
        let deadline = Instant::now() + FOLLOW_UP_TIMEOUT;
        let mut filled = 0;
        while filled < window.len() {
            let Ok(read) = timeout_at(deadline, rx.read(&mut window[filled..])).await else {
                break;
            };
            match read? {
                0 if filled == 0 => return Ok(None),
                0 => break,
                n => filled += n,
            }
        }
        window.truncate(filled);
        Ok(Some(window))
    }

    fn handle_command_line(&mut self, line: &str) -> CommandOutcome {
        match OperatorCommand::parse(line) {
            Ok(Some(command)) => self.handle_command(command),
            Ok(None) => CommandOutcome::Continue,
            Err(e) => {
                warn!("[{}] ignoring command: {e}", self.id);
                CommandOutcome::Continue
            }
        }
    }

    fn handle_command(&mut self, command: OperatorCommand) -> CommandOutcome {
        let len = self.screens.len();
        match command {
            OperatorCommand::Next => self.state.apply(NavAction::Forward, len),
            OperatorCommand::Prev => self.state.apply(NavAction::Back, len),
            OperatorCommand::Clear => {
                self.state.apply(NavAction::Blank, len);
                return CommandOutcome::Blank;
            }
            OperatorCommand::Quit => return CommandOutcome::Quit,
            OperatorCommand::Set(pattern) => match self.screens.find(&pattern) {
                Some(index) => {
                    info!("[{}] set screen '{pattern}' -> {index}", self.id);
                    self.state.apply(NavAction::Goto(index), len);
                }
                None => warn!("[{}] no screen matches '{pattern}'", self.id),
            },
            OperatorCommand::Add { name, payload } => match buffer_to_frame([payload.as_str()]) {
                Ok(frame) => {
                    let index = self.screens.insert(Screen::new(name, frame));
                    info!("[{}] screen added at {index}", self.id);
                }
                Err(e) => warn!("[{}] add ignored: {e}", self.id),
            },
            OperatorCommand::ChangeDirectory(pattern) => self.change_directory(&pattern),
        }
        CommandOutcome::Continue
    }

    fn change_directory(&mut self, pattern: &str) {
        let base = self
            .options
            .base_dir
            .clone()
            .or_else(|| self.directory.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let Some(target) = find_subdirectory(&base, pattern) else {
            warn!("[{}] no directory under {} matches '{pattern}'", self.id, base.display());
            return;
        };

        self.screens = load_with_defaults(self.options.defaults_dir.as_deref(), &target);
        info!(
            "[{}] switched to {} ({} screens)",
            self.id,
            target.display(),
            self.screens.len()
        );
        self.directory = target;
        self.state.reset();
    }
}

/// First subdirectory of `base`, in name order, whose name contains
/// `pattern` case-insensitively
pub fn find_subdirectory(base: &Path, pattern: &str) -> Option<PathBuf> {
    let pattern = pattern.to_lowercase();
    let mut dirs: Vec<PathBuf> = fs::read_dir(base)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs.into_iter().find(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase().contains(&pattern))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_channel::channel;
    use crate::lib3270::codes::{AID_CLEAR, AID_ENTER, AID_PF3};
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream};

    fn four_screens() -> ScreenStore {
        let mut store = ScreenStore::new();
        for (i, name) in ["login", "menu", "report", "logoff"].iter().enumerate() {
            let body = vec![0xF5, 0xC3, 0x11, 0x40 + i as u8];
            store.insert(Screen::new(*name, body));
        }
        store
    }

    async fn expect_bytes(terminal: &mut DuplexStream, expected: &[u8]) {
        let mut got = vec![0u8; expected.len()];
        terminal.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_aid_navigation_and_clear() {
        let store = four_screens();
        let screens: Vec<Vec<u8>> = store.iter().map(|s| s.data().to_vec()).collect();
        let mut session = ReplaySession::new("t1", store, "screens", Arc::new(ReplayOptions::default()));
        let commands = CommandChannel::disconnected();

        let (client, mut terminal) = duplex(4096);
        let task = tokio::spawn(async move {
            let end = session.run(client, &commands).await;
            (end, session.state())
        });

        expect_bytes(&mut terminal, &negotiation_preamble()).await;
        expect_bytes(&mut terminal, &screens[0]).await;

        terminal.write_all(&[AID_ENTER, b'K', 0xE9, 0xFF]).await.unwrap();
        expect_bytes(&mut terminal, &screens[1]).await;

        terminal.write_all(&[AID_PF3, b'K', 0xE9, 0xFF]).await.unwrap();
        expect_bytes(&mut terminal, &screens[0]).await;

        terminal.write_all(&[AID_CLEAR, 0xFF, 0xEF]).await.unwrap();
        expect_bytes(&mut terminal, &CLEAR_SCREEN_BUFFER).await;

        terminal.write_all(&[AID_ENTER, b'K', 0xE9, 0xFF]).await.unwrap();
        expect_bytes(&mut terminal, &screens[1]).await;

        drop(terminal);
        let (end, state) = task.await.unwrap();
        assert_eq!(end.unwrap(), SessionEnd::ClientClosed);
        assert_eq!(state.index(), 1);
    }

    #[tokio::test]
    async fn test_operator_commands_drive_the_session() {
        let store = four_screens();
        let screens: Vec<Vec<u8>> = store.iter().map(|s| s.data().to_vec()).collect();
        let mut session = ReplaySession::new("t2", store, "screens", Arc::new(ReplayOptions::default()));
        let (sender, commands) = channel();
        sender.send("next");

        let (client, mut terminal) = duplex(4096);
        let task = tokio::spawn(async move { session.run(client, &commands).await });

        expect_bytes(&mut terminal, &negotiation_preamble()).await;
        expect_bytes(&mut terminal, &screens[0]).await;
        expect_bytes(&mut terminal, &screens[1]).await;

        sender.send("set REP");
        expect_bytes(&mut terminal, &screens[2]).await;

        sender.send("add extra C1C2");
        expect_bytes(&mut terminal, &screens[2]).await;
        sender.send("set extra");
        expect_bytes(&mut terminal, &[0xF5, 0xC3, 0xC1, 0xC2, 0xFF, 0xEF]).await;

        sender.send("bogus");
        expect_bytes(&mut terminal, &[0xF5, 0xC3, 0xC1, 0xC2, 0xFF, 0xEF]).await;

        sender.send("quit");
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Quit);
        let mut rest = Vec::new();
        terminal.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_companion_filter_ignores_noise() {
        let store = four_screens();
        let screens: Vec<Vec<u8>> = store.iter().map(|s| s.data().to_vec()).collect();
        let options = ReplayOptions {
            companion_active: true,
            ..ReplayOptions::default()
        };
        let mut session = ReplaySession::new("t3", store, "screens", Arc::new(options));
        let commands = CommandChannel::disconnected();

        let (client, mut terminal) = duplex(4096);
        let task = tokio::spawn(async move { session.run(client, &commands).await });

        expect_bytes(&mut terminal, &negotiation_preamble()).await;
        expect_bytes(&mut terminal, &screens[0]).await;

        // follow-up matches no pattern: screen is resent, position unchanged
        terminal.write_all(&[AID_ENTER, 0x01, 0x02, 0x03]).await.unwrap();
        expect_bytes(&mut terminal, &screens[0]).await;

        terminal.write_all(&[AID_ENTER, 0x5B, 0x6B, 0x11]).await.unwrap();
        expect_bytes(&mut terminal, &screens[1]).await;

        drop(terminal);
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::ClientClosed);
    }

    #[tokio::test]
    async fn test_key_press_window_split_across_writes() {
        let store = four_screens();
        let screens: Vec<Vec<u8>> = store.iter().map(|s| s.data().to_vec()).collect();
        let options = ReplayOptions {
            companion_active: true,
            ..ReplayOptions::default()
        };
        let mut session = ReplaySession::new("t5", store, "screens", Arc::new(options));
        let commands = CommandChannel::disconnected();

        let (client, mut terminal) = duplex(4096);
        let task = tokio::spawn(async move { session.run(client, &commands).await });

        expect_bytes(&mut terminal, &negotiation_preamble()).await;
        expect_bytes(&mut terminal, &screens[0]).await;

        terminal.write_all(&[AID_ENTER, 0x5B]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        terminal.write_all(&[0x6B]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        terminal.write_all(&[0x11]).await.unwrap();
        expect_bytes(&mut terminal, &screens[1]).await;

        drop(terminal);
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::ClientClosed);
    }

    #[tokio::test]
    async fn test_empty_store_sends_nothing() {
        let mut session = ReplaySession::new("t4", ScreenStore::new(), "screens", Arc::new(ReplayOptions::default()));
        let (sender, commands) = channel();
        let (client, mut terminal) = duplex(4096);
        let task = tokio::spawn(async move { session.run(client, &commands).await });

        expect_bytes(&mut terminal, &negotiation_preamble()).await;
        terminal.write_all(&[AID_ENTER, b'K', 0xE9, 0xFF]).await.unwrap();
        sender.send("next");
        sender.send("quit");
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Quit);

        let mut rest = Vec::new();
        terminal.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_change_directory_reloads_and_resets() {
        let base = TempDir::new().unwrap();
        let first = base.path().join("first");
        let billing = base.path().join("Billing-2024");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&billing).unwrap();
        fs::write(first.join("000.bin"), b"a").unwrap();
        fs::write(first.join("001.bin"), b"b").unwrap();
        fs::write(billing.join("invoice.bin"), b"invoice").unwrap();

        let store = crate::screen_store::load(&first);
        let mut session = ReplaySession::new("t5", store, &first, Arc::new(ReplayOptions::default()));
        session.handle_command(OperatorCommand::Next);
        assert_eq!(session.state().index(), 1);

        session.handle_command(OperatorCommand::ChangeDirectory("billing".to_string()));
        assert_eq!(session.directory(), billing.as_path());
        assert_eq!(session.state().index(), 0);
        assert_eq!(session.screens().names().collect::<Vec<_>>(), vec!["invoice"]);

        session.handle_command(OperatorCommand::ChangeDirectory("missing".to_string()));
        assert_eq!(session.directory(), billing.as_path());
    }
}
