//! Programmatic control of a headless replay process
//!
//! Starts `tn3270-relay replay` as a child process and drives it through its
//! command channel (the child's stdin). Useful for scripted demos and tests
//! where a terminal is pointed at recorded screens.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use crate::error::{EmulatorError, EmulatorResult};

/// How long the child gets to exit after its input closes
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct OfflineController {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl OfflineController {
    /// Run `<exe> replay --directory <directory> --no-tls --no-emulator`
    pub fn spawn(exe: impl AsRef<OsStr>, directory: &Path) -> EmulatorResult<Self> {
        let exe = exe.as_ref();
        let spawn_error = |reason: String| EmulatorError::Spawn {
            program: exe.to_string_lossy().into_owned(),
            reason,
        };

        let mut child = Command::new(exe)
            .arg("replay")
            .arg("--directory")
            .arg(directory)
            .args(["--no-tls", "--no-emulator"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;
        let stdin = child.stdin.take();
        if stdin.is_none() {
            return Err(spawn_error("stdin not captured".to_string()));
        }

        info!("Offline replay started for {}", directory.display());
        Ok(Self { child, stdin })
    }

    /// Whether the child is still alive
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send one command line. Returns false when the child is gone.
    async fn exec(&mut self, command: &str) -> bool {
        if !self.is_running() {
            info!("Replay process not running, dropping '{command}'");
            return false;
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return false;
        };

        debug!("Offline command: {command}");
        let line = format!("{command}\n");
        match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await.is_ok(),
            Err(e) => {
                warn!("Offline command '{command}' not delivered: {e}");
                false
            }
        }
    }

    pub async fn next(&mut self) -> bool {
        self.exec("next").await
    }

    pub async fn prev(&mut self) -> bool {
        self.exec("prev").await
    }

    /// PF3/PF7 go back, PF4/PF8 go forward; other keys are ignored
    pub async fn send_pf(&mut self, key: u8) -> bool {
        match key {
            4 | 8 => self.next().await,
            3 | 7 => self.prev().await,
            _ => false,
        }
    }

    pub async fn set_screen(&mut self, screen: &str) -> bool {
        self.exec(&format!("set {screen}")).await
    }

    pub async fn change_directory(&mut self, directory: &str) -> bool {
        self.exec(&format!("change directory {directory}")).await
    }

    pub async fn clear(&mut self) -> bool {
        self.exec("clear").await
    }

    pub async fn quit(&mut self) -> bool {
        self.exec("quit").await
    }

    /// Close the command input and stop the child
    pub async fn terminate(mut self) {
        drop(self.stdin.take());
        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Replay process exited with {status}"),
            _ => {
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill replay process: {e}");
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn capture_script(dir: &Path) -> std::path::PathBuf {
        let script = dir.join("fake-relay.sh");
        let out = dir.join("commands.txt");
        fs::write(&script, format!("#!/bin/sh\nexec cat > '{}'\n", out.display())).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_commands_reach_child_stdin() {
        let tmp = TempDir::new().unwrap();
        let script = capture_script(tmp.path());

        let mut controller = OfflineController::spawn(&script, tmp.path()).unwrap();
        assert!(controller.next().await);
        assert!(controller.set_screen("login").await);
        assert!(controller.send_pf(3).await);
        assert!(!controller.send_pf(1).await);
        assert!(controller.change_directory("billing").await);
        assert!(controller.quit().await);
        controller.terminate().await;

        let sent = fs::read_to_string(tmp.path().join("commands.txt")).unwrap();
        assert_eq!(sent, "next\nset login\nprev\nchange directory billing\nquit\n");
    }

    #[tokio::test]
    async fn test_commands_to_exited_child_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("exits.sh");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut controller = OfflineController::spawn(&script, tmp.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!controller.is_running());
        assert!(!controller.next().await);
        controller.terminate().await;
    }

    #[test]
    fn test_missing_executable() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let err = OfflineController::spawn("/nonexistent/tn3270-relay", Path::new(".")).unwrap_err();
        assert!(matches!(err, EmulatorError::Spawn { .. }));
    }
}
