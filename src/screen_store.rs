//! Screen capture storage
//!
//! Screens live one per file in a directory. Record mode writes `NNN.bin`
//! files; replay mode reads every `.bin` file in filename order and addresses
//! screens by position or by their lowercased file stem.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::protocol_common::telnet_base::{ends_with_eor, IAC_EOR};

/// File extension of screen captures
pub const SCREEN_EXTENSION: &str = "bin";

/// One captured terminal paint. Always ends with IAC EOR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    name: String,
    data: Vec<u8>,
}

impl Screen {
    /// Build a screen, appending IAC EOR when `data` lacks it
    pub fn new(name: impl Into<String>, mut data: Vec<u8>) -> Self {
        if !ends_with_eor(&data) {
            data.extend_from_slice(&IAC_EOR);
        }
        Self {
            name: name.into().to_lowercase(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Ordered screen collection with case-insensitive name lookup
#[derive(Debug, Clone, Default)]
pub struct ScreenStore {
    screens: Vec<Screen>,
}

impl ScreenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Screen> {
        self.screens.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Screen> {
        self.screens.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.screens.iter().map(Screen::name)
    }

    /// Insert `screen`. A screen with the same name is replaced in place,
    /// otherwise it is appended. Returns the screen's index.
    pub fn insert(&mut self, screen: Screen) -> usize {
        match self.position(screen.name()) {
            Some(index) => {
                self.screens[index] = screen;
                index
            }
            None => {
                self.screens.push(screen);
                self.screens.len() - 1
            }
        }
    }

    /// Index of the screen called exactly `name` (case-insensitive)
    pub fn position(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.screens.iter().position(|s| s.name == name)
    }

    /// Index of the first screen whose name contains `pattern`
    /// (case-insensitive)
    pub fn find(&self, pattern: &str) -> Option<usize> {
        let pattern = pattern.to_lowercase();
        self.screens.iter().position(|s| s.name.contains(&pattern))
    }

    /// Merge `other` on top of this collection, by name
    pub fn overlay(&mut self, other: ScreenStore) {
        for screen in other.screens {
            self.insert(screen);
        }
    }
}

/// Create `path` and its parents if missing
pub fn ensure_dir(path: &Path) -> StoreResult<()> {
    if path.as_os_str().is_empty() || path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|source| StoreError::Directory {
        path: path.to_path_buf(),
        source,
    })
}

fn is_screen_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SCREEN_EXTENSION))
}

/// Load every screen file in `dir`, ordered by filename.
///
/// The directory is created when absent. Any directory-level failure is
/// logged and produces an empty store; unreadable files are skipped.
pub fn load(dir: &Path) -> ScreenStore {
    match try_load(dir) {
        Ok(store) => {
            info!("Loaded {} screen(s) from {}", store.len(), dir.display());
            store
        }
        Err(e) => {
            warn!("Screen directory unusable, starting empty: {e}");
            ScreenStore::new()
        }
    }
}

/// Load the bundled baseline screens, then `dir` on top of them by name
pub fn load_with_defaults(defaults: Option<&Path>, dir: &Path) -> ScreenStore {
    let mut store = match defaults {
        Some(defaults) if defaults.is_dir() => load(defaults),
        Some(defaults) => {
            debug!("No default screens at {}", defaults.display());
            ScreenStore::new()
        }
        None => ScreenStore::new(),
    };
    store.overlay(load(dir));
    store
}

fn try_load(dir: &Path) -> StoreResult<ScreenStore> {
    ensure_dir(dir)?;

    let entries = fs::read_dir(dir).map_err(|source| StoreError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_screen_file(path))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut store = ScreenStore::new();
    for path in files {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        match fs::read(&path) {
            Ok(data) => {
                debug!("Screen '{}' loaded ({} bytes)", name, data.len());
                store.insert(Screen::new(name, data));
            }
            Err(source) => warn!("{}", StoreError::Read { path, source }),
        }
    }
    Ok(store)
}

/// File name of recorded screen number `sequence`
pub fn screen_file_name(sequence: u32) -> String {
    format!("{sequence:03}.{SCREEN_EXTENSION}")
}

/// Write `data` to `dir/NNN.bin`
pub fn persist(dir: &Path, sequence: u32, data: &[u8]) -> StoreResult<PathBuf> {
    ensure_dir(dir)?;
    let path = dir.join(screen_file_name(sequence));
    fs::write(&path, data).map_err(|source| StoreError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Numbers and persists the screens of one recording session
#[derive(Debug)]
pub struct ScreenRecorder {
    dir: PathBuf,
    next: u32,
}

impl ScreenRecorder {
    /// Start numbering after the highest `NNN.bin` already in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        let next = highest_sequence(&dir).map_or(0, |n| n + 1);
        Ok(Self { dir, next })
    }

    /// Persist one screen under the next sequence number
    pub fn record(&mut self, data: &[u8]) -> StoreResult<PathBuf> {
        let path = persist(&self.dir, self.next, data)?;
        info!("Screen {} saved to {}", self.next, path.display());
        self.next += 1;
        Ok(path)
    }

    /// Sequence number the next screen will get
    pub fn next_sequence(&self) -> u32 {
        self.next
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn highest_sequence(dir: &Path) -> Option<u32> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_screen_file(path))
        .filter_map(|path| path.file_stem()?.to_str()?.parse::<u32>().ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_screen_appends_eor_once() {
        let screen = Screen::new("A", b"data".to_vec());
        assert_eq!(screen.data(), b"data\xff\xef");
        assert_eq!(screen.name(), "a");

        let again = Screen::new("a", screen.data().to_vec());
        assert_eq!(again.data(), b"data\xff\xef");
    }

    #[test]
    fn test_load_creates_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("records");
        let store = load(&dir);
        assert!(store.is_empty());
        assert!(dir.is_dir());
    }

    #[test]
    fn test_load_orders_by_filename_and_skips_other_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("001.bin"), b"screen1_data\xff\xef").unwrap();
        fs::write(tmp.path().join("000.bin"), b"screen0_data").unwrap();
        fs::write(tmp.path().join("ignored.txt"), b"ignore me").unwrap();
        fs::write(tmp.path().join("002.bin"), b"screen2_data\xff\xef").unwrap();

        let store = load(tmp.path());
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(0).unwrap().data(), b"screen0_data\xff\xef");
        assert_eq!(store.get(1).unwrap().data(), b"screen1_data\xff\xef");
        assert_eq!(store.get(2).unwrap().data(), b"screen2_data\xff\xef");
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["000", "001", "002"]);
    }

    #[test]
    fn test_defaults_are_overridden_by_name() {
        let defaults = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(defaults.path().join("Login.bin"), b"default login").unwrap();
        fs::write(defaults.path().join("menu.bin"), b"default menu").unwrap();
        fs::write(user.path().join("LOGIN.BIN"), b"user login").unwrap();
        fs::write(user.path().join("report.bin"), b"user report").unwrap();

        let store = load_with_defaults(Some(defaults.path()), user.path());
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["login", "menu", "report"]);
        assert_eq!(store.get(0).unwrap().data(), b"user login\xff\xef");
        assert_eq!(store.position("Menu"), Some(1));
        assert_eq!(store.find("POR"), Some(2));
        assert_eq!(store.find("absent"), None);
    }

    #[test]
    fn test_recorder_numbers_after_existing_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("004.bin"), b"old").unwrap();

        let mut recorder = ScreenRecorder::new(tmp.path()).unwrap();
        assert_eq!(recorder.next_sequence(), 5);
        let path = recorder.record(b"new\xff\xef").unwrap();
        assert_eq!(path.file_name().unwrap(), "005.bin");
        assert_eq!(fs::read(&path).unwrap(), b"new\xff\xef");
        assert_eq!(recorder.next_sequence(), 6);
    }

    #[test]
    fn test_recorder_starts_at_zero() {
        let tmp = TempDir::new().unwrap();
        let mut recorder = ScreenRecorder::new(tmp.path().join("fresh")).unwrap();
        let path = recorder.record(b"x\xff\xef").unwrap();
        assert_eq!(path.file_name().unwrap(), "000.bin");
    }

    proptest! {
        #[test]
        fn loaded_screens_end_with_single_eor(
            bodies in proptest::collection::vec(proptest::collection::vec(0u8..0xEF, 0..64), 1..6),
            terminated in any::<bool>(),
        ) {
            let tmp = TempDir::new().unwrap();
            for (i, body) in bodies.iter().enumerate() {
                let mut data = body.clone();
                if terminated {
                    data.extend_from_slice(&IAC_EOR);
                }
                fs::write(tmp.path().join(screen_file_name(i as u32)), data).unwrap();
            }

            let store = load(tmp.path());
            prop_assert_eq!(store.len(), bodies.len());
            for (screen, body) in store.iter().zip(&bodies) {
                let mut expected = body.clone();
                expected.extend_from_slice(&IAC_EOR);
                prop_assert_eq!(screen.data(), expected.as_slice());
            }
        }
    }
}
