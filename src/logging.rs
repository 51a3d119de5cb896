//! Logger setup
//!
//! Lines look like `2024-05-01 10:00:00,123 - tn3270_relay::relay - INFO - message`.
//! `RUST_LOG` takes precedence over the verbosity flag.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;

#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    pub verbose: bool,
    /// Append to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl LogSettings {
    pub fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

fn builder(settings: &LogSettings) -> Builder {
    let mut builder = Builder::new();
    builder
        .filter_level(settings.level())
        .parse_env(Env::default())
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                record.args()
            )
        });
    builder
}

fn open_log_file(path: &Path) -> anyhow::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))
}

/// Install the global logger. Fails if one is already installed.
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let mut builder = builder(settings);
    if let Some(path) = &settings.file {
        builder.target(Target::Pipe(Box::new(open_log_file(path)?)));
    }
    builder.try_init().context("logger already initialised")
}
