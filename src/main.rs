//! Command line entry point for tn3270-relay
//!
//! `record` relays terminal clients to a live host and captures the screens
//! it paints; `replay` serves captured screens back without a host.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{error, info};

use tn3270_relay::command_channel::CommandChannel;
use tn3270_relay::config::{default_config_path, load_config, RelayConfig};
use tn3270_relay::emulator::{host_address, EmulatorSettings, Model, S3270Process};
use tn3270_relay::logging::{self, LogSettings};
use tn3270_relay::relay::{parse_address, RelayOptions};
use tn3270_relay::replay::ReplayOptions;
use tn3270_relay::screen_store::load_with_defaults;
use tn3270_relay::server::{self, Companion};

#[derive(Parser, Debug)]
#[command(name = "tn3270-relay")]
#[command(about = "Record TN3270 sessions as screen captures and replay them offline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: $TN3270_RELAY_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append log lines to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay clients to a host and record its screens
    Record {
        /// Host to relay to, as host[:port]
        #[arg(long)]
        address: String,

        /// Where recorded screens are written
        #[arg(long, default_value = "./screens")]
        directory: PathBuf,

        /// Local port to listen on (default: the host's port)
        #[arg(long)]
        port: Option<u16>,

        #[command(flatten)]
        companion: CompanionArgs,
    },

    /// Serve recorded screens to clients
    Replay {
        /// Directory of screens to serve
        #[arg(long, default_value = "./screens")]
        directory: PathBuf,

        /// Local port to listen on
        #[arg(long, default_value_t = 992)]
        port: u16,

        /// Baseline screens loaded underneath the directory's own
        #[arg(long)]
        defaults: Option<PathBuf>,

        #[command(flatten)]
        companion: CompanionArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct CompanionArgs {
    /// Companion connects over TLS (record mode samples screens from it)
    #[arg(long, overrides_with = "no_tls")]
    tls: bool,

    #[arg(long, overrides_with = "tls")]
    no_tls: bool,

    /// Terminal model of the companion emulator (2, 3, 4 or 5)
    #[arg(long, default_value = "2")]
    model: Model,

    /// Start a companion emulator on the local listener (default)
    #[arg(long, overrides_with = "no_emulator")]
    emulator: bool,

    #[arg(long, overrides_with = "emulator")]
    no_emulator: bool,

    /// Use the windowless s3270 for the companion
    #[arg(long)]
    headless: bool,
}

impl CompanionArgs {
    fn tls_or(&self, default: bool) -> bool {
        match (self.tls, self.no_tls) {
            (true, _) => true,
            (_, true) => false,
            _ => default,
        }
    }

    fn wanted(&self) -> bool {
        self.emulator || !self.no_emulator
    }

    /// Launch the companion when wanted, pointed at the local listener
    fn launch(&self, port: u16, tls: bool) -> anyhow::Result<Option<Companion<S3270Process>>> {
        if !self.wanted() {
            return Ok(None);
        }
        let settings = EmulatorSettings::new(self.model, !self.headless);
        let emulator = S3270Process::launch(settings).context("cannot start the companion emulator")?;
        Ok(Some(Companion::new(emulator, host_address("localhost", port, tls))))
    }
}

async fn record(
    config: &RelayConfig,
    address: String,
    directory: PathBuf,
    port: Option<u16>,
    companion: CompanionArgs,
) -> anyhow::Result<()> {
    let options = RelayOptions::from_config(config);
    let (_, host_port) = parse_address(&address, options.default_port)?;
    let port = port.unwrap_or(host_port);

    let listener = server::bind(port).await?;
    let companion = companion.launch(port, companion.tls_or(true))?;
    info!("RECORD {address} into {}", directory.display());
    server::run_record(listener, address, Some(directory), options, companion).await
}

async fn replay(
    config: &RelayConfig,
    directory: PathBuf,
    port: u16,
    defaults: Option<PathBuf>,
    companion: CompanionArgs,
) -> anyhow::Result<()> {
    let defaults = defaults.or_else(|| config.defaults_directory());
    let screens = load_with_defaults(defaults.as_deref(), &directory);

    let mut options = ReplayOptions::from_config(config, companion.wanted())?;
    options.defaults_dir = defaults;

    let listener = server::bind(port).await?;
    let companion = companion.launch(port, companion.tls_or(false))?;
    info!("REPLAY from {} ({} screens)", directory.display(), screens.len());
    let commands = CommandChannel::spawn_stdin();
    server::run_replay(listener, screens, directory, options, commands, companion).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path);
    logging::init(&LogSettings {
        verbose: cli.verbose,
        file: cli.log_file.clone().or_else(|| config.log_file()),
    })?;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Program panicked: {panic_info}");
    }));

    match cli.command {
        Command::Record {
            address,
            directory,
            port,
            companion,
        } => record(&config, address, directory, port, companion).await,
        Command::Replay {
            directory,
            port,
            defaults,
            companion,
        } => replay(&config, directory, port, defaults, companion).await,
    }
}
