//! phonefleet - drive every attached Android device at once
//!
//! Usage:
//!     phonefleet [OPTIONS] <COMMAND>
//!
//! Environment Variables:
//!     PHONE_FLEET_ADB: Path of the adb binary (default: adb)
//!     PHONE_FLEET_POOL_SIZE: Maximum commands in flight (default: 4 per core)
//!     PHONE_FLEET_ACCOUNTS_DIR: Directory of per-device account lists
//!     RUST_LOG: Log filter (default: info)

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use phone_fleet::live::Size;
use phone_fleet::{
    list_known_apps, AutomationConfig, AutomationCycle, BatchReport, CommandRunner, Fleet,
    FrameRecorder, KeyCode, LiveView, ScrollDirection, TextStrategy, TokioScheduler,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Control a fleet of Android devices over adb
#[derive(Parser, Debug)]
#[command(name = "phonefleet")]
#[command(about = "Control a fleet of Android devices over adb")]
#[command(after_help = r#"Examples:
    # List attached devices
    phonefleet devices

    # Tap the same point on every device
    phonefleet tap 540 1200

    # Type a random caption line on each device
    phonefleet text --file captions.txt --random

    # Find an element by label and tap it everywhere
    phonefleet locate "Post" --tap

    # Run the account automation
    phonefleet automate --config automation.json
"#)]
struct Cli {
    /// adb binary
    #[arg(long, env = "PHONE_FLEET_ADB", default_value = "adb")]
    adb: String,

    /// Maximum commands in flight across the fleet
    #[arg(long, env = "PHONE_FLEET_POOL_SIZE")]
    pool_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached devices and their resolution
    Devices,
    /// Tap a device pixel on every device
    Tap { x: i32, y: i32 },
    /// Swipe on every device
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[arg(long, default_value = "300")]
        duration_ms: u32,
    },
    /// Long press on every device
    LongPress { x: i32, y: i32 },
    /// Send a hardware key (home, back, recents, volume-up, volume-down, power, mute)
    Key {
        key: KeyCode,
        /// Skip the confirmation prompt for power
        #[arg(long)]
        yes: bool,
    },
    /// Scroll every device
    Scroll {
        #[arg(value_enum, default_value = "down")]
        direction: CliDirection,
    },
    /// Type text on every device
    Text {
        /// Text to type
        #[arg(required_unless_present = "file")]
        text: Option<String>,
        /// Read text from a file, one entry per line
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Each device types its own random line from the file
        #[arg(long, requires = "file")]
        random: bool,
        #[arg(long, value_enum, default_value = "whole-string")]
        strategy: CliTextStrategy,
    },
    /// Remove emoji from a text file in place
    StripEmoji { file: PathBuf },
    /// Open a URI, optionally in a given app
    Open {
        uri: String,
        #[arg(long, default_value = "")]
        app: String,
    },
    /// Launch an app by name or package
    Launch { app: String },
    /// Force-stop an app by name or package
    StopApp { app: String },
    /// Share a link to an app
    ShareLink { link: String, app: String },
    /// Share an image from /sdcard/Download to an app
    ShareImage { file_name: String, app: String },
    /// Find an element by content description or text
    Locate {
        label: String,
        /// Tap it once found
        #[arg(long)]
        tap: bool,
    },
    /// Run the multi-account posting cycle
    Automate {
        #[arg(long)]
        config: PathBuf,
        /// Overrides the config's accounts directory
        #[arg(long, env = "PHONE_FLEET_ACCOUNTS_DIR")]
        accounts_dir: Option<PathBuf>,
    },
    /// Mirror one device to PNG files until interrupted
    Mirror {
        /// Device to mirror (default: first attached)
        #[arg(long)]
        serial: Option<String>,
        #[arg(long, default_value = "frames")]
        out: PathBuf,
        #[arg(long, default_value = "540")]
        width: u32,
        #[arg(long, default_value = "1200")]
        height: u32,
    },
    /// List apps known by name
    Apps,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliDirection {
    Up,
    Down,
}

impl From<CliDirection> for ScrollDirection {
    fn from(direction: CliDirection) -> Self {
        match direction {
            CliDirection::Up => ScrollDirection::Up,
            CliDirection::Down => ScrollDirection::Down,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliTextStrategy {
    WholeString,
    PerCharacter,
    AdbKeyboard,
}

impl From<CliTextStrategy> for TextStrategy {
    fn from(strategy: CliTextStrategy) -> Self {
        match strategy {
            CliTextStrategy::WholeString => TextStrategy::WholeString,
            CliTextStrategy::PerCharacter => TextStrategy::PerCharacter,
            CliTextStrategy::AdbKeyboard => TextStrategy::AdbKeyboard,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if cfg!(debug_assertions) {
        builder.compact().init();
    } else {
        builder.json().init();
    }
}

/// Ask on the terminal before a destructive key goes out
fn confirm_on_terminal(message: &str) -> bool {
    print!("{} [y/N] ", message);
    io::stdout().flush().ok();
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

/// One status line per device, then the summary
fn print_report(report: &BatchReport) {
    for (serial, ok, message) in report.rows() {
        let mark = if ok { "\u{2713}" } else { "\u{2717}" };
        println!("  {} {}: {}", mark, serial, message);
    }
    println!("{}", report);
}

fn check_bridge(adb: &str) -> Result<()> {
    if which::which(adb).is_err() {
        bail!(
            "{} is not installed or not in PATH.\n  \
             - macOS: brew install android-platform-tools\n  \
             - Linux: sudo apt install android-tools-adb",
            adb
        );
    }
    Ok(())
}

async fn run(cli: Cli, fleet: Arc<Fleet>) -> Result<()> {
    let needs_devices = !matches!(cli.command, Commands::StripEmoji { .. } | Commands::Apps);
    if needs_devices {
        let serials = fleet.discover().await?;
        if serials.is_empty() {
            bail!("No devices connected. Enable USB debugging and authorize this computer.");
        }
    }

    match cli.command {
        Commands::Devices => {
            let token = fleet.context().token();
            for serial in fleet.registry().serials() {
                match fleet
                    .registry()
                    .resolution(&serial, fleet.runner(), &token)
                    .await
                {
                    Ok(size) => println!("  \u{2713} {} ({}x{})", serial, size.width, size.height),
                    Err(e) => println!("  \u{2713} {} (size unknown: {})", serial, e),
                }
            }
        }
        Commands::Tap { x, y } => print_report(&fleet.tap(x, y).await?),
        Commands::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration_ms,
        } => print_report(&fleet.swipe((x1, y1), (x2, y2), duration_ms).await?),
        Commands::LongPress { x, y } => print_report(&fleet.long_press(x, y).await?),
        Commands::Key { key, .. } => print_report(&fleet.key(key).await?),
        Commands::Scroll { direction } => print_report(&fleet.scroll(direction.into()).await?),
        Commands::Text {
            text,
            file,
            random,
            strategy,
        } => {
            let strategy = strategy.into();
            let report = match (text, file) {
                (Some(text), _) => fleet.send_text(&text, strategy).await?,
                (None, Some(file)) => {
                    let lines = phone_fleet::adb::load_lines(&file)?;
                    if random {
                        fleet.send_random_lines(lines, strategy).await?
                    } else {
                        fleet.send_text(&lines.join(" "), strategy).await?
                    }
                }
                (None, None) => bail!("nothing to type"),
            };
            print_report(&report);
        }
        Commands::StripEmoji { file } => {
            if phone_fleet::adb::strip_emoji_file(&file)? {
                println!("Removed emoji from {}", file.display());
            } else {
                println!("No emoji in {}", file.display());
            }
        }
        Commands::Open { uri, app } => print_report(&fleet.open_uri(&uri, &app).await?),
        Commands::Launch { app } => print_report(&fleet.launch(&app).await?),
        Commands::StopApp { app } => print_report(&fleet.force_stop(&app).await?),
        Commands::ShareLink { link, app } => print_report(&fleet.share_link(&link, &app).await?),
        Commands::ShareImage { file_name, app } => {
            print_report(&fleet.share_image(&file_name, &app).await?)
        }
        Commands::Locate { label, tap } => {
            if tap {
                print_report(&fleet.tap_element(&label).await?);
            } else {
                let locator = fleet.locator();
                let token = fleet.context().token();
                for serial in fleet.registry().serials() {
                    match locator.locate(&serial, &label, &token).await {
                        Ok((x, y)) => println!("  \u{2713} {}: ({}, {})", serial, x, y),
                        Err(e) => println!("  \u{2717} {}: {}", serial, e),
                    }
                }
            }
        }
        Commands::Automate {
            config,
            accounts_dir,
        } => {
            let mut config = AutomationConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            if let Some(dir) = accounts_dir {
                config.accounts_dir = dir;
            }
            let cycle = AutomationCycle::new(fleet.clone(), config)?;
            let mut phases = cycle.subscribe();
            tokio::spawn(async move {
                while phases.changed().await.is_ok() {
                    println!("-> {}", *phases.borrow_and_update());
                }
            });
            let report = cycle.run().await?;
            for switch in &report.switches {
                for (serial, reason) in &switch.failures {
                    println!("  \u{2717} {} account #{}: {}", serial, switch.index + 1, reason);
                }
            }
            for pair in &report.pairs {
                for (serial, reason) in &pair.failures {
                    println!("  \u{2717} {} pair {}: {}", serial, pair.pair + 1, reason);
                }
            }
            println!("{}", report);
        }
        Commands::Mirror {
            serial,
            out,
            width,
            height,
        } => {
            let serial = match serial {
                Some(serial) => serial,
                None => fleet
                    .registry()
                    .serials()
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("no device to mirror"))?,
            };
            let recorder = Arc::new(FrameRecorder::new(&out, Size::new(width, height))?);
            let scheduler = Arc::new(TokioScheduler::current()?);
            let view = LiveView::new(fleet.clone(), recorder.clone(), scheduler);
            view.select(&serial)?;
            println!(
                "Mirroring {} into {} (Ctrl-C to stop)",
                serial,
                recorder.session_dir().display()
            );
            fleet.context().token().cancelled().await;
            view.stop();
            println!("Saved {} frame(s)", recorder.frame_count());
        }
        Commands::Apps => {
            println!("Known apps:");
            for app in list_known_apps() {
                println!("  - {}", app);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::StripEmoji { .. } | Commands::Apps) {
        check_bridge(&cli.adb)?;
    }

    let runner = CommandRunner::new(cli.adb.clone());
    let fleet = match cli.pool_size {
        Some(size) => Fleet::with_pool_size(runner, size),
        None => Fleet::new(runner),
    };
    let fleet = match &cli.command {
        Commands::Key { yes: true, .. } => fleet.with_confirmation(Box::new(|_| true)),
        _ => fleet.with_confirmation(Box::new(confirm_on_terminal)),
    };
    let fleet = Arc::new(fleet);

    let interrupted = fleet.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping everything in flight");
            interrupted.stop_all().await;
            info!("Stopped");
        }
    });

    run(cli, fleet).await
}
