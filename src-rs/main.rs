mod actions;
mod artifacts;
mod compare;
mod detect;
mod error;
mod idle;
mod logging;
mod monitor;
mod ocr;
mod platform;
mod process;
mod settings;
mod verify;

#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use image::RgbaImage;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

use crate::compare::diff_frames;
use crate::monitor::{CycleState, Monitor};
use crate::platform::{create_desktop, WindowQuery};
use crate::settings::{Overrides, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "idle-nudge",
    version,
    about = "Watch an AI agent's window and approve, answer or nudge it when it goes idle"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Window title substring to watch (case-insensitive)
    #[arg(long, global = true)]
    window: Option<String>,
    /// Seconds between checks
    #[arg(long, global = true)]
    interval: Option<u64>,
    /// Number of identical screenshots that count as idle
    #[arg(long, global = true)]
    screenshots: Option<usize>,
    /// Minutes between continuation prompts
    #[arg(long, global = true)]
    cooldown: Option<f64>,
    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            window_pattern: self.window.clone(),
            check_interval: self.interval,
            screenshots_to_compare: self.screenshots,
            cooldown_minutes: self.cooldown,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Monitor the agent window until interrupted (default)
    Run,
    /// Sample the window until idle or active, act once, print the cycle report JSON
    Once(OnceArgs),
    /// Print the window that would be monitored as JSON
    Locate,
    /// Compare two screenshots with the idle detector's near-equality test
    Compare(CompareArgs),
    /// Print the effective settings JSON
    Settings,
}

#[derive(Args, Debug)]
struct OnceArgs {
    /// Seconds between samples while collecting history
    #[arg(long, default_value_t = 2)]
    gap: u64,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// First PNG
    a: PathBuf,
    /// Second PNG
    b: PathBuf,
    /// Changed-pixel fraction below which the images match (default: screenshot_threshold)
    #[arg(long)]
    threshold: Option<f64>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    let settings = Settings::load(cli.global.config.as_deref(), &cli.global.overrides())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => command_run(&settings),
        Commands::Once(args) => command_once(&settings, args),
        Commands::Locate => command_locate(&settings),
        Commands::Compare(args) => command_compare(&settings, args),
        Commands::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn command_run(settings: &Settings) -> Result<()> {
    let mut desktop = create_desktop().context("no desktop backend available")?;
    let mut monitor = Monitor::from_settings(settings)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("failed to set ctrl-c handler")?;

    info!(
        backend = desktop.name(),
        window = %settings.window_pattern,
        process = ?settings.process_name,
        interval_secs = settings.check_interval,
        samples = settings.screenshots_to_compare,
        cooldown_minutes = settings.cooldown_minutes,
        verification = monitor.has_verifier(),
        "monitoring started; press Ctrl+C to stop"
    );

    let counts = monitor.run(desktop.as_mut(), settings.interval(), &shutdown);

    info!(
        total = counts.total(),
        approvals = counts.approvals,
        answers = counts.answers,
        prompts = counts.prompts,
        "monitoring stopped"
    );
    Ok(())
}

fn command_once(settings: &Settings, args: OnceArgs) -> Result<()> {
    let mut desktop = create_desktop().context("no desktop backend available")?;
    let mut monitor = Monitor::from_settings(settings)?;
    let gap = Duration::from_secs(args.gap);

    let report = loop {
        let report = monitor.run_cycle(desktop.as_mut(), Instant::now());
        if !matches!(report.state, CycleState::Collecting { .. }) {
            break report;
        }
        thread::sleep(gap);
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn command_locate(settings: &Settings) -> Result<()> {
    let mut desktop = create_desktop().context("no desktop backend available")?;
    let query = WindowQuery {
        title_pattern: settings.window_pattern.clone(),
        process_hint: settings.process_name.clone(),
    };
    let window = desktop
        .find_window(&query)
        .with_context(|| format!("window lookup failed via {}", desktop.name()))?;

    let Some(window) = window else {
        bail!(
            "no window matches pattern {:?} (process hint: {:?})",
            settings.window_pattern,
            settings.process_name
        );
    };

    let payload = json!({
        "backend": desktop.name(),
        "window": window,
        "input_point": window.input_point(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn command_compare(settings: &Settings, args: CompareArgs) -> Result<()> {
    let threshold = args.threshold.unwrap_or(settings.screenshot_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("threshold must be within 0.0..=1.0, got {threshold}");
    }

    let a = open_rgba(&args.a)?;
    let b = open_rgba(&args.b)?;

    let payload = match diff_frames(&a, &b) {
        Some(diff) => json!({
            "a": args.a,
            "b": args.b,
            "threshold": threshold,
            "width": diff.width,
            "height": diff.height,
            "total_pixels": diff.total_pixels,
            "changed_pixels": diff.changed_pixels,
            "changed_fraction": diff.changed_fraction(),
            "match": diff.within(threshold),
        }),
        None => json!({
            "a": args.a,
            "b": args.b,
            "threshold": threshold,
            "a_size": [a.width(), a.height()],
            "b_size": [b.width(), b.height()],
            "match": false,
            "reason": "dimensions differ",
        }),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn open_rgba(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path)
        .with_context(|| format!("failed to open image: {}", path.display()))?;
    Ok(img.to_rgba8())
}
