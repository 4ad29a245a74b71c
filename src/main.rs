use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use username_avail::check::{AvailabilityService, Client};
use username_avail::config::Config;
use username_avail::coordinator::{AvailabilityState, Coordinator, Snapshot, SubmissionState};
use username_avail::telemetry;

const SUBMIT_COMMAND: &str = ":submit";
const SETTLE_POLL: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(
    name = "username-avail",
    about = "Check and register usernames against an availability service",
    after_help = "The service must expose POST /check-username and POST /register, \
                  both taking {\"username\": ...}.\n\n\
                  In watch mode every stdin line replaces the input text; a line \
                  reading `:submit` re-checks and registers the current name."
)]
struct Cli {
    /// Service base address [default: http://localhost:8080]
    #[arg(long, env = "USERNAME_AVAIL_URL", global = true)]
    base_url: Option<String>,

    /// TOML config file (base_url, debounce_ms, timeout_ms)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debounce window for watch mode, in milliseconds
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,

    /// Log coordinator decisions to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check names once each (also reads from stdin)
    Check {
        /// Usernames to check
        names: Vec<String>,

        /// Suppress output, exit code only
        #[arg(short, long)]
        quiet: bool,
    },
    /// Re-check a name and register it if it is available
    Register {
        /// Username to register
        name: String,
    },
    /// Treat stdin lines as keystrokes and print every state change
    Watch,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Command::Check { names, quiet } => check(&config, names, quiet),
        Command::Register { name } => register(config, &name),
        Command::Watch => watch(config),
    }
}

fn resolve_config(cli: &Cli) -> Result<Config, username_avail::error::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = &cli.base_url {
        config.base_url.clone_from(url);
    }
    if let Some(ms) = cli.debounce_ms {
        config.debounce_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn check(config: &Config, mut names: Vec<String>, quiet: bool) -> ExitCode {
    // Read from stdin if not a terminal
    if !io::stdin().is_terminal() {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    let trimmed = l.trim().to_string();
                    if !trimmed.is_empty() {
                        names.push(trimmed);
                    }
                }
                Err(e) => {
                    eprintln!("error: reading stdin: {e}");
                    return ExitCode::from(2);
                }
            }
        }
    }

    if names.is_empty() {
        eprintln!("error: no usernames provided");
        eprintln!("usage: username-avail check [OPTIONS] [NAMES...]");
        return ExitCode::from(2);
    }

    // Deduplicate while preserving order
    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.clone()));

    let client = Client::new(config);

    let results: Vec<(String, Result<bool, String>)> = thread::scope(|s| {
        let handles: Vec<_> = names
            .iter()
            .map(|name| {
                let client = &client;
                s.spawn(move || {
                    let result = client.check_username(name).map_err(|e| e.to_string());
                    (name.clone(), result)
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(&names)
            .map(|(h, name)| {
                h.join()
                    .unwrap_or_else(|_| (name.clone(), Err("check thread panicked".into())))
            })
            .collect()
    });

    let mut all_available = true;

    for (name, result) in &results {
        let (label, detail) = match result {
            Ok(true) => (AvailabilityState::Available, String::new()),
            Ok(false) => (AvailabilityState::Taken, String::new()),
            Err(msg) => (AvailabilityState::CheckFailed, format!(": {msg}")),
        };

        if label != AvailabilityState::Available {
            all_available = false;
        }

        if !quiet {
            println!("{name}\t{label}{detail}");
        }
    }

    if all_available {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn register(config: Config, name: &str) -> ExitCode {
    let coordinator = match Coordinator::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let outcome = coordinator.submit(name);
    println!("{name}\t{outcome}");
    if outcome == SubmissionState::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn watch(config: Config) -> ExitCode {
    let settle_budget = config.debounce() + config.timeout();
    let coordinator = match Coordinator::new(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let updates = coordinator.subscribe();
    let printer = thread::spawn(move || {
        let mut last: Option<String> = None;
        for snapshot in updates {
            let line = render(&snapshot);
            if last.as_deref() != Some(line.as_str()) {
                println!("{line}");
                last = Some(line);
            }
        }
    });

    let mut succeeded = false;
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("error: reading stdin: {e}");
                return ExitCode::from(2);
            }
        };
        if line.trim() == SUBMIT_COMMAND {
            succeeded = coordinator.submit(&coordinator.name()) == SubmissionState::Succeeded;
        } else {
            coordinator.on_input_changed(line);
        }
    }

    // Let the last debounced check land before exiting.
    let started = Instant::now();
    while started.elapsed() < settle_budget {
        let snapshot = coordinator.snapshot();
        if snapshot.availability != AvailabilityState::Pending
            && !snapshot.submission.is_in_progress()
        {
            break;
        }
        thread::sleep(SETTLE_POLL);
    }

    drop(coordinator);
    let _ = printer.join();

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn render(snapshot: &Snapshot) -> String {
    let mut line = format!("{}\t{}", snapshot.name, snapshot.availability);
    let settled = matches!(
        snapshot.availability,
        AvailabilityState::Available | AvailabilityState::Taken | AvailabilityState::CheckFailed
    );
    if let (true, Some(latency)) = (settled, snapshot.last_latency) {
        line.push_str(&format!(" ({} ms)", latency.as_millis()));
    }
    if snapshot.submission != SubmissionState::Idle {
        line.push_str(&format!("\t{}", snapshot.submission));
    }
    line
}
