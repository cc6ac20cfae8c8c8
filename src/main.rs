//! Terminal shell around the recorder and playback engine. Everything in
//! here is presentation: prompts, menus, and progress printing. The
//! engine itself only sees the `Operator` trait.

use std::io::{self, BufRead, Write};
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use macrocast::backend::desktop::{DesktopBackend, XinputPressWait};
use macrocast::backend::ocr::TesseractOcr;
use macrocast::backend::{InputBackend, ScreenBackend};
use macrocast::geometry;
use macrocast::playback::{
    MismatchContext, MismatchDecision, MismatchKind, Operator, PlaybackEngine, PlaybackOptions,
    ProgressEvent, ReplayOutcome,
};
use macrocast::recorder::click_listener::PressListener;
use macrocast::recorder::fingerprint::Fingerprinter;
use macrocast::recorder::types::{ScrollDirection, Step, KEY_CHOICES};
use macrocast::recorder::{EditSession, RecordingStore};

#[derive(Parser)]
#[command(name = "macrocast", about = "Record and replay browser macros")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List saved recordings
    List,
    /// Create a recording and enter the recording menu
    New { name: String, url: String },
    /// Append or remove steps of an existing recording
    Edit { name: String },
    /// Show the steps of a recording
    Steps { name: String },
    /// Replay a recording
    Run { name: String },
    /// Move a recording into the archive folder
    Archive { name: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let store = RecordingStore::open_default()?;

    match cli.command {
        Commands::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("no recordings saved");
            }
            for entry in entries {
                println!("{}  ({})", entry.name, entry.path.display());
            }
        }
        Commands::New { name, url } => {
            let mut session = EditSession::create(&name, &url, chrono::Local::now().date_naive());
            let mut backend = DesktopBackend::new()?;
            if let Step::Url { value } = &session.recording().steps[0] {
                backend.open_url(value)?;
            }
            record_menu(&mut session, &store, &backend)?;
        }
        Commands::Edit { name } => {
            let mut session = EditSession::open(&store, &name)?;
            let backend = DesktopBackend::new()?;
            record_menu(&mut session, &store, &backend)?;
        }
        Commands::Steps { name } => {
            let session = EditSession::open(&store, &name)?;
            for line in session.descriptions() {
                println!("{line}");
            }
        }
        Commands::Run { name } => {
            let recording = store.load_named(&name)?;
            let screen = DesktopBackend::new()?;
            let ocr = TesseractOcr::new();
            let mut input = DesktopBackend::new()?;
            let mut engine =
                PlaybackEngine::new(&screen, &ocr, &mut input, PlaybackOptions::default());
            let mut operator = TerminalOperator::new();
            match engine.run(&recording, &mut operator) {
                ReplayOutcome::Completed => {}
                ReplayOutcome::Cancelled(reason) => bail!("replay cancelled: {reason}"),
            }
        }
        Commands::Archive { name } => {
            let path = store.path_for(&name);
            if !path.exists() {
                bail!("no recording named '{name}'");
            }
            let destination = store.archive(&path)?;
            println!("archived to {}", destination.display());
        }
    }
    Ok(())
}

fn record_menu(
    session: &mut EditSession,
    store: &RecordingStore,
    screen: &dyn ScreenBackend,
) -> Result<()> {
    loop {
        println!();
        println!(
            "recording '{}' ({} steps)",
            session.recording().name,
            session.step_count()
        );
        println!("[c] click  [t] text  [k] key  [s] scroll  [w] wait");
        println!("[l] list steps  [x] delete step  [d] save and finish  [q] quit without saving");
        let Some(choice) = ask("> ") else { return Ok(()) };

        match choice.as_str() {
            "c" => {
                if let Some(step) = record_click(screen) {
                    session.push_step(step).context("adding click step")?;
                }
            }
            "t" => {
                if let Some(step) = record_text() {
                    session.push_step(step).context("adding text step")?;
                }
            }
            "k" => {
                if let Some(step) = record_key() {
                    session.push_step(step).context("adding key step")?;
                }
            }
            "s" => {
                if let Some(step) = record_scroll() {
                    session.push_step(step).context("adding scroll step")?;
                }
            }
            "w" => {
                let Some(seconds) = ask("seconds to wait: ") else { continue };
                let seconds: f64 = seconds.parse().unwrap_or(1.0);
                session.push_step(Step::wait(seconds)).context("adding wait step")?;
            }
            "l" => {
                for line in session.descriptions() {
                    println!("  {line}");
                }
            }
            "x" => {
                let Some(index) = ask("step number to delete: ") else { continue };
                let Ok(index) = index.parse::<usize>() else { continue };
                match session.remove_step(index.saturating_sub(1)) {
                    Ok(step) => println!("removed {}", step.describe(index - 1)),
                    Err(error) => println!("cannot delete: {error}"),
                }
            }
            "d" => {
                let path = session.save(store)?;
                println!("saved to {}", path.display());
                return Ok(());
            }
            "q" => return Ok(()),
            other => println!("unknown choice '{other}'"),
        }
    }
}

fn record_click(screen: &dyn ScreenBackend) -> Option<Step> {
    println!("click the target in the browser (Ctrl-C here to abort)...");
    let mut listener = PressListener::spawn(XinputPressWait::new());
    let result = loop {
        if let Some(result) = listener.recv_timeout(Duration::from_millis(200)) {
            break result;
        }
    };
    let Some((x, y)) = result else {
        println!("no press captured");
        return None;
    };

    let ocr = TesseractOcr::new();
    let fingerprint = Fingerprinter::new(screen, &ocr).capture(x, y);
    if let Some(text) = fingerprint.properties.text.as_deref() {
        println!("captured click at ({x}, {y}) on '{text}'");
    } else {
        println!("captured click at ({x}, {y})");
    }

    let size = geometry::screen_or_default(screen.size());
    Some(Step::click_at(
        x,
        y,
        size,
        fingerprint.snapshot,
        Some(fingerprint.properties),
    ))
}

fn record_text() -> Option<Step> {
    println!("[a] ask at replay  [f] fixed text  [p] password (asked at replay, never saved)");
    match ask("> ")?.as_str() {
        "a" => {
            let prompt = ask("prompt to show: ")?;
            Some(Step::prompted_input(&prompt))
        }
        "f" => {
            let value = ask("text to type: ")?;
            Some(Step::fixed_input(&value))
        }
        "p" => {
            let prompt = ask("label for the password: ")?;
            Some(Step::password(&prompt))
        }
        _ => None,
    }
}

fn record_key() -> Option<Step> {
    for (number, (label, _)) in KEY_CHOICES.iter().enumerate() {
        println!("[{}] {label}", number + 1);
    }
    println!("[0] other (type a key name)");
    let choice = ask("> ")?;
    if choice == "0" {
        let name = ask("key name: ")?;
        return Some(Step::key(&name));
    }
    let index: usize = choice.parse().ok()?;
    let (_, key_name) = KEY_CHOICES.get(index.checked_sub(1)?)?;
    Some(Step::key(key_name))
}

fn record_scroll() -> Option<Step> {
    let direction = match ask("direction, [u]p or [d]own: ")?.as_str() {
        "u" => ScrollDirection::Up,
        _ => ScrollDirection::Down,
    };
    let amount = ask("amount 1-10: ")?.parse::<i64>().unwrap_or(3);
    Some(Step::scroll(direction, amount))
}

/// Prompt on stdout, read a trimmed line from stdin. `None` on EOF.
fn ask(prompt: &str) -> Option<String> {
    print!("{prompt}");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

struct TerminalOperator {
    last_countdown: Option<u64>,
}

impl TerminalOperator {
    fn new() -> Self {
        Self {
            last_countdown: None,
        }
    }
}

impl Operator for TerminalOperator {
    fn prompt_text(&mut self, prompt: &str) -> Option<String> {
        let value = ask(&format!("{prompt} (empty cancels): "))?;
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    fn prompt_secret(&mut self, prompt: &str) -> Option<String> {
        // Turn off echo while the secret is typed; best effort.
        let _ = Command::new("stty").arg("-echo").status();
        let value = ask(&format!("{prompt} (empty cancels): "));
        let _ = Command::new("stty").arg("echo").status();
        println!();
        value.filter(|value| !value.is_empty())
    }

    fn resolve_mismatch(&mut self, context: &MismatchContext) -> MismatchDecision {
        println!();
        println!(
            "step {}/{} paused: click target at ({}, {}) may have changed",
            context.step_index + 1,
            context.total_steps,
            context.x,
            context.y
        );
        match &context.kind {
            MismatchKind::Properties {
                expected,
                observed,
                mismatches,
            } => {
                println!(
                    "  expected text {:?}, color {:?}",
                    expected.text, expected.color
                );
                println!(
                    "  observed text {:?}, color {:?}",
                    observed.text, observed.color
                );
                for line in mismatches {
                    println!("  - {line}");
                }
            }
            MismatchKind::Region { similarity } => {
                println!(
                    "  the screen region looks different (similarity {:.2}); this can \
                     happen when you are already logged in or the page changed",
                    similarity
                );
            }
        }
        match ask("continue anyway? [y/N] ") {
            Some(answer) if answer.eq_ignore_ascii_case("y") => MismatchDecision::Proceed,
            _ => MismatchDecision::Abort,
        }
    }

    fn notify(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StepStarted {
                index,
                total,
                description,
            } => {
                self.last_countdown = None;
                println!("[{}/{total}] {description}", index + 1);
            }
            ProgressEvent::Countdown { remaining } => {
                // One update per elapsed tenth of a second is plenty.
                let tenths = remaining.as_millis() as u64 / 100;
                if self.last_countdown != Some(tenths) {
                    self.last_countdown = Some(tenths);
                    print!("\r  {:>5.1}s ", remaining.as_secs_f64());
                    let _ = io::stdout().flush();
                    if remaining.is_zero() {
                        println!();
                    }
                }
            }
            ProgressEvent::Typing { chars, masked } => {
                if *masked {
                    println!("  typing {}", "\u{25cf}".repeat((*chars).min(12)));
                } else {
                    println!("  typing {chars} characters");
                }
            }
            ProgressEvent::Completed { name } => println!("done: {name}"),
            ProgressEvent::Cancelled { reason } => println!("stopped: {reason}"),
        }
    }
}
