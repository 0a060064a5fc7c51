//! Entry point for the serial reader.
//!
//! Responsibilities here are intentionally minimal:
//! - Parse command-line arguments.
//! - Load user configuration from `conf/config.toml`.
//! - Open a reading session and drive it from terminal commands.

use anyhow::{Context, Result, anyhow};
use leaf_serial::cancellation::CancellationToken;
use leaf_serial::config::{AppConfig, load_config, serialize_config};
use leaf_serial::pagination::{BufferMutation, ReaderEvent, ScrollAction, ScrollPosition};
use leaf_serial::session::{DocumentRequest, ReaderSession};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const DEFAULT_CONFIG_PATH: &str = "conf/config.toml";
/// Conventional status for a process stopped by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;
const USAGE: &str = "Usage: leaf-serial [--config PATH] [--print-config] <book-ref> \
                     [--name NAME] [--author AUTHOR] [--start N]";
/// The terminal jumps straight to either end, so its viewport is a single
/// point; otherwise short chapters would read as being at both edges at once.
const VIEWPORT_CHARS: f32 = 0.0;

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

struct CliArgs {
    config_path: PathBuf,
    print_config: bool,
    request: DocumentRequest,
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let config = load_config(&args.config_path);
    set_log_level(reload_handle, config.log_level.as_filter_str());
    if args.print_config {
        print!("{}", serialize_config(&config)?);
        return Ok(());
    }
    if args.request.source_ref.is_empty() {
        return Err(anyhow!(USAGE));
    }
    info!(
        server = %config.server_url,
        book = %args.request.source_ref,
        start = args.request.start_index,
        level = %config.log_level,
        "Starting serial reader"
    );

    let mut session = ReaderSession::open(&config, args.request)?;
    let token = session.cancellation();
    // The command loop sits in a blocking stdin read, so the handler cannot
    // hand control back to it; it closes the session and exits from here.
    ctrlc::set_handler(move || std::process::exit(interrupt(&token)))
        .context("Failed to install Ctrl-C handler")?;

    println!("{}", session.title());
    let mut view = TerminalView::default();
    settle(&mut session, &config, &mut view);
    drive(&mut session, &config, &mut view)?;
    session.close();
    Ok(())
}

fn drive(session: &mut ReaderSession, config: &AppConfig, view: &mut TerminalView) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        if session.is_cancelled() {
            info!("Interrupted; closing session");
            break;
        }
        let line = line.context("Failed to read command")?;
        let position = match line.trim() {
            "" => continue,
            "t" | "top" => view.top(),
            "b" | "bottom" => view.bottom(),
            "s" | "status" => {
                print_status(session);
                continue;
            }
            "q" | "quit" => break,
            other => {
                warn!(command = %other, "Unknown command; use top, bottom, status or quit");
                continue;
            }
        };
        match session.scroll(position) {
            ScrollAction::None => println!("-- nothing more in that direction --"),
            ScrollAction::Busy => println!("-- still loading --"),
            _ => settle(session, config, view),
        }
        io::stdout().flush().context("Failed to flush output")?;
    }
    Ok(())
}

/// Close the session on Ctrl-C and pick the status to exit with.
///
/// Workers see the cancelled token before persisting, so nothing fetched
/// after the signal lands in the cache.
fn interrupt(token: &CancellationToken) -> i32 {
    if token.cancel() {
        info!("Received Ctrl-C; closing session");
    }
    let _ = io::stdout().flush();
    INTERRUPTED_EXIT_CODE
}

/// Wait for the outstanding load and print whatever it produced.
fn settle(session: &mut ReaderSession, config: &AppConfig, view: &mut TerminalView) {
    let mut events = Vec::new();
    let timeout = config.request_timeout() + Duration::from_secs(1);
    if session.wait(timeout, &mut events) == 0 {
        warn!("No chapter arrived within {timeout:?}");
    }
    for event in events {
        match event {
            ReaderEvent::Mutation(mutation) => {
                view.apply(&mutation);
                print_mutation(&mutation);
            }
            ReaderEvent::Notice(err) => println!("!! {err}"),
        }
    }
    view.content_height = session.controller().buffer().height() as f32;
}

fn print_mutation(mutation: &BufferMutation) {
    match mutation {
        BufferMutation::Replace { label, text, .. } => println!("{label}\n\n{text}"),
        BufferMutation::Prepend {
            label,
            text,
            anchor_offset,
            ..
        } => println!("^^ {label} (view kept in place, +{anchor_offset} above)\n\n{text}"),
        BufferMutation::Append { label, text, .. } => println!("vv {label}\n\n{text}"),
    }
}

fn print_status(session: &ReaderSession) {
    let controller = session.controller();
    let window = controller
        .window()
        .map(|w| format!("{}..={}", w.low_index(), w.high_index()))
        .unwrap_or_else(|| "none".to_string());
    println!(
        "chapters {} | window {window} | state {} | buffer {} chars",
        controller.chapter_index().len(),
        controller.state(),
        controller.buffer().height()
    );
}

/// Scroll geometry of the terminal, in characters of assembled text.
#[derive(Debug, Default)]
struct TerminalView {
    offset: f32,
    content_height: f32,
}

impl TerminalView {
    fn apply(&mut self, mutation: &BufferMutation) {
        match mutation {
            BufferMutation::Replace { scroll_to_top, .. } => {
                if *scroll_to_top {
                    self.offset = 0.0;
                }
            }
            BufferMutation::Prepend { anchor_offset, .. } => self.offset += *anchor_offset as f32,
            BufferMutation::Append { .. } => {}
        }
    }

    fn top(&mut self) -> ScrollPosition {
        self.offset = 0.0;
        ScrollPosition::top(VIEWPORT_CHARS, self.content_height)
    }

    fn bottom(&mut self) -> ScrollPosition {
        let position = ScrollPosition::bottom(VIEWPORT_CHARS, self.content_height);
        self.offset = position.offset;
        position
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut args = args.into_iter();
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut print_config = false;
    let mut request = DocumentRequest::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = PathBuf::from(
                    args.next()
                        .ok_or_else(|| anyhow!("--config needs a path\n{USAGE}"))?,
                );
            }
            "--print-config" => print_config = true,
            "--name" => request.name = args.next(),
            "--author" => request.author = args.next(),
            "--start" => {
                let raw = args
                    .next()
                    .ok_or_else(|| anyhow!("--start needs a chapter number\n{USAGE}"))?;
                request.start_index = raw
                    .parse()
                    .with_context(|| format!("invalid start chapter `{raw}`"))?;
            }
            "-h" | "--help" => return Err(anyhow!(USAGE)),
            other if other.starts_with("--") => {
                return Err(anyhow!("unknown option `{other}`\n{USAGE}"));
            }
            other => {
                if !request.source_ref.is_empty() {
                    return Err(anyhow!("unexpected argument `{other}`\n{USAGE}"));
                }
                request.source_ref = other.to_string();
            }
        }
    }

    Ok(CliArgs {
        config_path,
        print_config,
        request,
    })
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    warn!("Logging initialized; override level with logging.log_level or RUST_LOG");
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("debug"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    } else {
        info!(%level, "Applied log level from config");
    }
}
