use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use gangway::client::ClientError;
use gangway::client::terminal::{TerminalController, TerminalEvent, TerminalHandle};
use gangway::config::Config;
use gangway::logging::{self, LogConfig, LogLevel};
use gangway::session::{
    Allocation, GatewayConfig, ProtocolClass, SessionClient, SessionError, Viewport,
};
use gangway::transport::websocket::WebSocketDialer;

#[derive(Parser, Debug)]
#[command(name = "gangway", about = "Drive remote interactive sessions through a gangway gateway")]
struct Cli {
    /// Gateway control API base url.
    #[arg(long, env = "GANGWAY_GATEWAY")]
    gateway: Option<String>,

    /// Operator auth token presented to the gateway.
    #[arg(long, env = "GANGWAY_TOKEN")]
    token: Option<String>,

    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate a session on the named asset and attach this terminal to it.
    Connect {
        /// Asset identifier known to the gateway.
        target: String,

        /// One-time step-up code, when already obtained out of band.
        #[arg(long = "step-up-code")]
        step_up_code: Option<String>,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Logging(#[from] logging::InitError),
    #[error("terminal error: {0}")]
    Io(#[from] io::Error),
    #[error("step-up authentication aborted")]
    StepUpAborted,
    #[error("{0}")]
    Unsupported(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("gangway: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let env = Config::from_env();
    let gateway = cli.gateway.unwrap_or(env.gateway);
    let token = cli.token.or(env.auth_token);
    let config = GatewayConfig::new(&gateway)?.with_auth_token(token);
    let client = SessionClient::new(config)?;

    match cli.command {
        Command::Connect {
            target,
            step_up_code,
        } => connect(client, &target, step_up_code).await,
    }
}

async fn connect(
    client: SessionClient,
    target: &str,
    step_up_code: Option<String>,
) -> Result<(), CliError> {
    let session = match client.allocate(target, step_up_code.as_deref()).await? {
        Allocation::Ready(session) => session,
        Allocation::StepUpRequired(challenge) => {
            let code = prompt_step_up(&challenge.target)?;
            match client.allocate(target, Some(&code)).await? {
                Allocation::Ready(session) => session,
                Allocation::StepUpRequired(_) => return Err(CliError::StepUpAborted),
            }
        }
    };

    if session.protocol == ProtocolClass::StructuredInstruction {
        return Err(CliError::Unsupported(format!(
            "{target} is a desktop asset; this terminal drives character-stream sessions only"
        )));
    }

    let (cols, rows) = terminal::size()?;
    let viewport = Viewport {
        width_px: 0,
        height_px: 0,
        cols,
        rows,
    };
    let params = client.connect_params(&session, viewport);
    let url = params.websocket_url(client.config().base_url())?;
    let dialer = Arc::new(WebSocketDialer::new(url));

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (controller, handle) = TerminalController::new(session, dialer, events_tx);
    let controller = tokio::spawn(controller.run());

    let _raw = RawModeGuard::enable()?;
    let input_thread = spawn_input_thread(handle);

    let mut stdout = io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            TerminalEvent::Connected => {
                write!(stdout, "\r\n[gangway] connected to {target} (Ctrl+] to detach)\r\n")?;
                stdout.flush()?;
            }
            TerminalEvent::Output(data) => {
                stdout.write_all(data.as_bytes())?;
                stdout.flush()?;
            }
            TerminalEvent::Notice(notice) => {
                write!(stdout, "\r\n[gangway] {notice}\r\n")?;
                stdout.flush()?;
            }
            TerminalEvent::DirChanged(dir) => {
                debug!(target: "gangway::cli", %dir, "remote working directory changed");
            }
            TerminalEvent::Closed { .. } => {
                write!(stdout, "\r\n[gangway] press any key to reconnect, Ctrl+] to quit\r\n")?;
                stdout.flush()?;
            }
        }
    }

    if let Ok(result) = controller.await {
        result?;
    }
    drop(input_thread);
    Ok(())
}

fn prompt_step_up(target: &str) -> Result<String, CliError> {
    let mut stdout = io::stdout();
    write!(stdout, "step-up code for {target}: ")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let code = line.trim().to_string();
    if code.is_empty() {
        return Err(CliError::StepUpAborted);
    }
    Ok(code)
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Blocking reader thread: raw terminal events in, controller input out.
/// Exits on Ctrl+] (detach) or when the terminal event source fails.
fn spawn_input_thread(handle: TerminalHandle) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            match crossterm::event::read() {
                Ok(Event::Key(key)) => {
                    if is_detach(&key) {
                        handle.detach();
                        break;
                    }
                    if let Some(bytes) = encode_key(&key) {
                        handle.key(bytes);
                    }
                }
                Ok(Event::Resize(cols, rows)) => {
                    handle.resize(cols, rows);
                }
                Ok(_) => {}
                Err(_) => {
                    handle.detach();
                    break;
                }
            }
        }
    })
}

fn is_detach(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(']')
}

/// Terminal key event to the byte sequence a local shell would have seen.
fn encode_key(key: &KeyEvent) -> Option<String> {
    let bytes = match key.code {
        KeyCode::Char(ch) => {
            if key.modifiers.contains(KeyModifiers::CONTROL) {
                let upper = ch.to_ascii_uppercase();
                if upper.is_ascii_uppercase() {
                    return Some(((upper as u8 & 0x1f) as char).to_string());
                }
                return None;
            }
            return Some(ch.to_string());
        }
        KeyCode::Enter => "\r",
        KeyCode::Backspace => "\x7f",
        KeyCode::Tab => "\t",
        KeyCode::Esc => "\x1b",
        KeyCode::Up => "\x1b[A",
        KeyCode::Down => "\x1b[B",
        KeyCode::Right => "\x1b[C",
        KeyCode::Left => "\x1b[D",
        KeyCode::Home => "\x1b[H",
        KeyCode::End => "\x1b[F",
        KeyCode::PageUp => "\x1b[5~",
        KeyCode::PageDown => "\x1b[6~",
        KeyCode::Insert => "\x1b[2~",
        KeyCode::Delete => "\x1b[3~",
        _ => return None,
    };
    Some(bytes.to_string())
}
